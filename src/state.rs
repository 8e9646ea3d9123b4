//! Shared state accumulated by the agent during one run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Map from workspace-relative path to full file content.
pub type FileMap = BTreeMap<String, String>;

/// State shared between agent turns of a single run.
///
/// Owned by exactly one network for the duration of a run and only changed
/// through [`AgentState::apply`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentState {
    /// Summary captured from the completion marker, if the agent emitted it.
    pub summary: Option<String>,
    /// Files written so far.
    pub files: FileMap,
}

/// A change produced by a tool handler or the completion hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum StateDelta {
    /// Files to merge into the file map.
    Files(FileMap),
    /// Summary to record.
    Summary(String),
}

impl AgentState {
    /// Creates an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a delta. File deltas merge and never remove existing paths.
    pub fn apply(&mut self, delta: StateDelta) {
        match delta {
            StateDelta::Files(files) => self.files.extend(files),
            StateDelta::Summary(summary) => self.summary = Some(summary),
        }
    }

    /// Returns true once the completion hook has recorded a summary.
    pub fn has_summary(&self) -> bool {
        self.summary.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(entries: &[(&str, &str)]) -> FileMap {
        entries
            .iter()
            .map(|(p, c)| (p.to_string(), c.to_string()))
            .collect()
    }

    #[test]
    fn new_state_is_empty() {
        let state = AgentState::new();
        assert!(state.summary.is_none());
        assert!(state.files.is_empty());
        assert!(!state.has_summary());
    }

    #[test]
    fn file_deltas_accumulate_across_applies() {
        let mut state = AgentState::new();
        state.apply(StateDelta::Files(files(&[("app/page.tsx", "v1")])));
        state.apply(StateDelta::Files(files(&[("lib/utils.ts", "u")])));
        state.apply(StateDelta::Files(files(&[("app/page.tsx", "v2")])));

        assert_eq!(
            state.files,
            files(&[("app/page.tsx", "v2"), ("lib/utils.ts", "u")])
        );
    }

    #[test]
    fn empty_file_delta_never_shrinks_map() {
        let mut state = AgentState::new();
        state.apply(StateDelta::Files(files(&[("a.ts", "a")])));
        state.apply(StateDelta::Files(FileMap::new()));

        assert_eq!(state.files.len(), 1);
    }

    #[test]
    fn summary_delta_sets_summary() {
        let mut state = AgentState::new();
        state.apply(StateDelta::Summary("Added a counter.".to_string()));
        assert_eq!(state.summary.as_deref(), Some("Added a counter."));
    }

    #[test]
    fn delta_serializes_with_kind_tag() {
        let json = serde_json::to_string(&StateDelta::Summary("done".to_string())).unwrap();
        assert_eq!(json, r#"{"kind":"summary","value":"done"}"#);
    }
}
