//! Progress monitoring for agent runs.
//!
//! Tracks turns, tool calls, faults and written files so a finished run can
//! be logged and inspected.

use std::collections::BTreeSet;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::agent::AgentTurn;
use crate::tools::{normalize_relative_path, ToolCallRecord, WRITE_FILES};

/// Tracks progress of one network run.
pub struct RunMonitor {
    turns: u32,
    tool_calls: usize,
    faults: usize,
    files_written: BTreeSet<String>,
    start_time: Instant,
}

impl Default for RunMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl RunMonitor {
    /// Creates a monitor starting now.
    pub fn new() -> Self {
        Self {
            turns: 0,
            tool_calls: 0,
            faults: 0,
            files_written: BTreeSet::new(),
            start_time: Instant::now(),
        }
    }

    /// Records a completed turn.
    pub fn record_turn(&mut self, turn: &AgentTurn) {
        self.turns += 1;
        for call in &turn.tool_calls {
            self.record_tool_call(call);
        }
    }

    /// Records a tool call.
    pub fn record_tool_call(&mut self, call: &ToolCallRecord) {
        self.tool_calls += 1;
        if call.faulted {
            self.faults += 1;
            return;
        }
        if call.tool_name == WRITE_FILES {
            if let Some(files) = call.arguments.get("files").and_then(|f| f.as_array()) {
                let paths = files
                    .iter()
                    .filter_map(|f| normalize_relative_path(f.get("path")?.as_str()?));
                self.files_written.extend(paths);
            }
        }
    }
}

/// Snapshot of a run's progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSummary {
    pub turns: u32,
    pub tool_calls: usize,
    pub faults: usize,
    pub files_written: Vec<String>,
    pub total_duration_secs: f64,
}

impl From<&RunMonitor> for ProgressSummary {
    fn from(monitor: &RunMonitor) -> Self {
        Self {
            turns: monitor.turns,
            tool_calls: monitor.tool_calls,
            faults: monitor.faults,
            files_written: monitor.files_written.iter().cloned().collect(),
            total_duration_secs: monitor.start_time.elapsed().as_secs_f64(),
        }
    }
}
