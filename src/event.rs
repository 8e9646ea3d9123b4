//! Trigger events that start a run.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Name of the event that starts a coding-agent run.
pub const RUN_EVENT: &str = "code-agent/run";

/// Payload of a trigger event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventData {
    /// The user's natural-language request.
    pub value: String,
}

/// An incoming trigger event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// Event id. Re-delivering the same id resumes the same run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub data: EventData,
}

impl TriggerEvent {
    /// Creates a run event for `value`.
    pub fn run(value: impl Into<String>) -> Self {
        Self {
            id: None,
            name: RUN_EVENT.to_string(),
            data: EventData {
                value: value.into(),
            },
        }
    }

    /// Sets the event id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// A validated run request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Identifies the run in the step journal.
    pub request_id: String,
    /// Passed verbatim to the agent as its first message.
    pub prompt_text: String,
}

impl TryFrom<TriggerEvent> for RunRequest {
    type Error = Error;

    fn try_from(event: TriggerEvent) -> Result<Self> {
        if event.name != RUN_EVENT {
            return Err(Error::Event(format!(
                "expected '{}', got '{}'",
                RUN_EVENT, event.name
            )));
        }
        if event.data.value.trim().is_empty() {
            return Err(Error::Event("request text cannot be empty".to_string()));
        }

        Ok(Self {
            request_id: event
                .id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            prompt_text: event.data.value,
        })
    }
}
