//! The coding agent: one model bound to a system prompt and the sandbox tools.

use std::sync::Arc;

use crate::durable::Steps;
use crate::error::Result;
use crate::model::{ChatMessage, CompletionRequest, ModelClient};
use crate::prompt::extract_summary;
use crate::state::{AgentState, StateDelta};
use crate::tools::{ToolCallRecord, ToolLayer};

/// What one agent turn produced.
#[derive(Debug, Clone, Default)]
pub struct AgentTurn {
    /// Text the model returned, if any.
    pub text: Option<String>,
    /// Tool calls executed, in emitted order.
    pub tool_calls: Vec<ToolCallRecord>,
    /// Whether the completion hook recorded a summary this turn.
    pub summary_recorded: bool,
}

/// An LLM-backed actor with a fixed system prompt and tool set.
pub struct Agent {
    name: String,
    system_prompt: String,
    model: Arc<dyn ModelClient>,
}

impl Agent {
    /// Creates an agent.
    pub fn new(
        name: impl Into<String>,
        system_prompt: impl Into<String>,
        model: Arc<dyn ModelClient>,
    ) -> Self {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
            model,
        }
    }

    /// Returns the agent name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs one turn.
    ///
    /// Sends the conversation to the model, executes the returned tool calls
    /// in order and appends everything to `history`. State is changed only by
    /// applying the deltas returned from tools and the completion hook.
    pub async fn run(
        &self,
        history: &mut Vec<ChatMessage>,
        state: &mut AgentState,
        tools: &ToolLayer,
        steps: &Steps,
    ) -> Result<AgentTurn> {
        let request = CompletionRequest {
            system: self.system_prompt.clone(),
            messages: history.clone(),
            tools: ToolLayer::definitions(),
        };
        let response = self.model.complete(request).await?;

        tracing::debug!(
            agent = %self.name,
            model = %self.model.name(),
            tool_calls = response.tool_calls.len(),
            has_text = response.text.is_some(),
            "model responded"
        );

        history.push(ChatMessage::assistant(&response));

        let mut records = Vec::with_capacity(response.tool_calls.len());
        for call in &response.tool_calls {
            let result = tools.dispatch(call, state, steps).await?;
            history.push(ChatMessage::tool(&call.id, &result.record.result));
            if let Some(delta) = result.delta {
                state.apply(delta);
            }
            records.push(result.record);
        }

        let summary_recorded = match on_response(response.text.as_deref()) {
            Some(delta) => {
                state.apply(delta);
                true
            }
            None => false,
        };

        Ok(AgentTurn {
            text: response.text,
            tool_calls: records,
            summary_recorded,
        })
    }
}

/// Completion hook: turns a marked assistant message into a summary delta.
pub fn on_response(text: Option<&str>) -> Option<StateDelta> {
    text.and_then(extract_summary).map(StateDelta::Summary)
}
