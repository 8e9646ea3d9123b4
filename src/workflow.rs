//! The durable run workflow.
//!
//! A run goes through these steps, each journaled under the request id so a
//! re-delivered event resumes instead of starting over:
//! 1. `get-sandbox-id` - acquire a sandbox with the long initial lifetime
//! 2. the agent network (only its tool calls are journaled)
//! 3. classification of the final state
//! 4. `get-sandbox-url` - reconnect, shorten the lifetime, derive the URL
//! 5. `save-result` - persist the outcome as a message

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::Agent;
use crate::config::DriveConfig;
use crate::durable::{StepJournal, Steps};
use crate::error::Result;
use crate::event::{RunRequest, TriggerEvent};
use crate::model::ModelClient;
use crate::network::Network;
use crate::persistence::{Fragment, MessageStore, NewMessage};
use crate::prompt::system_prompt;
use crate::sandbox::{SandboxId, SandboxProvider};
use crate::state::{AgentState, FileMap};
use crate::tools::ToolLayer;

/// Title attached to every generated fragment.
pub const FRAGMENT_TITLE: &str = "Fragment";

/// Message persisted when a run does not produce a usable result.
pub const FAILURE_MESSAGE: &str = "Something went wrong, please try again.";

/// Classification of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    Error,
}

/// A run succeeded only if the agent both reported a summary and wrote files.
pub fn classify(state: &AgentState) -> RunOutcome {
    if state.has_summary() && !state.files.is_empty() {
        RunOutcome::Success
    } else {
        RunOutcome::Error
    }
}

/// What a run returns to its caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub url: String,
    pub title: String,
    pub files: FileMap,
    pub summary: String,
    pub outcome: RunOutcome,
}

/// Settings for a workflow.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub template_id: String,
    pub initial_ttl: Duration,
    pub post_completion_ttl: Duration,
    pub app_port: u16,
    pub work_dir: String,
    pub agent_name: String,
    pub max_iterations: u32,
}

impl From<&DriveConfig> for WorkflowConfig {
    fn from(config: &DriveConfig) -> Self {
        Self {
            template_id: config.sandbox.template_id.clone(),
            initial_ttl: config.sandbox.initial_ttl(),
            post_completion_ttl: config.sandbox.post_completion_ttl(),
            app_port: config.sandbox.app_port,
            work_dir: config.sandbox.work_dir.clone(),
            agent_name: config.agent.name.clone(),
            max_iterations: config.agent.max_iterations,
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self::from(&DriveConfig::default())
    }
}

/// Drives one coding-agent run per trigger event.
pub struct CodeAgentWorkflow {
    provider: Arc<dyn SandboxProvider>,
    model: Arc<dyn ModelClient>,
    store: Arc<dyn MessageStore>,
    journal: Arc<dyn StepJournal>,
    config: WorkflowConfig,
}

impl CodeAgentWorkflow {
    pub fn new(
        provider: Arc<dyn SandboxProvider>,
        model: Arc<dyn ModelClient>,
        store: Arc<dyn MessageStore>,
        journal: Arc<dyn StepJournal>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            provider,
            model,
            store,
            journal,
            config,
        }
    }

    /// Runs the workflow for `event`.
    ///
    /// Provisioning and session-expiry failures are returned as errors; every
    /// other problem ends up as an [`RunOutcome::Error`] result with the
    /// generic failure message persisted.
    pub async fn run(&self, event: TriggerEvent) -> Result<RunResult> {
        let request = RunRequest::try_from(event)?;
        let steps = Steps::new(request.request_id.clone(), Arc::clone(&self.journal));

        tracing::info!(
            run_id = %request.request_id,
            provider = %self.provider.name(),
            template = %self.config.template_id,
            "starting run"
        );

        let sandbox_id: SandboxId = steps
            .run("get-sandbox-id", || async {
                let id = self
                    .provider
                    .acquire(&self.config.template_id, self.config.initial_ttl)
                    .await?;
                tracing::info!(run_id = %steps.run_id(), sandbox_id = %id, "sandbox acquired");
                Ok(id)
            })
            .await?;

        let tools = ToolLayer::new(Arc::clone(&self.provider), sandbox_id.clone());
        let agent = Agent::new(
            self.config.agent_name.clone(),
            system_prompt(&self.config.work_dir, self.config.app_port),
            Arc::clone(&self.model),
        );
        let network = Network::new(agent, self.config.max_iterations);
        let outcome = network.run(&request.prompt_text, &tools, &steps).await?;

        let state = outcome.state;
        let result_kind = classify(&state);

        let url: String = steps
            .run("get-sandbox-url", || async {
                let mut session = self.provider.reconnect(&sandbox_id).await?;
                session.set_ttl(self.config.post_completion_ttl).await?;
                let url = session.public_url(self.config.app_port).await?;
                tracing::info!(
                    run_id = %steps.run_id(),
                    sandbox_id = %sandbox_id,
                    ttl_secs = self.config.post_completion_ttl.as_secs(),
                    "sandbox lifetime reset"
                );
                Ok(url)
            })
            .await?;

        let summary = state.summary.clone().unwrap_or_default();
        let message = match result_kind {
            RunOutcome::Success => NewMessage::success(
                summary.clone(),
                Fragment {
                    sandbox_url: url.clone(),
                    title: FRAGMENT_TITLE.to_string(),
                    files: state.files.clone(),
                },
            ),
            RunOutcome::Error => {
                tracing::warn!(
                    run_id = %steps.run_id(),
                    reason = ?outcome.reason,
                    iterations = outcome.iterations,
                    has_summary = state.has_summary(),
                    files = state.files.len(),
                    "run did not produce a result"
                );
                NewMessage::failure(FAILURE_MESSAGE)
            }
        };

        let message_id: String = steps
            .run("save-result", || async move { self.store.create(message).await })
            .await?;
        tracing::info!(
            run_id = %steps.run_id(),
            message_id = %message_id,
            outcome = ?result_kind,
            "result saved"
        );

        Ok(RunResult {
            url,
            title: FRAGMENT_TITLE.to_string(),
            files: state.files,
            summary,
            outcome: result_kind,
        })
    }
}
