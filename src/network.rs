//! Network coordinator: drives agent turns until the run is done.

use serde::{Deserialize, Serialize};

use crate::agent::Agent;
use crate::durable::Steps;
use crate::error::{Error, Result};
use crate::model::ChatMessage;
use crate::monitor::{ProgressSummary, RunMonitor};
use crate::state::AgentState;
use crate::tools::{ToolCallRecord, ToolLayer};

/// Coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkState {
    Running,
    Done,
}

/// Why a network stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoneReason {
    /// The completion hook recorded a summary.
    SummarySet,
    /// The iteration cap was reached without a summary.
    IterationCap,
    /// The model failed after retries.
    ModelFailure,
}

/// Router: decides, before each turn, whether another turn runs.
pub fn decide(state: &AgentState, iterations: u32, max_iterations: u32) -> NetworkState {
    if state.has_summary() || iterations >= max_iterations {
        NetworkState::Done
    } else {
        NetworkState::Running
    }
}

/// Final shared state and bookkeeping of a finished network.
#[derive(Debug, Clone)]
pub struct NetworkOutcome {
    /// Frozen shared state.
    pub state: AgentState,
    /// Number of agent turns executed.
    pub iterations: u32,
    pub reason: DoneReason,
    /// Every tool call, in execution order.
    pub tool_calls: Vec<ToolCallRecord>,
    pub progress: ProgressSummary,
}

/// Runs one agent repeatedly against a shared state.
pub struct Network {
    agent: Agent,
    max_iterations: u32,
}

impl Network {
    /// Creates a network with a turn cap.
    pub fn new(agent: Agent, max_iterations: u32) -> Self {
        Self {
            agent,
            max_iterations,
        }
    }

    /// Runs the network to completion with `input` as the first message.
    ///
    /// Session loss propagates as an error. A model failure ends the run early
    /// and is reported through [`DoneReason::ModelFailure`].
    pub async fn run(&self, input: &str, tools: &ToolLayer, steps: &Steps) -> Result<NetworkOutcome> {
        let mut state = AgentState::new();
        let mut history = vec![ChatMessage::user(input)];
        let mut monitor = RunMonitor::new();
        let mut tool_calls = Vec::new();
        let mut iterations = 0;

        let reason = loop {
            if decide(&state, iterations, self.max_iterations) == NetworkState::Done {
                break if state.has_summary() {
                    DoneReason::SummarySet
                } else {
                    DoneReason::IterationCap
                };
            }

            iterations += 1;
            tracing::debug!(
                run_id = %steps.run_id(),
                agent = %self.agent.name(),
                iteration = iterations,
                "starting agent turn"
            );

            match self.agent.run(&mut history, &mut state, tools, steps).await {
                Ok(turn) => {
                    monitor.record_turn(&turn);
                    tool_calls.extend(turn.tool_calls);
                }
                Err(Error::Model(message)) => {
                    tracing::warn!(
                        run_id = %steps.run_id(),
                        iteration = iterations,
                        error = %message,
                        "model failed, ending network"
                    );
                    break DoneReason::ModelFailure;
                }
                Err(e) => return Err(e),
            }
        };

        let progress = ProgressSummary::from(&monitor);
        tracing::info!(
            run_id = %steps.run_id(),
            iterations,
            reason = ?reason,
            tool_calls = progress.tool_calls,
            faults = progress.faults,
            files = state.files.len(),
            "network done"
        );

        Ok(NetworkOutcome {
            state,
            iterations,
            reason,
            tool_calls,
            progress,
        })
    }
}
