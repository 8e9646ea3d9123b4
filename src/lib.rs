//! Code Agent Drive - turns a natural-language coding request into a running app
//!
//! This library runs a tool-calling LLM agent inside an ephemeral sandbox as a
//! durable, resumable workflow: acquire a sandbox, let the agent write and run
//! code until it reports a summary, shorten the sandbox lifetime and persist
//! the outcome.

pub mod agent;
pub mod backoff;
pub mod clock;
pub mod config;
pub mod durable;
pub mod error;
pub mod event;
pub mod model;
pub mod monitor;
pub mod network;
pub mod persistence;
pub mod prompt;
pub mod sandbox;
pub mod state;
pub mod tools;
pub mod workflow;

pub use agent::{Agent, AgentTurn};
pub use backoff::RetryPolicy;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    AgentConfig, DriveConfig, SandboxConfig, StorageConfig, Validate, ValidationResult,
};
pub use durable::{FileJournal, MemoryJournal, StepJournal, StepRecord, Steps};
pub use error::{Error, Result};
pub use event::{RunRequest, TriggerEvent, RUN_EVENT};
pub use model::{
    AssistantMessage, ChatCompletionsClient, ChatMessage, CompletionRequest, ModelClient,
    ScriptedModel, ToolCall,
};
pub use monitor::{ProgressSummary, RunMonitor};
pub use network::{decide, DoneReason, Network, NetworkOutcome, NetworkState};
pub use persistence::{
    Fragment, JsonlMessageStore, MemoryMessageStore, MessageRole, MessageStore, MessageType,
    NewMessage, StoredMessage,
};
pub use sandbox::{LocalSandboxProvider, SandboxId, SandboxProvider, SandboxSession, SessionInfo};
pub use state::{AgentState, FileMap, StateDelta};
pub use tools::{ToolCallRecord, ToolLayer, ToolOutcome};
pub use workflow::{
    classify, CodeAgentWorkflow, RunOutcome, RunResult, WorkflowConfig, FAILURE_MESSAGE,
    FRAGMENT_TITLE,
};
