//! Sandbox session handles.
//!
//! This module provides the [`SandboxProvider`] trait for leasing remote
//! execution environments by id and the [`LocalSandboxProvider`]
//! implementation backed by local directories.

mod local;
mod provider;

pub use local::{LocalSandboxProvider, LocalSession, DEFAULT_WORK_DIR};
pub use provider::{CommandOutput, SandboxId, SandboxProvider, SandboxSession, SessionInfo};
