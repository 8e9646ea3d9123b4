//! Sandbox provider traits and types.
//!
//! A sandbox is addressed by its [`SandboxId`] only. Live session handles are
//! never carried between workflow steps; each step reconnects by id, so the
//! driving process may be rescheduled between any two steps.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;

/// Opaque identifier of a leased sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SandboxId(String);

impl SandboxId {
    /// Wraps a provider-assigned identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SandboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata of a leased sandbox session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Provider-assigned identifier.
    pub sandbox_id: SandboxId,
    /// Template the sandbox was created from.
    pub template_id: String,
    /// When the sandbox was created.
    pub created_at: DateTime<Utc>,
    /// When the environment tears the sandbox down.
    pub expires_at: DateTime<Utc>,
    /// Host the sandbox serves its ports on.
    pub host: String,
}

impl SessionInfo {
    /// Returns true once `now` has reached the expiry deadline.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A line of command output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutput {
    /// Standard output line.
    Stdout(String),
    /// Standard error line.
    Stderr(String),
}

/// A reconnected sandbox session.
#[async_trait]
pub trait SandboxSession: Send + Sync {
    /// Returns the current session metadata.
    fn info(&self) -> &SessionInfo;

    /// Sets the remaining lifetime to exactly `ttl` from now.
    ///
    /// This is not additive: any earlier deadline is replaced.
    async fn set_ttl(&mut self, ttl: Duration) -> Result<()>;

    /// Returns the externally reachable URL for a port served by the sandbox.
    async fn public_url(&self, port: u16) -> Result<String>;

    /// Runs a shell command, streaming output lines to `output_tx`.
    ///
    /// Returns the exit code. A non-zero exit is not an error at this level.
    async fn run_command(
        &self,
        command: &str,
        output_tx: mpsc::UnboundedSender<CommandOutput>,
    ) -> Result<i32>;

    /// Writes a file, creating parent directories.
    async fn write_file(&self, path: &str, content: &str) -> Result<()>;

    /// Reads a file as text.
    async fn read_file(&self, path: &str) -> Result<String>;
}

/// Provider for leasing sandboxes.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Creates a sandbox from a template with an initial lifetime.
    ///
    /// Fails with [`crate::Error::Provisioning`] on quota or template errors.
    async fn acquire(&self, template_id: &str, ttl: Duration) -> Result<SandboxId>;

    /// Looks up a live sandbox by id.
    ///
    /// Fails with [`crate::Error::SessionExpired`] when the lifetime elapsed.
    async fn reconnect(&self, sandbox_id: &SandboxId) -> Result<Box<dyn SandboxSession>>;

    /// Returns the name of this provider.
    fn name(&self) -> &str;
}
