//! Error types for the code-agent drive.

use thiserror::Error;

/// Top-level error type for workflow operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Sandbox creation or lookup failed (quota, missing template, unknown id).
    #[error("failed to provision sandbox: {0}")]
    Provisioning(String),

    /// The sandbox lifetime elapsed before it was reached again.
    #[error("sandbox {sandbox_id} has expired")]
    SessionExpired { sandbox_id: String },

    /// A command, read or write inside a live sandbox failed.
    #[error("tool execution failed: {0}")]
    Tool(String),

    /// A path escapes the sandbox working directory.
    #[error("invalid sandbox path: {0}")]
    InvalidPath(String),

    /// The language model API failed.
    #[error("model request failed: {0}")]
    Model(String),

    /// Persisting the run outcome failed.
    #[error("persistence failed: {0}")]
    Persistence(String),

    /// Reading or writing the step journal failed.
    #[error("step journal error: {0}")]
    Journal(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The trigger event was malformed or had an unexpected name.
    #[error("invalid trigger event: {0}")]
    Event(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns true for the session failures that abandon a whole run.
    pub fn is_fatal_session(&self) -> bool {
        matches!(self, Error::Provisioning(_) | Error::SessionExpired { .. })
    }
}

/// Result type alias for workflow operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_errors_are_fatal() {
        assert!(Error::Provisioning("quota".to_string()).is_fatal_session());
        assert!(Error::SessionExpired {
            sandbox_id: "sbx-1".to_string()
        }
        .is_fatal_session());
    }

    #[test]
    fn tool_errors_are_not_fatal() {
        assert!(!Error::Tool("exit 1".to_string()).is_fatal_session());
        assert!(!Error::Model("503".to_string()).is_fatal_session());
    }

    #[test]
    fn expired_error_names_sandbox() {
        let err = Error::SessionExpired {
            sandbox_id: "sbx-42".to_string(),
        };
        assert_eq!(err.to_string(), "sandbox sbx-42 has expired");
    }
}
