//! Persistence of run outcomes as conversation messages.

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};
use crate::state::FileMap;

/// Author of a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageRole {
    User,
    Assistant,
}

/// Kind of a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Result,
    Error,
}

/// The deliverable attached to a successful result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fragment {
    pub sandbox_url: String,
    pub title: String,
    pub files: FileMap,
}

/// A message to persist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub content: String,
    pub role: MessageRole,
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment: Option<Fragment>,
}

impl NewMessage {
    /// A successful result carrying the generated fragment.
    pub fn success(summary: impl Into<String>, fragment: Fragment) -> Self {
        Self {
            content: summary.into(),
            role: MessageRole::Assistant,
            kind: MessageType::Result,
            fragment: Some(fragment),
        }
    }

    /// A failed run with a user-facing message.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            role: MessageRole::Assistant,
            kind: MessageType::Error,
            fragment: None,
        }
    }
}

/// A persisted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub message: NewMessage,
}

impl StoredMessage {
    fn new(message: NewMessage) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            message,
        }
    }
}

/// Write side of the message store.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persists a message and returns its id.
    async fn create(&self, message: NewMessage) -> Result<String>;
}

/// Message store kept in memory.
#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    messages: Mutex<Vec<StoredMessage>>,
}

impl MemoryMessageStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of the stored messages.
    pub fn messages(&self) -> Vec<StoredMessage> {
        self.messages
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn create(&self, message: NewMessage) -> Result<String> {
        let stored = StoredMessage::new(message);
        let id = stored.id.clone();
        self.messages
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(stored);
        Ok(id)
    }
}

/// Message store appending one JSON object per line to a file.
#[derive(Debug, Clone)]
pub struct JsonlMessageStore {
    path: PathBuf,
}

impl JsonlMessageStore {
    /// Creates a store writing to `path`.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Reads back every stored message.
    pub async fn read_all(&self) -> Result<Vec<StoredMessage>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        raw.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(Error::from))
            .collect()
    }
}

#[async_trait]
impl MessageStore for JsonlMessageStore {
    async fn create(&self, message: NewMessage) -> Result<String> {
        let stored = StoredMessage::new(message);
        let mut line = serde_json::to_string(&stored)?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Persistence(format!("failed to create {:?}: {}", parent, e)))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| Error::Persistence(format!("failed to open {:?}: {}", self.path, e)))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| Error::Persistence(format!("failed to append message: {}", e)))?;
        file.flush()
            .await
            .map_err(|e| Error::Persistence(format!("failed to flush message: {}", e)))?;

        tracing::debug!(message_id = %stored.id, path = ?self.path, "stored message");
        Ok(stored.id)
    }
}
