// Chat domain types shared between the server and clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A persisted chat message as returned by the listing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    /// Assigned by the store on insert.
    pub id: i64,
    pub user_id: i64,
    pub username: String,
    pub content: String,
    /// Receipt time on the server, never supplied by the client.
    pub timestamp: DateTime<Utc>,
}

/// A message that has been received but not yet stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChatMessage {
    pub user_id: i64,
    pub username: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MessageValidationError {
    #[error("username cannot be empty")]
    EmptyUsername,
    #[error("content cannot be empty")]
    EmptyContent,
}

impl NewChatMessage {
    pub fn new(user_id: i64, username: impl Into<String>, content: impl Into<String>) -> Self {
        Self::with_timestamp(user_id, username, content, Utc::now())
    }

    pub fn with_timestamp(
        user_id: i64,
        username: impl Into<String>,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self { user_id, username: username.into(), content: content.into(), timestamp }
    }

    /// Whitespace-only usernames and contents are treated as empty.
    pub fn validate(&self) -> Result<(), MessageValidationError> {
        if self.username.trim().is_empty() {
            return Err(MessageValidationError::EmptyUsername);
        }
        if self.content.trim().is_empty() {
            return Err(MessageValidationError::EmptyContent);
        }
        Ok(())
    }

    pub fn into_stored(self, id: i64) -> ChatMessage {
        ChatMessage {
            id,
            user_id: self.user_id,
            username: self.username,
            content: self.content,
            timestamp: self.timestamp,
        }
    }
}

/// Orders messages oldest first. The sort is stable, so messages sharing a
/// timestamp keep the order the store returned them in.
pub fn sort_by_timestamp(messages: &mut [ChatMessage]) {
    messages.sort_by_key(|message| message.timestamp);
}
