// Durable chat history.
//
// `PgMessageStore` backs production deployments; `MemoryMessageStore` is
// used when no database is configured. Tests wrap the memory store in
// `testing::RecordingMessageStore` to count calls and inject failures.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use forum_common::types::{ChatMessage, NewChatMessage};
use sqlx::PgPool;
use thiserror::Error;

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("message store query failed: {0}")]
    Database(#[from] sqlx::Error),
    #[error("message store unavailable: {0}")]
    Unavailable(String),
}

pub trait MessageStore: Send + Sync {
    /// Persists one message and returns it with its assigned id.
    fn save<'a>(&'a self, message: &'a NewChatMessage) -> StoreFuture<'a, ChatMessage>;

    /// Every stored message. Ordering is not guaranteed.
    fn list_all(&self) -> StoreFuture<'_, Vec<ChatMessage>>;

    /// Removes messages strictly older than `cutoff`; returns how many went.
    fn delete_older_than(&self, cutoff: DateTime<Utc>) -> StoreFuture<'_, u64>;
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: i64,
    user_id: i64,
    username: String,
    content: String,
    timestamp: DateTime<Utc>,
}

impl From<MessageRow> for ChatMessage {
    fn from(row: MessageRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            username: row.username,
            content: row.content,
            timestamp: row.timestamp,
        }
    }
}

#[derive(Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl MessageStore for PgMessageStore {
    fn save<'a>(&'a self, message: &'a NewChatMessage) -> StoreFuture<'a, ChatMessage> {
        Box::pin(async move {
            let row = sqlx::query_as::<_, MessageRow>(
                r#"
                INSERT INTO messages (user_id, username, content, timestamp)
                VALUES ($1, $2, $3, $4)
                RETURNING id, user_id, username, content, timestamp
                "#,
            )
            .bind(message.user_id)
            .bind(&message.username)
            .bind(&message.content)
            .bind(message.timestamp)
            .fetch_one(&self.pool)
            .await?;

            Ok(row.into())
        })
    }

    fn list_all(&self) -> StoreFuture<'_, Vec<ChatMessage>> {
        Box::pin(async move {
            let rows = sqlx::query_as::<_, MessageRow>(
                r#"
                SELECT id, user_id, username, content, timestamp
                FROM messages
                ORDER BY timestamp ASC, id ASC
                "#,
            )
            .fetch_all(&self.pool)
            .await?;

            Ok(rows.into_iter().map(ChatMessage::from).collect())
        })
    }

    fn delete_older_than(&self, cutoff: DateTime<Utc>) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM messages WHERE timestamp < $1")
                .bind(cutoff)
                .execute(&self.pool)
                .await?;

            Ok(result.rows_affected())
        })
    }
}

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    messages: Vec<ChatMessage>,
}

/// Process-local history. Lost on restart.
#[derive(Default)]
pub struct MemoryMessageStore {
    state: Mutex<MemoryState>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds history directly, bypassing `save`.
    pub fn insert(&self, message: NewChatMessage) -> ChatMessage {
        let mut state = self.lock();
        state.next_id += 1;
        let stored = message.into_stored(state.next_id);
        state.messages.push(stored.clone());
        stored
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.lock().messages.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MessageStore for MemoryMessageStore {
    fn save<'a>(&'a self, message: &'a NewChatMessage) -> StoreFuture<'a, ChatMessage> {
        let stored = self.insert(message.clone());
        Box::pin(async move { Ok(stored) })
    }

    fn list_all(&self) -> StoreFuture<'_, Vec<ChatMessage>> {
        let messages = self.messages();
        Box::pin(async move { Ok(messages) })
    }

    fn delete_older_than(&self, cutoff: DateTime<Utc>) -> StoreFuture<'_, u64> {
        let removed = {
            let mut state = self.lock();
            let before = state.messages.len();
            state.messages.retain(|message| message.timestamp >= cutoff);
            (before - state.messages.len()) as u64
        };
        Box::pin(async move { Ok(removed) })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use chrono::{DateTime, Utc};
    use forum_common::types::{ChatMessage, NewChatMessage};

    use super::{MemoryMessageStore, MessageStore, StoreError, StoreFuture};

    #[derive(Default)]
    struct Calls {
        saves: usize,
        delete_cutoffs: Vec<DateTime<Utc>>,
        fail_saves: bool,
        fail_deletes: bool,
        fail_lists: bool,
    }

    /// Memory store that records calls and can be told to fail.
    #[derive(Default)]
    pub(crate) struct RecordingMessageStore {
        inner: MemoryMessageStore,
        calls: Mutex<Calls>,
    }

    impl RecordingMessageStore {
        pub(crate) fn insert(&self, message: NewChatMessage) -> ChatMessage {
            self.inner.insert(message)
        }

        pub(crate) fn messages(&self) -> Vec<ChatMessage> {
            self.inner.messages()
        }

        pub(crate) fn save_calls(&self) -> usize {
            self.lock().saves
        }

        pub(crate) fn delete_cutoffs(&self) -> Vec<DateTime<Utc>> {
            self.lock().delete_cutoffs.clone()
        }

        pub(crate) fn fail_saves(&self, fail: bool) {
            self.lock().fail_saves = fail;
        }

        pub(crate) fn fail_deletes(&self, fail: bool) {
            self.lock().fail_deletes = fail;
        }

        pub(crate) fn fail_lists(&self, fail: bool) {
            self.lock().fail_lists = fail;
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, Calls> {
            self.calls.lock().expect("store call log lock poisoned")
        }
    }

    impl MessageStore for RecordingMessageStore {
        fn save<'a>(&'a self, message: &'a NewChatMessage) -> StoreFuture<'a, ChatMessage> {
            let fail = {
                let mut calls = self.lock();
                calls.saves += 1;
                calls.fail_saves
            };
            if fail {
                return Box::pin(async { Err(StoreError::Unavailable("saves disabled".into())) });
            }
            self.inner.save(message)
        }

        fn list_all(&self) -> StoreFuture<'_, Vec<ChatMessage>> {
            if self.lock().fail_lists {
                return Box::pin(async { Err(StoreError::Unavailable("listing disabled".into())) });
            }
            self.inner.list_all()
        }

        fn delete_older_than(&self, cutoff: DateTime<Utc>) -> StoreFuture<'_, u64> {
            let fail = {
                let mut calls = self.lock();
                calls.delete_cutoffs.push(cutoff);
                calls.fail_deletes
            };
            if fail {
                return Box::pin(async { Err(StoreError::Unavailable("deletes disabled".into())) });
            }
            self.inner.delete_older_than(cutoff)
        }
    }
}
