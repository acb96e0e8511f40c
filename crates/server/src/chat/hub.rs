use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;

use chrono::{Duration, Utc};
use forum_common::protocol::chat::{encode_frame, ChatFrame};
use forum_common::types::{sort_by_timestamp, ChatMessage, NewChatMessage};
use futures_util::{Stream, StreamExt};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use super::events::{ChatEvent, ChatEventSink};
use super::store::{MessageStore, StoreError};
use crate::auth::Identity;

pub type ConnectionId = Uuid;

/// Hub-side handle to one live connection. Frames pushed into `outbound`
/// are written to the socket by that connection's writer task.
#[derive(Debug)]
pub struct ChatConnection {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<String>,
}

impl ChatConnection {
    pub fn new(outbound: mpsc::UnboundedSender<String>) -> Self {
        Self { id: Uuid::new_v4(), outbound }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

/// Transport-neutral view of an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    Binary(Vec<u8>),
    /// Ping/pong; answered by the transport, ignored by the hub.
    Control,
    Close,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    pub recipients: usize,
    pub evicted: usize,
}

struct Registration {
    identity: Identity,
    outbound: mpsc::UnboundedSender<String>,
}

pub struct ChatHub {
    registry: Mutex<HashMap<ConnectionId, Registration>>,
    store: Arc<dyn MessageStore>,
    events: Arc<dyn ChatEventSink>,
    retention: Duration,
}

impl ChatHub {
    pub fn new(
        store: Arc<dyn MessageStore>,
        events: Arc<dyn ChatEventSink>,
        retention: Duration,
    ) -> Self {
        Self { registry: Mutex::new(HashMap::new()), store, events, retention }
    }

    pub async fn register(&self, connection: ChatConnection, identity: Identity) {
        let connection_id = connection.id;
        self.events.record(ChatEvent::Connected {
            connection_id,
            user_id: identity.user_id,
            username: identity.username.clone(),
        });
        self.registry
            .lock()
            .await
            .insert(connection_id, Registration { identity, outbound: connection.outbound });
    }

    /// Dropping the registration drops the outbound sender, which ends the
    /// writer task and closes the socket. Unknown ids are ignored.
    pub async fn unregister(&self, connection_id: ConnectionId) -> bool {
        let removed = self.registry.lock().await.remove(&connection_id).is_some();
        if removed {
            self.events.record(ChatEvent::Disconnected { connection_id });
        }
        removed
    }

    /// Receive loop for one connection. Returns after the stream ends,
    /// errors, or yields a close frame; the connection is unregistered on
    /// every one of those paths.
    pub async fn handle<S, E>(&self, connection_id: ConnectionId, identity: &Identity, inbound: S)
    where
        S: Stream<Item = Result<InboundFrame, E>> + Send,
        E: Display,
    {
        let mut inbound = std::pin::pin!(inbound);

        while let Some(frame) = inbound.next().await {
            let content = match frame {
                Ok(InboundFrame::Text(text)) => text,
                Ok(InboundFrame::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(_) => {
                        self.events.record(ChatEvent::UndecodableFrame { connection_id });
                        continue;
                    }
                },
                Ok(InboundFrame::Control) => continue,
                Ok(InboundFrame::Close) => break,
                Err(error) => {
                    self.events
                        .record(ChatEvent::ReadFailed { connection_id, error: error.to_string() });
                    break;
                }
            };

            self.process_frame(connection_id, identity, content).await;
        }

        self.unregister(connection_id).await;
    }

    async fn process_frame(
        &self,
        connection_id: ConnectionId,
        identity: &Identity,
        content: String,
    ) {
        self.events.record(ChatEvent::FrameReceived { connection_id, bytes: content.len() });

        if identity.is_authenticated() {
            let message =
                NewChatMessage::new(identity.user_id, identity.username.clone(), content.clone());
            match message.validate() {
                Ok(()) => self.persist(connection_id, &message).await,
                Err(reason) => self.events.record(ChatEvent::ValidationRejected {
                    connection_id,
                    reason: reason.to_string(),
                }),
            }
        } else {
            self.events.record(ChatEvent::GuestMessageNotPersisted { connection_id });
        }

        let frame = ChatFrame::new(identity.username.clone(), content);
        match encode_frame(&frame) {
            Ok(encoded) => {
                self.broadcast(&encoded).await;
            }
            Err(error) => self
                .events
                .record(ChatEvent::EncodeFailed { connection_id, error: error.to_string() }),
        }
    }

    async fn persist(&self, connection_id: ConnectionId, message: &NewChatMessage) {
        match self.store.save(message).await {
            Ok(stored) => {
                self.events
                    .record(ChatEvent::MessagePersisted { connection_id, message_id: stored.id });
                self.apply_retention().await;
            }
            Err(error) => self
                .events
                .record(ChatEvent::PersistFailed { connection_id, error: error.to_string() }),
        }
    }

    async fn apply_retention(&self) {
        let Some(cutoff) = Utc::now().checked_sub_signed(self.retention) else {
            self.events.record(ChatEvent::RetentionFailed {
                cutoff: None,
                error: format!("retention window of {} is out of range", self.retention),
            });
            return;
        };

        match self.store.delete_older_than(cutoff).await {
            Ok(removed) => self.events.record(ChatEvent::RetentionApplied { cutoff, removed }),
            Err(error) => self.events.record(ChatEvent::RetentionFailed {
                cutoff: Some(cutoff),
                error: error.to_string(),
            }),
        }
    }

    /// Enqueues `encoded` for every registered connection. Connections whose
    /// queue is closed are removed while the registry lock is still held.
    pub async fn broadcast(&self, encoded: &str) -> BroadcastOutcome {
        let mut registry = self.registry.lock().await;
        let recipients = registry.len();
        let mut evicted = Vec::new();

        registry.retain(|connection_id, registration| {
            let delivered = registration.outbound.send(encoded.to_owned()).is_ok();
            if !delivered {
                evicted.push(*connection_id);
            }
            delivered
        });
        drop(registry);

        for connection_id in &evicted {
            self.events.record(ChatEvent::ConnectionEvicted { connection_id: *connection_id });
        }
        let outcome = BroadcastOutcome { recipients, evicted: evicted.len() };
        self.events.record(ChatEvent::Broadcast {
            recipients: outcome.recipients,
            evicted: outcome.evicted,
        });
        outcome
    }

    /// Persisted history, oldest first.
    pub async fn list_all(&self) -> Result<Vec<ChatMessage>, StoreError> {
        let mut messages = self.store.list_all().await?;
        sort_by_timestamp(&mut messages);
        Ok(messages)
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.lock().await.len()
    }

    pub async fn is_registered(&self, connection_id: ConnectionId) -> bool {
        self.registry.lock().await.contains_key(&connection_id)
    }

    pub async fn identity_of(&self, connection_id: ConnectionId) -> Option<Identity> {
        self.registry
            .lock()
            .await
            .get(&connection_id)
            .map(|registration| registration.identity.clone())
    }
}
