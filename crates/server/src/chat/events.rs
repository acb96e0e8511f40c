// Observable outcomes of the chat hub.
//
// The hub reports what happened through a `ChatEventSink` instead of
// logging directly, so tests can assert on outcomes without capturing
// log output.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::hub::ConnectionId;
use crate::metrics::ChatMetrics;

#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    Connected { connection_id: ConnectionId, user_id: i64, username: String },
    Disconnected { connection_id: ConnectionId },
    FrameReceived { connection_id: ConnectionId, bytes: usize },
    UndecodableFrame { connection_id: ConnectionId },
    ReadFailed { connection_id: ConnectionId, error: String },
    GuestMessageNotPersisted { connection_id: ConnectionId },
    ValidationRejected { connection_id: ConnectionId, reason: String },
    MessagePersisted { connection_id: ConnectionId, message_id: i64 },
    PersistFailed { connection_id: ConnectionId, error: String },
    RetentionApplied { cutoff: DateTime<Utc>, removed: u64 },
    RetentionFailed { cutoff: Option<DateTime<Utc>>, error: String },
    Broadcast { recipients: usize, evicted: usize },
    ConnectionEvicted { connection_id: ConnectionId },
    EncodeFailed { connection_id: ConnectionId, error: String },
}

pub trait ChatEventSink: Send + Sync {
    fn record(&self, event: ChatEvent);
}

/// Writes every event to `tracing` and keeps the Prometheus counters current.
pub struct TracingEventSink {
    metrics: Arc<ChatMetrics>,
}

impl TracingEventSink {
    pub fn new(metrics: Arc<ChatMetrics>) -> Self {
        Self { metrics }
    }
}

impl ChatEventSink for TracingEventSink {
    fn record(&self, event: ChatEvent) {
        match event {
            ChatEvent::Connected { connection_id, user_id, username } => {
                self.metrics.connection_opened();
                info!(%connection_id, user_id, username = %username, "chat connection registered");
            }
            ChatEvent::Disconnected { connection_id } => {
                self.metrics.connection_closed();
                info!(%connection_id, "chat connection unregistered");
            }
            ChatEvent::FrameReceived { connection_id, bytes } => {
                self.metrics.frame_received();
                debug!(%connection_id, bytes, "chat frame received");
            }
            ChatEvent::UndecodableFrame { connection_id } => {
                self.metrics.frame_rejected();
                warn!(%connection_id, "dropping chat frame that is not valid utf-8");
            }
            ChatEvent::ReadFailed { connection_id, error } => {
                warn!(%connection_id, error = %error, "chat connection read failed");
            }
            ChatEvent::GuestMessageNotPersisted { connection_id } => {
                debug!(%connection_id, "guest message broadcast without persisting");
            }
            ChatEvent::ValidationRejected { connection_id, reason } => {
                warn!(%connection_id, reason = %reason, "chat message failed validation");
            }
            ChatEvent::MessagePersisted { connection_id, message_id } => {
                self.metrics.message_persisted();
                debug!(%connection_id, message_id, "chat message persisted");
            }
            ChatEvent::PersistFailed { connection_id, error } => {
                self.metrics.persist_failed();
                error!(%connection_id, error = %error, "failed to persist chat message");
            }
            ChatEvent::RetentionApplied { cutoff, removed } => {
                debug!(%cutoff, removed, "chat retention applied");
            }
            ChatEvent::RetentionFailed { cutoff, error } => {
                self.metrics.retention_failed();
                error!(?cutoff, error = %error, "failed to delete expired chat messages");
            }
            ChatEvent::Broadcast { recipients, evicted } => {
                self.metrics.broadcast(evicted);
                debug!(recipients, evicted, "chat frame broadcast");
            }
            ChatEvent::ConnectionEvicted { connection_id } => {
                self.metrics.connection_closed();
                warn!(%connection_id, "evicting chat connection after failed delivery");
            }
            ChatEvent::EncodeFailed { connection_id, error } => {
                error!(%connection_id, error = %error, "failed to encode chat frame");
            }
        }
    }
}
