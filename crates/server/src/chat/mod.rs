// Real-time chat: connection registry, message fan-out and history.

pub mod events;
pub mod handler;
pub mod hub;
pub mod store;

pub use handler::{router, ChatState};
pub use hub::{ChatConnection, ChatHub, ConnectionId, InboundFrame};
pub use store::{MemoryMessageStore, MessageStore, PgMessageStore, StoreError};
