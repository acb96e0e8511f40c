// Wire format of the live chat channel.
//
// Clients send plain UTF-8 text frames whose whole payload is the message
// content. The server answers every inbound frame by broadcasting a JSON
// `ChatFrame` to all connected clients, the sender included.

use serde::{Deserialize, Serialize};

/// Server -> Client: one chat line. Store-assigned id and timestamp are not echoed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatFrame {
    pub username: String,
    pub content: String,
}

impl ChatFrame {
    pub fn new(username: impl Into<String>, content: impl Into<String>) -> Self {
        Self { username: username.into(), content: content.into() }
    }
}

pub fn encode_frame(frame: &ChatFrame) -> Result<String, serde_json::Error> {
    serde_json::to_string(frame)
}

pub fn decode_frame(raw: &str) -> Result<ChatFrame, serde_json::Error> {
    serde_json::from_str::<ChatFrame>(raw)
}
