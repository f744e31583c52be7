//! # Chat Socket Frames
//!
//! Inbound frames sent by clients and the events the relay fans out.
//!
//! ## Inbound
//!
//! ```json
//! { "username": "alice", "message": "hi" }
//! { "type": "user_message", "animal": "elephant", "content_key": "hello", "content": "Hi!" }
//! ```
//!
//! ## Outbound
//!
//! ```json
//! { "type": "history", "data": [ { "username": "alice", "message": "hi", "timestamp": "..." } ] }
//! { "type": "new_message", "username": "alice", "message": "hi" }
//! { "type": "animal_response", "animal": "elephant", "content": "..." }
//! ```

use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Discriminator value of the scripted inbound frame.
pub const USER_MESSAGE_TYPE: &str = "user_message";

/// Plain chat frame: a named participant says something.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatFrame {
    pub username: String,
    pub message: String,
}

/// Scripted frame sent by the mobile client when it addresses an animal persona.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScriptedFrame {
    #[serde(rename = "type")]
    pub kind: String,
    pub animal: String,
    pub content_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// Any frame a client may send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Chat(ChatFrame),
    Scripted(ScriptedFrame),
}

impl ClientFrame {
    /// Decode a raw text frame.
    ///
    /// Frames carrying a `type` field must be `user_message` frames; everything
    /// else is decoded as a plain chat frame. Missing required fields are errors.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(raw)?;

        match value.get("type") {
            Some(Value::String(kind)) if kind == USER_MESSAGE_TYPE => {
                serde_json::from_value(value).map(ClientFrame::Scripted)
            }
            Some(other) => Err(serde_json::Error::custom(format!(
                "unsupported frame type: {}",
                other
            ))),
            None => serde_json::from_value(value).map(ClientFrame::Chat),
        }
    }
}

/// One persisted message as shown in the history snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    pub username: String,
    pub message: String,
    /// RFC 3339 instant assigned by the store
    pub timestamp: String,
}

/// Events pushed from the relay to connected clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Full scope history, sent once right after a client connects
    History { data: Vec<HistoryEntry> },
    /// A user message or a persona reply to a chat frame
    NewMessage { username: String, message: String },
    /// A persona reply to a scripted frame
    AnimalResponse { animal: String, content: String },
}

impl ServerEvent {
    pub fn new_message(username: impl Into<String>, message: impl Into<String>) -> Self {
        ServerEvent::NewMessage {
            username: username.into(),
            message: message.into(),
        }
    }

    pub fn animal_response(animal: impl Into<String>, content: impl Into<String>) -> Self {
        ServerEvent::AnimalResponse {
            animal: animal.into(),
            content: content.into(),
        }
    }

    /// Encode as the JSON text sent over the socket.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
