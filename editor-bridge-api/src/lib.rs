//! editor-bridge-api: Shared types for the editor bridge
//!
//! This crate defines the protocol between the host and the sandboxed editor.
//! Every frame on the channel is a [`Message`]; payloads use the JSON data model
//! and are encoded on the wire by a [`WireCodec`].

pub mod codec;
pub mod schema;

pub use codec::{CodecError, WireCodec};
pub use schema::{ArgKind, ArgSpec, ArgumentEncoding, CommandSpec, ResultKind};

use serde::{Deserialize, Serialize};
pub use serde_json::Value;

/// Protocol version announced in the `ready` event payload
pub const PROTOCOL_VERSION: u32 = 1;

/// Correlation token pairing a call with its result or error
pub type CorrelationId = u64;

/// Event names with a fixed meaning on both sides of the channel
pub mod events {
    /// Sandbox → host: the editor runtime finished booting
    pub const READY: &str = "ready";

    /// Sandbox → host: full editor state snapshot
    pub const STATE_UPDATE: &str = "stateUpdate";

    /// Host → sandbox: content the editor should apply without replying
    pub const CONTENT_UPDATE: &str = "contentUpdate";
}

/// State fields owned by the core bridge
pub mod fields {
    pub const IS_READY: &str = "isReady";
    pub const IS_FOCUSED: &str = "isFocused";
    pub const CONTENT_CHANGED: &str = "contentChanged";
}

/// Discriminates the four wire cases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Request expecting exactly one `Result` or `Error` with the same id
    Call,
    /// Successful reply to a call
    Result,
    /// Failed reply to a call
    Error,
    /// Uncorrelated notification, either direction
    Event,
}

/// A single frame exchanged between host and sandbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Correlation id, present on calls and their replies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<CorrelationId>,

    pub kind: MessageKind,

    /// Command name for calls and replies, event name for events
    pub name: String,

    #[serde(default)]
    pub payload: Value,
}

impl Message {
    /// Create a call message
    pub fn call(id: CorrelationId, name: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Some(id),
            kind: MessageKind::Call,
            name: name.into(),
            payload,
        }
    }

    /// Create a successful reply
    pub fn result(id: CorrelationId, name: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Some(id),
            kind: MessageKind::Result,
            name: name.into(),
            payload,
        }
    }

    /// Create a failed reply carrying a [`RemoteError`]
    pub fn error(id: CorrelationId, name: impl Into<String>, error: RemoteError) -> Self {
        Self {
            id: Some(id),
            kind: MessageKind::Error,
            name: name.into(),
            payload: error.into_value(),
        }
    }

    /// Create an event
    pub fn event(name: impl Into<String>, payload: Value) -> Self {
        Self {
            id: None,
            kind: MessageKind::Event,
            name: name.into(),
            payload,
        }
    }

    /// Returns true for `Result` and `Error` frames
    pub fn is_reply(&self) -> bool {
        matches!(self.kind, MessageKind::Result | MessageKind::Error)
    }
}

/// An opaque frame as carried by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawMessage {
    Text(String),
    Binary(Vec<u8>),
}

impl RawMessage {
    /// Length of the frame in bytes
    pub fn len(&self) -> usize {
        match self {
            Self::Text(s) => s.len(),
            Self::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Error details reported by the sandbox when a command throws
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// Attach a machine-readable code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Read an error payload, tolerating sandboxes that send a bare string
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(s) => Self::new(s.clone()),
            other => serde_json::from_value(other.clone())
                .unwrap_or_else(|_| Self::new(other.to_string())),
        }
    }

    pub fn into_value(self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_wire_shape() {
        let msg = Message::call(7, "setContent", json!("<p>hi</p>"));
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(
            value,
            json!({"id": 7, "kind": "call", "name": "setContent", "payload": "<p>hi</p>"})
        );
    }

    #[test]
    fn test_event_omits_id() {
        let msg = Message::event(events::READY, Value::Null);
        let text = serde_json::to_string(&msg).unwrap();

        assert!(!text.contains("\"id\""));
        assert!(!msg.is_reply());
    }

    #[test]
    fn test_missing_payload_defaults_to_null() {
        let msg: Message = serde_json::from_str(r#"{"kind":"event","name":"ready"}"#).unwrap();
        assert_eq!(msg.payload, Value::Null);
        assert_eq!(msg.id, None);
    }

    #[test]
    fn test_remote_error_from_bare_string() {
        let err = RemoteError::from_value(&json!("editor is gone"));
        assert_eq!(err.message, "editor is gone");
        assert_eq!(err.code, None);

        let err = RemoteError::from_value(&json!({"message": "bad", "code": "E_SCHEMA"}));
        assert_eq!(err.code.as_deref(), Some("E_SCHEMA"));
    }
}
