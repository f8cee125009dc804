//! Frame encoding
//!
//! Text frames always carry JSON and binary frames always carry MessagePack, so a
//! peer may answer in either form regardless of the codec the other side prefers.

use crate::{Message, RawMessage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur while encoding or decoding frames
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("JSON frame error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("MessagePack encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("MessagePack decode failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("Unknown wire codec: {0}")]
    UnknownCodec(String),
}

/// How outbound frames are encoded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireCodec {
    /// JSON text frames, what a WebView message handler expects
    #[default]
    Json,
    /// MessagePack binary frames
    #[serde(alias = "msgpack")]
    MessagePack,
}

impl WireCodec {
    /// Encode a message into a transport frame
    pub fn encode(&self, message: &Message) -> Result<RawMessage, CodecError> {
        match self {
            Self::Json => Ok(RawMessage::Text(serde_json::to_string(message)?)),
            // Named encoding keeps optional fields addressable by key.
            Self::MessagePack => Ok(RawMessage::Binary(rmp_serde::to_vec_named(message)?)),
        }
    }

    /// Decode a transport frame, dispatching on the frame type
    pub fn decode(raw: &RawMessage) -> Result<Message, CodecError> {
        match raw {
            RawMessage::Text(text) => Ok(serde_json::from_str(text)?),
            RawMessage::Binary(bytes) => Ok(rmp_serde::from_slice(bytes)?),
        }
    }
}

impl fmt::Display for WireCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => f.write_str("json"),
            Self::MessagePack => f.write_str("messagepack"),
        }
    }
}

impl FromStr for WireCodec {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "messagepack" | "msgpack" => Ok(Self::MessagePack),
            other => Err(CodecError::UnknownCodec(other.to_string())),
        }
    }
}
