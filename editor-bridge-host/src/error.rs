//! Bridge error types
//!
//! Every failure a caller can observe is a [`BridgeError`] returned from the
//! call that was affected. Nothing in the bridge panics on sandbox misbehavior.

use editor_bridge_api::{CodecError, CorrelationId};
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the bridge to the call site
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Two descriptors registered the same command name
    #[error("Duplicate command: {0}")]
    DuplicateCommand(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// Arguments were rejected before anything was sent
    #[error("Invalid argument for {command}: {reason}")]
    InvalidArgument { command: String, reason: String },

    #[error("Call {id} ({command}) timed out after {after:?}")]
    Timeout {
        id: CorrelationId,
        command: String,
        after: Duration,
    },

    /// The sandbox reloaded, crashed or the channel was replaced
    #[error("Channel was reset before the call completed")]
    ChannelReset,

    /// The sandbox never announced readiness within the boot timeout
    #[error("Editor sandbox is not ready")]
    BridgeNotReady,

    #[error("Bridge has been destroyed")]
    Destroyed,

    /// The sandbox reported a failure while running the command
    #[error("Sandbox failed to run {command}: {message}")]
    Remote {
        command: String,
        message: String,
        code: Option<String>,
    },

    /// The reply did not have the shape the command declares
    #[error("Unexpected result for {command}: {reason}")]
    InvalidResult { command: String, reason: String },

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

impl BridgeError {
    pub(crate) fn invalid_argument(command: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            command: command.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_result(command: &str, reason: impl Into<String>) -> Self {
        Self::InvalidResult {
            command: command.to_string(),
            reason: reason.into(),
        }
    }

    /// Check if the failure happened locally, before any round trip
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::DuplicateCommand(_) | Self::UnknownCommand(_) | Self::InvalidArgument { .. }
        )
    }

    /// Check if the failure comes from the channel or sandbox lifecycle
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::ChannelReset | Self::BridgeNotReady | Self::Destroyed | Self::Timeout { .. }
        )
    }
}

/// Errors raised by a transport
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Channel is closed")]
    Closed,

    #[error("Transport failure: {0}")]
    Transport(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(BridgeError::UnknownCommand("x".into()).is_local());
        assert!(BridgeError::invalid_argument("x", "bad").is_local());
        assert!(!BridgeError::ChannelReset.is_local());

        assert!(BridgeError::Destroyed.is_lifecycle());
        assert!(!BridgeError::DuplicateCommand("x".into()).is_lifecycle());
    }

    #[test]
    fn test_timeout_message() {
        let err = BridgeError::Timeout {
            id: 4,
            command: "getContent".into(),
            after: Duration::from_millis(250),
        };
        assert_eq!(err.to_string(), "Call 4 (getContent) timed out after 250ms");
    }
}
