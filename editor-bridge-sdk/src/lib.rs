//! editor-bridge-sdk: the sandbox side of the editor bridge
//!
//! A [`SandboxPeer`] answers the host's calls with registered handlers and
//! pushes events (`ready`, `stateUpdate`, custom ones) through an [`Emitter`].
//! It is what a native test harness or a non-browser sandbox uses in place of
//! the in-page editor runtime.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use editor_bridge_sdk::prelude::*;
//!
//! let peer = SandboxPeer::new(sandbox.outbound, sandbox.inbound, WireCodec::Json);
//! let emitter = peer.emitter();
//!
//! peer.handle("getText", |_payload| async { Ok(json!("Hello")) })
//!     .handle("focus", move |_payload| {
//!         let emitter = emitter.clone();
//!         async move {
//!             emitter.state(json!({"isFocused": true}))?;
//!             Ok(Value::Null)
//!         }
//!     })
//!     .run()
//!     .await?;
//! ```

use async_trait::async_trait;
use editor_bridge_api::{
    events, CodecError, Message, MessageKind, RawMessage, RemoteError, WireCodec, PROTOCOL_VERSION,
};
use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;

pub use anyhow;
pub use editor_bridge_api::{self as api, Value};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{CommandFailure, CommandHandler, Emitter, PeerError, SandboxPeer};
    pub use editor_bridge_api::{events, fields, Value, WireCodec};
    pub use serde_json::json;
}

/// Handles one command on the sandbox side
#[async_trait]
pub trait CommandHandler: Send + Sync + 'static {
    async fn handle(&self, payload: Value) -> anyhow::Result<Value>;
}

/// Adapts an async closure to [`CommandHandler`]
struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> CommandHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn handle(&self, payload: Value) -> anyhow::Result<Value> {
        (self.0)(payload).await
    }
}

/// Handler error carrying a machine-readable code back to the host
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct CommandFailure {
    pub message: String,
    pub code: String,
}

impl CommandFailure {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: code.into(),
        }
    }
}

/// Errors raised by the peer itself
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Host closed the channel")]
    Closed,
}

type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Sends frames to the host; cheap to clone into handlers
#[derive(Clone)]
pub struct Emitter {
    outbound: mpsc::UnboundedSender<RawMessage>,
    codec: WireCodec,
}

impl Emitter {
    /// Announce that the editor has booted
    pub fn ready(&self) -> Result<(), PeerError> {
        self.emit(events::READY, json!({ "version": PROTOCOL_VERSION }))
    }

    /// Push a full state snapshot
    pub fn state(&self, snapshot: Value) -> Result<(), PeerError> {
        self.emit(events::STATE_UPDATE, snapshot)
    }

    /// Push any event
    pub fn emit(&self, name: &str, payload: Value) -> Result<(), PeerError> {
        self.send(&Message::event(name, payload))
    }

    fn send(&self, message: &Message) -> Result<(), PeerError> {
        let raw = self.codec.encode(message)?;
        self.outbound.send(raw).map_err(|_| PeerError::Closed)
    }
}

/// Sandbox-side endpoint of a bridge channel
pub struct SandboxPeer {
    inbound: mpsc::UnboundedReceiver<RawMessage>,
    emitter: Emitter,
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
    events: HashMap<String, Vec<EventHandler>>,
    announce_ready: bool,
}

impl SandboxPeer {
    /// Create a peer from the sandbox ends of a channel
    ///
    /// `codec` selects the encoding of frames this peer sends; inbound frames
    /// are decoded by their frame type.
    pub fn new(
        outbound: mpsc::UnboundedSender<RawMessage>,
        inbound: mpsc::UnboundedReceiver<RawMessage>,
        codec: WireCodec,
    ) -> Self {
        Self {
            inbound,
            emitter: Emitter { outbound, codec },
            handlers: HashMap::new(),
            events: HashMap::new(),
            announce_ready: true,
        }
    }

    /// Register an async closure as the handler for a command
    pub fn handle<F, Fut>(self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.handler(name, FnHandler(handler))
    }

    /// Register a [`CommandHandler`] implementation for a command
    pub fn handler(mut self, name: impl Into<String>, handler: impl CommandHandler) -> Self {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    /// Register a handler for a host-originated event
    pub fn on_event(
        mut self,
        name: impl Into<String>,
        handler: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Self {
        self.events
            .entry(name.into())
            .or_default()
            .push(Arc::new(handler));
        self
    }

    /// Do not send `ready` when `run` starts; the caller announces it
    pub fn manual_ready(mut self) -> Self {
        self.announce_ready = false;
        self
    }

    pub fn emitter(&self) -> Emitter {
        self.emitter.clone()
    }

    /// Serve the host until it closes the channel
    ///
    /// Calls are handled one at a time in arrival order, like the single
    /// threaded editor runtime this stands in for.
    pub async fn run(self) -> Result<(), PeerError> {
        let Self {
            mut inbound,
            emitter,
            handlers,
            events,
            announce_ready,
        } = self;

        if announce_ready {
            emitter.ready()?;
        }
        tracing::debug!(commands = handlers.len(), "Sandbox peer running");

        while let Some(raw) = inbound.recv().await {
            let message = match WireCodec::decode(&raw) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping malformed frame from host");
                    continue;
                }
            };

            match message.kind {
                MessageKind::Call => {
                    let Some(id) = message.id else {
                        tracing::warn!(command = %message.name, "Call without correlation id");
                        continue;
                    };
                    let reply = match handlers.get(&message.name) {
                        Some(handler) => match handler.handle(message.payload).await {
                            Ok(value) => Message::result(id, message.name, value),
                            Err(e) => Message::error(id, message.name, to_remote(&e)),
                        },
                        None => {
                            let remote = RemoteError::new(format!("unknown command `{}`", message.name))
                                .with_code("E_UNKNOWN_COMMAND");
                            Message::error(id, message.name, remote)
                        }
                    };
                    match emitter.send(&reply) {
                        Ok(()) => {}
                        Err(PeerError::Closed) => break,
                        Err(e) => tracing::warn!(error = %e, "Failed to encode reply"),
                    }
                }
                MessageKind::Event => {
                    for handler in events.get(&message.name).into_iter().flatten() {
                        handler(&message.payload);
                    }
                }
                MessageKind::Result | MessageKind::Error => {
                    tracing::debug!(name = %message.name, "Ignoring reply; the peer makes no calls");
                }
            }
        }

        tracing::debug!("Host closed the channel");
        Ok(())
    }
}

fn to_remote(error: &anyhow::Error) -> RemoteError {
    match error.downcast_ref::<CommandFailure>() {
        Some(failure) => RemoteError::new(failure.message.clone()).with_code(failure.code.clone()),
        None => RemoteError::new(format!("{:#}", error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl CommandHandler for Echo {
        async fn handle(&self, payload: Value) -> anyhow::Result<Value> {
            Ok(payload)
        }
    }

    fn pair() -> (
        SandboxPeer,
        mpsc::UnboundedSender<RawMessage>,
        mpsc::UnboundedReceiver<RawMessage>,
    ) {
        let (to_peer_tx, to_peer_rx) = mpsc::unbounded_channel();
        let (to_host_tx, to_host_rx) = mpsc::unbounded_channel();
        let peer = SandboxPeer::new(to_host_tx, to_peer_rx, WireCodec::Json);
        (peer, to_peer_tx, to_host_rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<RawMessage>) -> Message {
        WireCodec::decode(&rx.recv().await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_announces_ready_and_answers_calls() {
        let (peer, host_tx, mut host_rx) = pair();
        let task = tokio::spawn(
            peer.handler("echo", Echo)
                .handle("fail", |_| async {
                    Err(anyhow::Error::new(CommandFailure::new(
                        "E_SELECTION",
                        "nothing selected",
                    )))
                })
                .run(),
        );

        let ready = next(&mut host_rx).await;
        assert_eq!(ready.name, events::READY);
        assert_eq!(ready.payload["version"], json!(PROTOCOL_VERSION));

        let call = Message::call(1, "echo", json!({"a": 1}));
        host_tx.send(WireCodec::Json.encode(&call).unwrap()).unwrap();
        let reply = next(&mut host_rx).await;
        assert_eq!(reply.kind, MessageKind::Result);
        assert_eq!(reply.id, Some(1));
        assert_eq!(reply.payload, json!({"a": 1}));

        let call = Message::call(2, "fail", Value::Null);
        host_tx.send(WireCodec::Json.encode(&call).unwrap()).unwrap();
        let reply = next(&mut host_rx).await;
        assert_eq!(reply.kind, MessageKind::Error);
        let remote = RemoteError::from_value(&reply.payload);
        assert_eq!(remote.message, "nothing selected");
        assert_eq!(remote.code.as_deref(), Some("E_SELECTION"));

        drop(host_tx);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unknown_command_gets_error_reply() {
        let (peer, host_tx, mut host_rx) = pair();
        let task = tokio::spawn(peer.manual_ready().run());

        let call = Message::call(7, "missing", Value::Null);
        host_tx
            .send(WireCodec::MessagePack.encode(&call).unwrap())
            .unwrap();
        let reply = next(&mut host_rx).await;
        assert_eq!(reply.kind, MessageKind::Error);
        assert_eq!(reply.id, Some(7));

        drop(host_tx);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_host_events_reach_handlers() {
        let (peer, host_tx, _host_rx) = pair();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(
            peer.on_event(events::CONTENT_UPDATE, move |payload| {
                let _ = seen_tx.send(payload.clone());
            })
            .run(),
        );

        let event = Message::event(events::CONTENT_UPDATE, json!("<p>x</p>"));
        host_tx.send(WireCodec::Json.encode(&event).unwrap()).unwrap();
        assert_eq!(seen_rx.recv().await, Some(json!("<p>x</p>")));

        drop(host_tx);
        task.await.unwrap().unwrap();
    }
}
