//! Message channel between host and sandbox
//!
//! The outbound half is any [`Transport`]; the inbound half is a stream of raw
//! frames read by a single receiver task. Frames are delivered in order within
//! one direction and never interpreted here.

use crate::error::ChannelError;
use editor_bridge_api::RawMessage;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Inbound half of a channel
pub type Inbound = mpsc::UnboundedReceiver<RawMessage>;

/// Outbound half of a channel
///
/// Implementations must be non-blocking: `send` is called from the bridge's
/// dispatch path and must only enqueue the frame.
pub trait Transport: Send + Sync + 'static {
    /// Enqueue a frame for the sandbox
    fn send(&self, raw: RawMessage) -> Result<(), ChannelError>;

    /// Stop delivering frames to the sandbox
    fn close(&self) {}
}

/// One attachment of the host to a sandbox instance
pub struct MessageChannel {
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) inbound: Inbound,
}

impl MessageChannel {
    /// Create a channel from a transport and the receiver its frames arrive on
    pub fn new(transport: impl Transport, inbound: Inbound) -> Self {
        Self {
            transport: Box::new(transport),
            inbound,
        }
    }

    /// Create a connected in-memory pair
    ///
    /// The returned [`SandboxEnd`] is what the sandbox side (usually an
    /// `editor-bridge-sdk` peer) reads from and writes to.
    pub fn in_memory() -> (Self, SandboxEnd) {
        let (to_sandbox_tx, to_sandbox_rx) = mpsc::unbounded_channel();
        let (to_host_tx, to_host_rx) = mpsc::unbounded_channel();

        let channel = Self::new(
            MemoryTransport {
                tx: Mutex::new(Some(to_sandbox_tx)),
            },
            to_host_rx,
        );
        let sandbox = SandboxEnd {
            outbound: to_host_tx,
            inbound: to_sandbox_rx,
        };
        (channel, sandbox)
    }
}

/// Sandbox-side ends of an in-memory channel
pub struct SandboxEnd {
    /// Frames sent here arrive at the host
    pub outbound: mpsc::UnboundedSender<RawMessage>,
    /// Frames the host sent
    pub inbound: mpsc::UnboundedReceiver<RawMessage>,
}

/// Transport backed by a tokio unbounded channel
pub struct MemoryTransport {
    tx: Mutex<Option<mpsc::UnboundedSender<RawMessage>>>,
}

impl Transport for MemoryTransport {
    fn send(&self, raw: RawMessage) -> Result<(), ChannelError> {
        let guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(tx) => tx.send(raw).map_err(|_| ChannelError::Closed),
            None => Err(ChannelError::Closed),
        }
    }

    fn close(&self) {
        // Dropping the sender ends the sandbox's receive loop.
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}

/// Spawn the receiver task for a channel
///
/// `handler` sees every frame in arrival order; `on_closed` runs once after the
/// sandbox drops its sending half.
pub(crate) fn on_receive<H, C>(mut inbound: Inbound, mut handler: H, on_closed: C) -> JoinHandle<()>
where
    H: FnMut(RawMessage) + Send + 'static,
    C: FnOnce() + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(raw) = inbound.recv().await {
            handler(raw);
        }
        on_closed();
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_pair_is_fifo() {
        let (channel, mut sandbox) = MessageChannel::in_memory();

        for i in 0..3 {
            channel
                .transport
                .send(RawMessage::Text(i.to_string()))
                .unwrap();
        }

        for i in 0..3 {
            assert_eq!(
                sandbox.inbound.recv().await,
                Some(RawMessage::Text(i.to_string()))
            );
        }
    }

    #[tokio::test]
    async fn test_close_ends_sandbox_stream() {
        let (channel, mut sandbox) = MessageChannel::in_memory();

        channel.transport.close();

        assert!(sandbox.inbound.recv().await.is_none());
        assert!(matches!(
            channel.transport.send(RawMessage::Text("late".into())),
            Err(ChannelError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_on_receive_reports_close() {
        let (channel, sandbox) = MessageChannel::in_memory();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = tokio::sync::oneshot::channel();

        let task = on_receive(
            channel.inbound,
            move |raw| {
                let _ = seen_tx.send(raw);
            },
            move || {
                let _ = closed_tx.send(());
            },
        );

        sandbox.outbound.send(RawMessage::Binary(vec![1, 2])).unwrap();
        drop(sandbox);

        assert_eq!(seen_rx.recv().await, Some(RawMessage::Binary(vec![1, 2])));
        closed_rx.await.unwrap();
        task.await.unwrap();
    }
}
