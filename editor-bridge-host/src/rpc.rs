//! Call/response and event layer over a [`MessageChannel`]
//!
//! Calls are correlated by id, never by arrival order. Until the sandbox sends
//! `ready`, outbound frames wait in a FIFO outbox and are flushed in issuance
//! order once it does. Every registered call is resolved exactly once: by its
//! reply, its timeout, a channel reset, or teardown.
//!
//! ```text
//!   call() ──► pending[id] ──► ready? ──yes──► transport.send
//!                                 │
//!                                 no ──► outbox ──(ready event)──► flush in order
//!
//!   inbound ──► decode ──► result/error ──► pending.remove(id) ──► caller
//!                      └─► event ──► ready / user handlers
//! ```

use crate::channel::{self, MessageChannel, Transport};
use crate::error::BridgeError;
use editor_bridge_api::{
    events, CorrelationId, Message, MessageKind, RawMessage, RemoteError, Value, WireCodec,
    PROTOCOL_VERSION,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Handler for sandbox-originated events
pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Identifies an event subscription for [`RpcLayer::off_event`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Reply = Result<Value, BridgeError>;

/// Events held back before readiness; the oldest is dropped beyond this
pub const MAX_QUEUED_EVENTS: usize = 256;

/// Readiness of the current link to the sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No channel attached (never, or the sandbox went away)
    Detached,
    /// Channel attached, waiting for `ready`
    Booting,
    Ready,
    Destroyed,
}

struct PendingCall {
    command: String,
    created_at: Instant,
    reply: oneshot::Sender<Reply>,
    /// Present while the call sits in the outbox
    dispatched: Option<oneshot::Sender<()>>,
}

struct Outgoing {
    id: Option<CorrelationId>,
    message: Message,
}

struct RpcState {
    next_id: CorrelationId,
    next_subscription: u64,
    generation: u64,
    link: LinkState,
    /// A queued call outlived the boot timeout on the current link
    boot_expired: bool,
    transport: Option<Arc<dyn Transport>>,
    reader: Option<JoinHandle<()>>,
    pending: HashMap<CorrelationId, PendingCall>,
    outbox: VecDeque<Outgoing>,
    handlers: HashMap<String, Vec<(SubscriptionId, EventHandler)>>,
}

/// RPC layer owning the pending-call table and the outbox
#[derive(Clone)]
pub struct RpcLayer {
    inner: Arc<Mutex<RpcState>>,
    codec: WireCodec,
    boot_timeout: Duration,
}

impl RpcLayer {
    pub fn new(codec: WireCodec, boot_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RpcState {
                next_id: 1,
                next_subscription: 1,
                generation: 0,
                link: LinkState::Detached,
                boot_expired: false,
                transport: None,
                reader: None,
                pending: HashMap::new(),
                outbox: VecDeque::new(),
                handlers: HashMap::new(),
            })),
            codec,
            boot_timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RpcState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn link_state(&self) -> LinkState {
        self.lock().link
    }

    /// Number of calls awaiting a reply, queued ones included
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Attach a channel, replacing the current one if any
    ///
    /// Replacing a channel fails every outstanding call with
    /// [`BridgeError::ChannelReset`]. Calls queued while no channel was attached
    /// are kept and flushed once the new sandbox is ready. Must be called from
    /// within a tokio runtime.
    pub fn attach(&self, channel: MessageChannel) -> Result<(), BridgeError> {
        let MessageChannel { transport, inbound } = channel;
        let transport: Arc<dyn Transport> = Arc::from(transport);

        let mut state = self.lock();
        if state.link == LinkState::Destroyed {
            transport.close();
            return Err(BridgeError::Destroyed);
        }

        if let Some(old) = state.transport.take() {
            tracing::info!(generation = state.generation, "Replacing sandbox channel");
            old.close();
            fail_all(&mut state, || BridgeError::ChannelReset);
        }
        if let Some(reader) = state.reader.take() {
            reader.abort();
        }

        state.generation += 1;
        let generation = state.generation;
        state.link = LinkState::Booting;
        state.boot_expired = false;
        state.transport = Some(transport);

        let on_frame = self.clone();
        let on_closed = self.clone();
        state.reader = Some(channel::on_receive(
            inbound,
            move |raw| on_frame.handle_raw(generation, raw),
            move || on_closed.handle_disconnect(generation),
        ));

        tracing::info!(generation, queued = state.outbox.len(), "Sandbox channel attached");
        Ok(())
    }

    /// Mark the sandbox as reloading in place on the current channel
    ///
    /// Outstanding calls fail with [`BridgeError::ChannelReset`]; new calls
    /// queue until the reloaded sandbox sends `ready`.
    pub fn begin_reload(&self) {
        let mut state = self.lock();
        if matches!(state.link, LinkState::Destroyed | LinkState::Detached) {
            return;
        }
        tracing::info!(generation = state.generation, "Sandbox reloading");
        fail_all(&mut state, || BridgeError::ChannelReset);
        state.link = LinkState::Booting;
        state.boot_expired = false;
    }

    /// Send a call and wait for its reply
    pub async fn call(
        &self,
        name: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, BridgeError> {
        let (id, mut reply_rx, dispatched_rx) = self.register_call(name, payload)?;
        let _guard = PendingGuard { rpc: self, id };

        if let Some(dispatched_rx) = dispatched_rx {
            tokio::select! {
                biased;
                reply = &mut reply_rx => return flatten(reply),
                sent = tokio::time::timeout(self.boot_timeout, dispatched_rx) => {
                    if sent.is_err() && self.remove_pending(id).is_some() {
                        tracing::warn!(id, command = name, "Sandbox did not become ready in time");
                        self.lock().boot_expired = true;
                        return Err(BridgeError::BridgeNotReady);
                    }
                }
            }
        }

        match tokio::time::timeout(timeout, &mut reply_rx).await {
            Ok(reply) => flatten(reply),
            Err(_) => match self.remove_pending(id) {
                Some(call) => {
                    tracing::warn!(
                        id,
                        command = %call.command,
                        waited = ?call.created_at.elapsed(),
                        "Call timed out"
                    );
                    Err(BridgeError::Timeout {
                        id,
                        command: name.to_string(),
                        after: timeout,
                    })
                }
                // Resolved between the timer firing and the removal.
                None => flatten(reply_rx.try_recv().map_err(|_| ())),
            },
        }
    }

    fn register_call(
        &self,
        name: &str,
        payload: Value,
    ) -> Result<(CorrelationId, oneshot::Receiver<Reply>, Option<oneshot::Receiver<()>>), BridgeError>
    {
        let mut state = self.lock();
        match state.link {
            LinkState::Destroyed => return Err(BridgeError::Destroyed),
            LinkState::Booting if state.boot_expired => return Err(BridgeError::BridgeNotReady),
            _ => {}
        }

        let id = state.next_id;
        state.next_id += 1;
        let message = Message::call(id, name, payload);
        let (reply_tx, reply_rx) = oneshot::channel();

        if state.link == LinkState::Ready {
            let raw = self.codec.encode(&message)?;
            send_raw(&state, raw)?;
            tracing::debug!(id, command = name, "Call sent");
            state.pending.insert(
                id,
                PendingCall {
                    command: name.to_string(),
                    created_at: Instant::now(),
                    reply: reply_tx,
                    dispatched: None,
                },
            );
            return Ok((id, reply_rx, None));
        }

        let (dispatched_tx, dispatched_rx) = oneshot::channel();
        state.pending.insert(
            id,
            PendingCall {
                command: name.to_string(),
                created_at: Instant::now(),
                reply: reply_tx,
                dispatched: Some(dispatched_tx),
            },
        );
        state.outbox.push_back(Outgoing {
            id: Some(id),
            message,
        });
        tracing::debug!(id, command = name, queued = state.outbox.len(), "Call queued until ready");
        Ok((id, reply_rx, Some(dispatched_rx)))
    }

    /// Send a fire-and-forget event to the sandbox
    ///
    /// Events published before readiness are queued with the calls, keeping
    /// their relative order. At most [`MAX_QUEUED_EVENTS`] are held; older
    /// ones are dropped first.
    pub fn publish(&self, name: &str, payload: Value) -> Result<(), BridgeError> {
        let mut state = self.lock();
        let message = Message::event(name, payload);
        match state.link {
            LinkState::Destroyed => Err(BridgeError::Destroyed),
            LinkState::Ready => {
                let raw = self.codec.encode(&message)?;
                send_raw(&state, raw)
            }
            LinkState::Booting | LinkState::Detached => {
                let queued = state.outbox.iter().filter(|out| out.id.is_none()).count();
                if queued >= MAX_QUEUED_EVENTS {
                    if let Some(oldest) = state.outbox.iter().position(|out| out.id.is_none()) {
                        if let Some(dropped) = state.outbox.remove(oldest) {
                            tracing::warn!(event = %dropped.message.name, "Event queue full, dropping oldest");
                        }
                    }
                }
                state.outbox.push_back(Outgoing { id: None, message });
                Ok(())
            }
        }
    }

    /// Subscribe to a sandbox-originated event
    pub fn on_event(
        &self,
        name: impl Into<String>,
        handler: impl Fn(&Value) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let mut state = self.lock();
        let id = SubscriptionId(state.next_subscription);
        state.next_subscription += 1;
        state
            .handlers
            .entry(name.into())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove an event subscription; returns false if it was not registered
    pub fn off_event(&self, subscription: SubscriptionId) -> bool {
        let mut state = self.lock();
        let mut removed = false;
        for handlers in state.handlers.values_mut() {
            let before = handlers.len();
            handlers.retain(|(id, _)| *id != subscription);
            removed |= handlers.len() != before;
        }
        state.handlers.retain(|_, handlers| !handlers.is_empty());
        removed
    }

    /// Tear down: reject every pending call, close the channel, drop handlers
    ///
    /// Idempotent.
    pub fn destroy(&self) {
        let mut state = self.lock();
        if state.link == LinkState::Destroyed {
            return;
        }
        state.link = LinkState::Destroyed;

        let failed = fail_all(&mut state, || BridgeError::Destroyed);
        state.handlers.clear();
        if let Some(transport) = state.transport.take() {
            transport.close();
        }
        if let Some(reader) = state.reader.take() {
            reader.abort();
        }
        tracing::info!(failed, "Bridge destroyed");
    }

    fn remove_pending(&self, id: CorrelationId) -> Option<PendingCall> {
        let mut state = self.lock();
        let call = state.pending.remove(&id);
        if call.is_some() {
            state.outbox.retain(|out| out.id != Some(id));
        }
        call
    }

    fn handle_raw(&self, generation: u64, raw: RawMessage) {
        let message = match WireCodec::decode(&raw) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(generation, len = raw.len(), error = %e, "Dropping malformed frame");
                return;
            }
        };

        let handlers = {
            let mut state = self.lock();
            if state.generation != generation || state.link == LinkState::Destroyed {
                tracing::debug!(generation, "Dropping frame from a replaced channel");
                return;
            }

            let kind = message.kind;
            match kind {
                MessageKind::Result | MessageKind::Error => {
                    self.resolve(&mut state, message);
                    return;
                }
                MessageKind::Call => {
                    self.refuse_call(&state, &message);
                    return;
                }
                MessageKind::Event => {
                    if message.name == events::READY {
                        self.mark_ready(&mut state, &message.payload);
                    }
                    state.handlers.get(&message.name).cloned().unwrap_or_default()
                }
            }
        };

        tracing::debug!(event = %message.name, subscribers = handlers.len(), "Event received");
        for (_, handler) in handlers {
            handler(&message.payload);
        }
    }

    fn resolve(&self, state: &mut RpcState, message: Message) {
        let Some(id) = message.id else {
            tracing::warn!(name = %message.name, "Dropping reply without correlation id");
            return;
        };
        let Some(call) = state.pending.remove(&id) else {
            tracing::debug!(id, name = %message.name, "Dropping unmatched reply");
            return;
        };

        let reply = match message.kind {
            MessageKind::Error => {
                let remote = RemoteError::from_value(&message.payload);
                Err(BridgeError::Remote {
                    command: call.command,
                    message: remote.message,
                    code: remote.code,
                })
            }
            _ => Ok(message.payload),
        };
        tracing::debug!(id, ok = reply.is_ok(), "Call resolved");
        // The caller may have gone away; nothing to deliver then.
        let _ = call.reply.send(reply);
    }

    fn refuse_call(&self, state: &RpcState, message: &Message) {
        tracing::warn!(name = %message.name, "Sandbox attempted a call; the host exposes none");
        let Some(id) = message.id else { return };
        let reply = Message::error(
            id,
            message.name.clone(),
            RemoteError::new("host does not accept calls").with_code("E_UNSUPPORTED"),
        );
        if let Ok(raw) = self.codec.encode(&reply) {
            let _ = send_raw(state, raw);
        }
    }

    fn mark_ready(&self, state: &mut RpcState, payload: &Value) {
        if let Some(version) = payload.get("version").and_then(Value::as_u64) {
            if version != u64::from(PROTOCOL_VERSION) {
                tracing::warn!(version, expected = PROTOCOL_VERSION, "Sandbox protocol version differs");
            }
        }

        if state.link == LinkState::Ready {
            // A second `ready` means the page reloaded underneath us.
            tracing::info!(generation = state.generation, "Sandbox reloaded in place");
            fail_all(state, || BridgeError::ChannelReset);
        }
        state.link = LinkState::Ready;
        state.boot_expired = false;

        let queued = state.outbox.len();
        while let Some(out) = state.outbox.pop_front() {
            let sent = self
                .codec
                .encode(&out.message)
                .map_err(BridgeError::from)
                .and_then(|raw| send_raw(state, raw));

            let Some(id) = out.id else {
                if let Err(e) = sent {
                    tracing::warn!(event = %out.message.name, error = %e, "Dropping queued event");
                }
                continue;
            };
            match sent {
                Ok(()) => {
                    if let Some(dispatched) =
                        state.pending.get_mut(&id).and_then(|c| c.dispatched.take())
                    {
                        let _ = dispatched.send(());
                    }
                }
                Err(e) => {
                    if let Some(call) = state.pending.remove(&id) {
                        let _ = call.reply.send(Err(e));
                    }
                }
            }
        }
        tracing::info!(generation = state.generation, flushed = queued, "Sandbox ready");
    }

    fn handle_disconnect(&self, generation: u64) {
        let mut state = self.lock();
        if state.generation != generation || state.link == LinkState::Destroyed {
            return;
        }
        tracing::warn!(generation, "Sandbox closed the channel");
        fail_all(&mut state, || BridgeError::ChannelReset);
        if let Some(transport) = state.transport.take() {
            transport.close();
        }
        state.reader = None;
        state.link = LinkState::Detached;
        state.boot_expired = false;
    }
}

/// Removes a call's bookkeeping when its caller stops waiting
struct PendingGuard<'a> {
    rpc: &'a RpcLayer,
    id: CorrelationId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.rpc.remove_pending(self.id);
    }
}

fn send_raw(state: &RpcState, raw: RawMessage) -> Result<(), BridgeError> {
    let transport = state.transport.as_ref().ok_or(BridgeError::ChannelReset)?;
    transport.send(raw).map_err(|e| {
        tracing::warn!(error = %e, "Transport rejected frame");
        BridgeError::ChannelReset
    })
}

/// Resolve every pending call with the given error and empty the outbox
fn fail_all(state: &mut RpcState, error: impl Fn() -> BridgeError) -> usize {
    state.outbox.clear();
    let failed = state.pending.len();
    for (_, call) in state.pending.drain() {
        let _ = call.reply.send(Err(error()));
    }
    failed
}

fn flatten<E>(reply: Result<Reply, E>) -> Reply {
    reply.unwrap_or(Err(BridgeError::ChannelReset))
}
