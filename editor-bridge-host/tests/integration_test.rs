//! Integration tests for channel lifecycle: resets, reloads and readiness

use editor_bridge_api::{events, Message, MessageKind, RawMessage, WireCodec};
use editor_bridge_host::{
    kit, BridgeConfig, BridgeError, EditorBridge, LinkState, MessageChannel, SandboxEnd,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn bridge(config: BridgeConfig) -> EditorBridge {
    EditorBridge::builder()
        .config(config)
        .extensions(kit::start_kit())
        .build()
        .expect("kit builds")
}

fn send(sandbox: &SandboxEnd, message: Message) {
    let raw = WireCodec::Json.encode(&message).unwrap();
    sandbox.outbound.send(raw).unwrap();
}

fn ready(sandbox: &SandboxEnd) {
    send(sandbox, Message::event(events::READY, json!({"version": 1})));
}

async fn next_call(sandbox: &mut SandboxEnd) -> Message {
    let raw = tokio::time::timeout(Duration::from_secs(2), sandbox.inbound.recv())
        .await
        .expect("frame in time")
        .expect("channel open");
    let message = WireCodec::decode(&raw).unwrap();
    assert_eq!(message.kind, MessageKind::Call);
    message
}

fn spawn_get_text(bridge: &EditorBridge) -> tokio::task::JoinHandle<Result<String, BridgeError>> {
    let bridge = bridge.clone();
    tokio::spawn(async move { bridge.get_text().await })
}

#[tokio::test]
async fn test_reset_fails_pending_then_new_channel_serves() {
    let bridge = bridge(BridgeConfig::default());
    let (channel, mut old) = MessageChannel::in_memory();
    bridge.attach(channel).unwrap();
    ready(&old);

    let first = spawn_get_text(&bridge);
    let second = spawn_get_text(&bridge);
    next_call(&mut old).await;
    next_call(&mut old).await;

    let (channel, mut new) = MessageChannel::in_memory();
    bridge.reset_channel(channel).unwrap();

    assert!(matches!(first.await.unwrap(), Err(BridgeError::ChannelReset)));
    assert!(matches!(second.await.unwrap(), Err(BridgeError::ChannelReset)));
    assert_eq!(bridge.link_state(), LinkState::Booting);

    // The third call waits for the new sandbox's ready.
    let third = spawn_get_text(&bridge);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(new.inbound.try_recv().is_err());

    ready(&new);
    let call = next_call(&mut new).await;
    send(&new, Message::result(call.id.unwrap(), call.name, json!("fresh")));
    assert_eq!(third.await.unwrap().unwrap(), "fresh");

    // The old sandbox's channel was closed by the host.
    assert!(old.inbound.recv().await.is_none());
}

#[tokio::test]
async fn test_frames_from_replaced_channel_are_ignored() {
    let bridge = bridge(BridgeConfig::default());
    let (channel, old) = MessageChannel::in_memory();
    bridge.attach(channel).unwrap();

    let (channel, mut new) = MessageChannel::in_memory();
    bridge.attach(channel).unwrap();

    // A stale ready must not open the gate for the new channel.
    let stale = Message::event(events::READY, json!({"version": 1}));
    let _ = old.outbound.send(WireCodec::Json.encode(&stale).unwrap());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(bridge.link_state(), LinkState::Booting);

    ready(&new);
    let pending = spawn_get_text(&bridge);
    let call = next_call(&mut new).await;
    send(&new, Message::result(call.id.unwrap(), call.name, json!("")));
    assert_eq!(pending.await.unwrap().unwrap(), "");
}

#[tokio::test]
async fn test_sandbox_disconnect_detaches() {
    let bridge = bridge(BridgeConfig::default());
    let (channel, mut sandbox) = MessageChannel::in_memory();
    bridge.attach(channel).unwrap();
    ready(&sandbox);

    let pending = spawn_get_text(&bridge);
    next_call(&mut sandbox).await;
    drop(sandbox);

    assert!(matches!(pending.await.unwrap(), Err(BridgeError::ChannelReset)));
    assert_eq!(bridge.link_state(), LinkState::Detached);

    // Calls made while detached are kept for the next sandbox.
    let queued = spawn_get_text(&bridge);
    tokio::time::sleep(Duration::from_millis(20)).await;

    let (channel, mut sandbox) = MessageChannel::in_memory();
    bridge.attach(channel).unwrap();
    ready(&sandbox);
    let call = next_call(&mut sandbox).await;
    send(&sandbox, Message::result(call.id.unwrap(), call.name, json!("again")));
    assert_eq!(queued.await.unwrap().unwrap(), "again");
}

#[tokio::test]
async fn test_reload_in_place() {
    let bridge = bridge(BridgeConfig::default());
    let (channel, mut sandbox) = MessageChannel::in_memory();
    bridge.attach(channel).unwrap();
    ready(&sandbox);

    let before_reload = spawn_get_text(&bridge);
    next_call(&mut sandbox).await;

    bridge.begin_reload();
    assert!(matches!(
        before_reload.await.unwrap(),
        Err(BridgeError::ChannelReset)
    ));
    assert_eq!(bridge.link_state(), LinkState::Booting);

    let after_reload = spawn_get_text(&bridge);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(sandbox.inbound.try_recv().is_err());

    ready(&sandbox);
    let call = next_call(&mut sandbox).await;
    send(&sandbox, Message::result(call.id.unwrap(), call.name, json!("reloaded")));
    assert_eq!(after_reload.await.unwrap().unwrap(), "reloaded");
}

#[tokio::test]
async fn test_second_ready_fails_outstanding_calls() {
    let bridge = bridge(BridgeConfig::default());
    let (channel, mut sandbox) = MessageChannel::in_memory();
    bridge.attach(channel).unwrap();
    ready(&sandbox);

    let pending = spawn_get_text(&bridge);
    let stale = next_call(&mut sandbox).await;

    // The page reloaded without the host noticing.
    ready(&sandbox);
    assert!(matches!(pending.await.unwrap(), Err(BridgeError::ChannelReset)));

    // A reply for the pre-reload id is dropped.
    send(&sandbox, Message::result(stale.id.unwrap(), stale.name, json!("old")));
    assert!(bridge.is_ready());
}

#[tokio::test]
async fn test_boot_timeout() {
    let bridge = bridge(BridgeConfig::default().boot_timeout(Duration::from_millis(40)));
    let (channel, _sandbox) = MessageChannel::in_memory();
    bridge.attach(channel).unwrap();

    assert!(matches!(bridge.focus().await, Err(BridgeError::BridgeNotReady)));
    assert_eq!(bridge.link_state(), LinkState::Booting);
}

#[tokio::test]
async fn test_malformed_frames_are_dropped() {
    let bridge = bridge(BridgeConfig::default());
    let (channel, mut sandbox) = MessageChannel::in_memory();
    bridge.attach(channel).unwrap();

    sandbox
        .outbound
        .send(RawMessage::Text("{not json".into()))
        .unwrap();
    sandbox.outbound.send(RawMessage::Binary(vec![0xc1])).unwrap();
    send(&sandbox, Message::event(events::STATE_UPDATE, json!("not an object")));
    ready(&sandbox);

    let pending = spawn_get_text(&bridge);
    let call = next_call(&mut sandbox).await;
    send(&sandbox, Message::result(call.id.unwrap(), call.name, json!("ok")));
    assert_eq!(pending.await.unwrap().unwrap(), "ok");
    assert!(!bridge.state().is_initialized());
}

#[tokio::test]
async fn test_mismatched_result_kind_is_reported() {
    let bridge = bridge(BridgeConfig::default());
    let (channel, mut sandbox) = MessageChannel::in_memory();
    bridge.attach(channel).unwrap();
    ready(&sandbox);

    let pending = spawn_get_text(&bridge);
    let call = next_call(&mut sandbox).await;
    send(&sandbox, Message::result(call.id.unwrap(), call.name, json!(42)));

    assert!(matches!(
        pending.await.unwrap(),
        Err(BridgeError::InvalidResult { .. })
    ));
}

#[tokio::test]
async fn test_events_both_directions() {
    let bridge = bridge(BridgeConfig::default());
    let (channel, mut sandbox) = MessageChannel::in_memory();
    bridge.attach(channel).unwrap();

    let seen = Arc::new(Mutex::new(Vec::<Value>::new()));
    let sub = {
        let seen = seen.clone();
        bridge.on_event("selectionChange", move |payload| {
            seen.lock().unwrap().push(payload.clone());
        })
    };

    // Published before ready: held back, then delivered.
    bridge
        .publish(events::CONTENT_UPDATE, json!("<p>draft</p>"))
        .unwrap();
    ready(&sandbox);

    let raw = sandbox.inbound.recv().await.unwrap();
    let event = WireCodec::decode(&raw).unwrap();
    assert_eq!(event.kind, MessageKind::Event);
    assert_eq!(event.payload, json!("<p>draft</p>"));

    send(&sandbox, Message::event("selectionChange", json!({"from": 3, "to": 5})));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(*seen.lock().unwrap(), vec![json!({"from": 3, "to": 5})]);

    assert!(bridge.off_event(sub));
    send(&sandbox, Message::event("selectionChange", json!({})));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_dropping_last_handle_closes_channel() {
    let bridge = bridge(BridgeConfig::default());
    let (channel, mut sandbox) = MessageChannel::in_memory();
    bridge.attach(channel).unwrap();
    ready(&sandbox);

    let clone = bridge.clone();
    drop(bridge);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(sandbox.inbound.try_recv().is_err());
    assert!(clone.is_ready());

    drop(clone);
    let closed = tokio::time::timeout(Duration::from_millis(500), sandbox.inbound.recv())
        .await
        .expect("host half closed in time");
    assert!(closed.is_none());
}

#[tokio::test]
async fn test_destroy_closes_channel_and_refuses_attach() {
    let bridge = bridge(BridgeConfig::default());
    let (channel, mut sandbox) = MessageChannel::in_memory();
    bridge.attach(channel).unwrap();

    bridge.destroy();
    assert!(sandbox.inbound.recv().await.is_none());

    let (channel, _sandbox) = MessageChannel::in_memory();
    assert!(matches!(bridge.attach(channel), Err(BridgeError::Destroyed)));
    assert!(matches!(
        bridge.publish(events::CONTENT_UPDATE, Value::Null),
        Err(BridgeError::Destroyed)
    ));
}
