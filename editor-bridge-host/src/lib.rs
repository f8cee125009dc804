//! editor-bridge-host: drive a sandboxed rich-text editor from native code
//!
//! The editor runs in an isolated sandbox and only speaks through a message
//! channel. This crate provides the host side of that channel:
//!
//! - [`channel`]: the transport abstraction and an in-memory pair
//! - [`rpc`]: correlated calls, readiness gating, events
//! - [`registry`]: typed command descriptors and argument validation
//! - [`state`]: the host-side mirror of the editor state
//! - [`extension`] and [`kit`]: pluggable bundles and the built-in set
//! - [`bridge`]: the [`EditorBridge`] facade composing all of the above
//!
//! ```ignore
//! let bridge = EditorBridge::builder()
//!     .config(BridgeConfig::from_env().initial_content("<p>Hello</p>"))
//!     .extensions(kit::start_kit())
//!     .extension(kit::counter())
//!     .build()?;
//!
//! bridge.attach(channel)?;
//! bridge.focus().await?;
//! let words: Option<u64> = bridge.state().snapshot().and_then(|s| s.get_as("wordCount"));
//! ```

pub mod bridge;
pub mod channel;
pub mod config;
pub mod error;
pub mod extension;
pub mod kit;
pub mod registry;
pub mod rpc;
pub mod state;
#[cfg(feature = "subscriber")]
pub mod tracing_support;
pub mod watcher;

pub use bridge::{EditorBridge, EditorBridgeBuilder, FocusPosition};
pub use channel::{MessageChannel, SandboxEnd, Transport};
pub use config::BridgeConfig;
pub use error::{BridgeError, ChannelError};
pub use extension::{BootBundle, BridgeExtension, SandboxInit};
pub use registry::{CommandArgs, CommandDescriptor, CommandRegistry, CommandRegistryBuilder};
pub use rpc::{LinkState, RpcLayer, SubscriptionId, MAX_QUEUED_EVENTS};
pub use state::{MirrorState, StateError, StateMirror, StateReceiver, StateSnapshot};
pub use watcher::{DevReloadWatcher, ReloadNotice, WatcherConfig, WatcherError};

pub use editor_bridge_api::{
    ArgKind, ArgSpec, CommandSpec, Message, MessageKind, RawMessage, RemoteError, ResultKind,
    Value, WireCodec,
};
