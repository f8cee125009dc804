//! Editor bridge facade
//!
//! [`EditorBridge`] is the object the host holds: one per editor surface,
//! cloned into every widget that needs it. It composes the extensions given at
//! construction, owns the RPC layer and the state mirror, and exposes the
//! editing commands as plain async methods.

use crate::channel::MessageChannel;
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::extension::{BootBundle, BridgeExtension};
use crate::kit::{self, commands};
use crate::registry::{CommandArgs, CommandRegistry};
use crate::rpc::{LinkState, RpcLayer, SubscriptionId};
use crate::state::{MirrorState, StateMirror, StateReceiver, StateSnapshot};
use editor_bridge_api::{events, Value};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Where `focus_at` places the cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusPosition {
    Start,
    End,
    /// Select the whole document
    All,
    Offset(u64),
}

impl FocusPosition {
    fn to_value(self) -> Value {
        match self {
            Self::Start => Value::from("start"),
            Self::End => Value::from("end"),
            Self::All => Value::from("all"),
            Self::Offset(offset) => Value::from(offset),
        }
    }
}

/// Builder composing extensions into an [`EditorBridge`]
#[derive(Debug, Default)]
pub struct EditorBridgeBuilder {
    config: BridgeConfig,
    extensions: Vec<BridgeExtension>,
}

impl EditorBridgeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Add one extension; order is kept for boot scripts and listings
    pub fn extension(mut self, extension: BridgeExtension) -> Self {
        self.extensions.push(extension);
        self
    }

    pub fn extensions(mut self, extensions: impl IntoIterator<Item = BridgeExtension>) -> Self {
        self.extensions.extend(extensions);
        self
    }

    /// Merge the extensions and create the bridge
    ///
    /// The base commands of [`kit::core`] are always installed first; an
    /// extension named [`kit::CORE`] is folded into them. Fails with
    /// [`BridgeError::DuplicateCommand`] if two extensions contribute the same
    /// command name.
    pub fn build(self) -> Result<EditorBridge, BridgeError> {
        let Self { config, extensions: added } = self;

        let mut extensions = vec![kit::core()];
        for ext in added {
            if ext.name() == kit::CORE {
                extensions[0].absorb(ext);
            } else {
                extensions.push(ext);
            }
        }

        let mut registry = CommandRegistry::builder();
        let mut field_owners: HashMap<String, String> = HashMap::new();
        for ext in &extensions {
            for spec in ext.commands() {
                registry.register(ext.name(), spec.clone())?;
            }
            for field in ext.state_fields() {
                match field_owners.get(field) {
                    Some(owner) if owner != ext.name() => {
                        tracing::debug!(field = %field, owner = %owner, also = %ext.name(), "State field declared twice");
                    }
                    Some(_) => {}
                    None => {
                        field_owners.insert(field.clone(), ext.name().to_string());
                    }
                }
            }
        }
        let registry = registry.build();

        let rpc = RpcLayer::new(config.codec, config.boot_timeout);
        let mirror = Arc::new(StateMirror::new(field_owners.keys().cloned().collect()));
        {
            let mirror = mirror.clone();
            rpc.on_event(events::STATE_UPDATE, move |payload| {
                // Rejections are logged by the mirror.
                let _ = mirror.apply(payload);
            });
        }

        let boot = BootBundle::compose(&extensions, &config);
        tracing::info!(
            extensions = extensions.len(),
            commands = registry.len(),
            fingerprint = %boot.fingerprint,
            "Editor bridge constructed"
        );

        Ok(EditorBridge {
            inner: Arc::new(BridgeInner {
                config,
                registry,
                rpc,
                mirror,
                extensions,
                field_owners,
                boot,
            }),
        })
    }
}

/// Handle to one editor bridge; clones share the same bridge
#[derive(Clone)]
pub struct EditorBridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    config: BridgeConfig,
    registry: CommandRegistry,
    rpc: RpcLayer,
    mirror: Arc<StateMirror>,
    extensions: Vec<BridgeExtension>,
    field_owners: HashMap<String, String>,
    boot: BootBundle,
}

impl Drop for BridgeInner {
    fn drop(&mut self) {
        // The reader task holds the RPC state; only teardown releases it.
        self.rpc.destroy();
        self.mirror.close();
    }
}

impl EditorBridge {
    pub fn builder() -> EditorBridgeBuilder {
        EditorBridgeBuilder::new()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Attach the channel to a freshly created sandbox
    ///
    /// Must be called within a tokio runtime.
    pub fn attach(&self, channel: MessageChannel) -> Result<(), BridgeError> {
        self.inner.rpc.attach(channel)
    }

    /// Replace the channel after the sandbox crashed or was recreated
    ///
    /// Every call outstanding on the old channel fails with
    /// [`BridgeError::ChannelReset`]; callers must re-issue.
    pub fn reset_channel(&self, channel: MessageChannel) -> Result<(), BridgeError> {
        tracing::info!("Resetting sandbox channel");
        self.inner.rpc.attach(channel)
    }

    /// The sandbox is about to reload on the current channel
    pub fn begin_reload(&self) {
        self.inner.rpc.begin_reload();
    }

    pub fn link_state(&self) -> LinkState {
        self.inner.rpc.link_state()
    }

    pub fn is_ready(&self) -> bool {
        self.link_state() == LinkState::Ready
    }

    pub fn is_destroyed(&self) -> bool {
        self.link_state() == LinkState::Destroyed
    }

    /// Tear the bridge down
    ///
    /// Closes the channel, fails every pending call with
    /// [`BridgeError::Destroyed`] and drops all listeners. Idempotent.
    pub fn destroy(&self) {
        self.inner.rpc.destroy();
        self.inner.mirror.close();
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Run any registered command with the default timeout
    pub async fn run_command(&self, name: &str, args: CommandArgs) -> Result<Value, BridgeError> {
        self.run_command_with_timeout(name, args, self.inner.config.call_timeout)
            .await
    }

    /// Run any registered command with an explicit timeout
    pub async fn run_command_with_timeout(
        &self,
        name: &str,
        args: CommandArgs,
        timeout: Duration,
    ) -> Result<Value, BridgeError> {
        if self.is_destroyed() {
            return Err(BridgeError::Destroyed);
        }
        self.inner
            .registry
            .invoke(&self.inner.rpc, name, args, timeout)
            .await
    }

    /// Run a command and deserialize its result
    pub async fn run_command_as<T: DeserializeOwned>(
        &self,
        name: &str,
        args: CommandArgs,
    ) -> Result<T, BridgeError> {
        let value = self.run_command(name, args).await?;
        serde_json::from_value(value).map_err(|e| BridgeError::invalid_result(name, e.to_string()))
    }

    pub async fn focus(&self) -> Result<(), BridgeError> {
        self.run_command(commands::FOCUS, CommandArgs::new()).await?;
        Ok(())
    }

    pub async fn focus_at(&self, position: FocusPosition) -> Result<(), BridgeError> {
        let args = CommandArgs::new().with("position", position.to_value());
        self.run_command(commands::FOCUS, args).await?;
        Ok(())
    }

    pub async fn blur(&self) -> Result<(), BridgeError> {
        self.run_command(commands::BLUR, CommandArgs::new()).await?;
        Ok(())
    }

    /// Replace the document with the given markup
    pub async fn set_content(&self, html: impl Into<String>) -> Result<(), BridgeError> {
        let args = CommandArgs::new().with("html", html.into());
        self.run_command(commands::SET_CONTENT, args).await?;
        Ok(())
    }

    /// Export the document as markup
    pub async fn get_content(&self) -> Result<String, BridgeError> {
        self.run_command_as(commands::GET_CONTENT, CommandArgs::new())
            .await
    }

    /// Export the document as plain text
    pub async fn get_text(&self) -> Result<String, BridgeError> {
        self.run_command_as(commands::GET_TEXT, CommandArgs::new())
            .await
    }

    pub async fn insert_image(&self, src: impl Into<String>) -> Result<(), BridgeError> {
        let args = CommandArgs::new().with("src", src.into());
        self.run_command(commands::SET_IMAGE, args).await?;
        Ok(())
    }

    pub async fn set_editable(&self, editable: bool) -> Result<(), BridgeError> {
        let args = CommandArgs::new().with("editable", editable);
        self.run_command(commands::SET_EDITABLE, args).await?;
        Ok(())
    }

    pub async fn set_placeholder(&self, text: impl Into<String>) -> Result<(), BridgeError> {
        let args = CommandArgs::new().with("placeholder", text.into());
        self.run_command(commands::SET_PLACEHOLDER, args).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Events and state
    // ------------------------------------------------------------------

    /// Send a fire-and-forget event to the sandbox
    pub fn publish(&self, name: &str, payload: Value) -> Result<(), BridgeError> {
        self.inner.rpc.publish(name, payload)
    }

    /// Subscribe to a sandbox event
    pub fn on_event(
        &self,
        name: impl Into<String>,
        handler: impl Fn(&Value) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.inner.rpc.on_event(name, handler)
    }

    pub fn off_event(&self, subscription: SubscriptionId) -> bool {
        self.inner.rpc.off_event(subscription)
    }

    /// Current editor state; never blocks
    pub fn state(&self) -> MirrorState {
        self.inner.mirror.current()
    }

    /// Watch the editor state (latest value only)
    pub fn subscribe_state(&self) -> StateReceiver {
        self.inner.mirror.subscribe()
    }

    /// Call `listener` synchronously on every state update
    pub fn on_state(
        &self,
        listener: impl Fn(&Arc<StateSnapshot>) + Send + Sync + 'static,
    ) -> u64 {
        self.inner.mirror.add_listener(listener)
    }

    pub fn remove_state_listener(&self, id: u64) -> bool {
        self.inner.mirror.remove_listener(id)
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// Script, style and settings the sandbox must inject at boot
    pub fn boot_bundle(&self) -> &BootBundle {
        &self.inner.boot
    }

    pub fn extensions(&self) -> &[BridgeExtension] {
        &self.inner.extensions
    }

    /// Extension that declared a state field
    pub fn state_field_owner(&self, field: &str) -> Option<&str> {
        self.inner.field_owners.get(field).map(String::as_str)
    }

    /// Registered command names, in registration order
    pub fn commands(&self) -> Vec<&str> {
        self.inner.registry.list_commands()
    }

    pub fn describe_command(&self, name: &str) -> Option<String> {
        self.inner.registry.describe(name)
    }
}

impl std::fmt::Debug for EditorBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditorBridge")
            .field("link", &self.link_state())
            .field("commands", &self.inner.registry.len())
            .field("state_version", &self.state().version())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kit;
    use editor_bridge_api::{CommandSpec, WireCodec};
    use serde_json::json;

    #[test]
    fn test_build_merges_extensions() {
        let bridge = EditorBridge::builder()
            .extensions(kit::start_kit())
            .extension(kit::counter())
            .build()
            .unwrap();

        assert!(bridge.commands().contains(&"setContent"));
        assert!(bridge.commands().contains(&"toggleBold"));
        assert_eq!(bridge.state_field_owner("wordCount"), Some(kit::COUNTER));
        assert_eq!(bridge.state_field_owner("isFocused"), Some(kit::CORE));
        assert_eq!(bridge.state_field_owner("nope"), None);
        assert_eq!(bridge.link_state(), LinkState::Detached);
        assert!(!bridge.state().is_initialized());
    }

    #[test]
    fn test_duplicate_across_extensions_fails() {
        let a = BridgeExtension::new("a").command(CommandSpec::new("run", "a"));
        let b = BridgeExtension::new("b").command(CommandSpec::new("run", "b"));

        let err = EditorBridge::builder().extension(a).extension(b).build().unwrap_err();
        assert!(matches!(err, BridgeError::DuplicateCommand(name) if name == "run"));
    }

    #[test]
    fn test_base_commands_always_present() {
        let bridge = EditorBridge::builder()
            .extension(kit::counter())
            .build()
            .unwrap();

        for name in ["focus", "blur", "setContent", "getContent", "getText"] {
            assert!(bridge.commands().contains(&name), "{}", name);
        }
        assert_eq!(bridge.extensions()[0].name(), kit::CORE);
        assert_eq!(bridge.state_field_owner("isReady"), Some(kit::CORE));
    }

    #[test]
    fn test_core_overlays_merge_into_base() {
        let bridge = EditorBridge::builder()
            .extension(kit::core())
            .extension(kit::core_with_css("p {}"))
            .build()
            .unwrap();

        let cores = bridge.extensions().iter().filter(|e| e.name() == kit::CORE).count();
        assert_eq!(cores, 1);
        assert_eq!(bridge.commands().iter().filter(|&&c| c == "focus").count(), 1);
        assert!(bridge.boot_bundle().css.contains("p {}"));
    }

    #[test]
    fn test_core_overlay_redefining_base_command_fails() {
        let overlay = BridgeExtension::new(kit::CORE)
            .command(CommandSpec::new("focus", "Something else entirely"));

        let err = EditorBridge::builder().extension(overlay).build().unwrap_err();
        assert!(matches!(err, BridgeError::DuplicateCommand(name) if name == "focus"));
    }

    #[tokio::test]
    async fn test_focus_position_is_checked_locally() {
        let bridge = EditorBridge::builder().build().unwrap();

        for position in [json!("middle"), json!(-3)] {
            let err = bridge
                .run_command("focus", CommandArgs::new().with("position", position))
                .await
                .unwrap_err();
            assert!(matches!(err, BridgeError::InvalidArgument { .. }));
        }
    }

    #[test]
    fn test_boot_bundle_reflects_config() {
        let bridge = EditorBridge::builder()
            .config(
                BridgeConfig::default()
                    .codec(WireCodec::MessagePack)
                    .placeholder("Start typing"),
            )
            .extension(kit::core_with_css("* { font-family: 'Rubik'; }"))
            .extensions(kit::start_kit())
            .build()
            .unwrap();

        let bundle = bridge.boot_bundle();
        assert_eq!(bundle.config["codec"], "messagepack");
        assert_eq!(bundle.config["placeholder"], "Start typing");
        // The placeholder text has a single source.
        assert!(bundle.config["extensionConfig"].get(kit::PLACEHOLDER).is_none());
        assert!(bundle.css.contains("data-placeholder"));
        assert_eq!(bundle.config["extensions"][0], kit::CORE);
        assert!(bundle.css.contains("Rubik"));
    }

    #[tokio::test]
    async fn test_local_failures_need_no_channel() {
        let bridge = EditorBridge::builder()
            .extension(kit::core())
            .build()
            .unwrap();

        assert!(matches!(
            bridge.run_command("toggleBold", CommandArgs::new()).await,
            Err(BridgeError::UnknownCommand(_))
        ));
        assert!(matches!(
            bridge
                .run_command("setContent", CommandArgs::new().with("html", 1))
                .await,
            Err(BridgeError::InvalidArgument { .. })
        ));

        bridge.destroy();
        bridge.destroy();
        assert!(matches!(bridge.focus().await, Err(BridgeError::Destroyed)));
    }

    #[test]
    fn test_focus_position_values() {
        assert_eq!(FocusPosition::End.to_value(), Value::from("end"));
        assert_eq!(FocusPosition::Offset(12).to_value(), Value::from(12u64));
    }
}
