//! Bridge configuration
//!
//! [`BridgeConfig`] can be built in code, deserialized from a host settings file,
//! or overlaid from `EDITOR_BRIDGE_*` environment variables.

use editor_bridge_api::WireCodec;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Generous default: a cold WebView can take seconds to answer the first call.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_BOOT_TIMEOUT: Duration = Duration::from_secs(30);

pub const ENV_CALL_TIMEOUT_MS: &str = "EDITOR_BRIDGE_CALL_TIMEOUT_MS";
pub const ENV_BOOT_TIMEOUT_MS: &str = "EDITOR_BRIDGE_BOOT_TIMEOUT_MS";
pub const ENV_CODEC: &str = "EDITOR_BRIDGE_CODEC";
pub const ENV_DEV: &str = "EDITOR_BRIDGE_DEV";

/// Configuration for one editor bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Time a sent call may wait for its reply
    #[serde(with = "millis", rename = "call_timeout_ms")]
    pub call_timeout: Duration,

    /// Time queued calls may wait for the sandbox's `ready` event
    #[serde(with = "millis", rename = "boot_timeout_ms")]
    pub boot_timeout: Duration,

    /// Encoding of outbound frames
    pub codec: WireCodec,

    /// Document the editor boots with, passed in the boot bundle
    pub initial_content: Option<String>,

    /// Focus the editor once it has booted, passed in the boot bundle
    pub autofocus: bool,

    pub editable: bool,

    pub placeholder: Option<String>,

    /// Development mode: watch `custom_source` and reload the sandbox on change
    pub dev: bool,

    /// Files making up a custom sandbox bundle
    pub custom_source: Vec<PathBuf>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            boot_timeout: DEFAULT_BOOT_TIMEOUT,
            codec: WireCodec::Json,
            initial_content: None,
            autofocus: false,
            editable: true,
            placeholder: None,
            dev: false,
            custom_source: Vec::new(),
        }
    }
}

impl BridgeConfig {
    /// Default configuration overlaid with `EDITOR_BRIDGE_*` variables
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Overlay `EDITOR_BRIDGE_*` variables; unparsable values are ignored with a warning
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(ms) = parse_var(&lookup, ENV_CALL_TIMEOUT_MS) {
            self.call_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, ENV_BOOT_TIMEOUT_MS) {
            self.boot_timeout = Duration::from_millis(ms);
        }
        if let Some(codec) = parse_var(&lookup, ENV_CODEC) {
            self.codec = codec;
        }
        if let Some(raw) = lookup(ENV_DEV) {
            self.dev = matches!(raw.trim(), "1" | "true" | "yes" | "on");
        }
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn boot_timeout(mut self, timeout: Duration) -> Self {
        self.boot_timeout = timeout;
        self
    }

    pub fn codec(mut self, codec: WireCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn initial_content(mut self, html: impl Into<String>) -> Self {
        self.initial_content = Some(html.into());
        self
    }

    pub fn autofocus(mut self, autofocus: bool) -> Self {
        self.autofocus = autofocus;
        self
    }

    pub fn editable(mut self, editable: bool) -> Self {
        self.editable = editable;
        self
    }

    pub fn placeholder(mut self, text: impl Into<String>) -> Self {
        self.placeholder = Some(text.into());
        self
    }

    /// Enable development mode with a custom sandbox bundle
    pub fn dev_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.dev = true;
        self.custom_source.push(path.into());
        self
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
