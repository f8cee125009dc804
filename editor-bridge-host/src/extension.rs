//! Bridge extensions
//!
//! A [`BridgeExtension`] is a declarative bundle: the commands it adds, the
//! state fields it contributes, and the script/style the sandbox runs at boot.
//! Extensions are composed into a bridge once, at construction.

use crate::config::BridgeConfig;
use editor_bridge_api::{CommandSpec, Value, PROTOCOL_VERSION};
use serde_json::{json, Map};

/// A pluggable bundle of commands, state fields and sandbox init code
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeExtension {
    name: String,
    commands: Vec<CommandSpec>,
    state_fields: Vec<String>,
    init: SandboxInit,
    config: Option<Value>,
}

/// Code injected into the sandbox once, at boot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SandboxInit {
    pub script: Option<String>,
    pub css: Option<String>,
}

impl BridgeExtension {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            commands: Vec::new(),
            state_fields: Vec::new(),
            init: SandboxInit::default(),
            config: None,
        }
    }

    /// Add a command
    pub fn command(mut self, spec: CommandSpec) -> Self {
        self.commands.push(spec);
        self
    }

    /// Declare a state field this extension contributes
    pub fn state_field(mut self, field: impl Into<String>) -> Self {
        self.state_fields.push(field.into());
        self
    }

    /// Set the boot script
    pub fn script(mut self, script: impl Into<String>) -> Self {
        self.init.script = Some(script.into());
        self
    }

    /// Append CSS to the boot style
    pub fn css(mut self, css: impl AsRef<str>) -> Self {
        append(&mut self.init.css, css.as_ref().trim(), "\n");
        self
    }

    /// Attach configuration the sandbox-side extension reads at boot
    pub fn configure(mut self, config: Value) -> Self {
        self.config = Some(config);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn commands(&self) -> &[CommandSpec] {
        &self.commands
    }

    pub fn state_fields(&self) -> &[String] {
        &self.state_fields
    }

    pub fn init(&self) -> &SandboxInit {
        &self.init
    }

    pub fn config(&self) -> Option<&Value> {
        self.config.as_ref()
    }

    /// Fold another descriptor of the same name into this one
    ///
    /// Script and CSS are appended and a given config replaces the current
    /// one. Commands and fields already declared identically are skipped; a
    /// command redefined differently is kept so registration rejects it.
    pub(crate) fn absorb(&mut self, overlay: BridgeExtension) {
        for spec in overlay.commands {
            if !self.commands.contains(&spec) {
                self.commands.push(spec);
            }
        }
        for field in overlay.state_fields {
            if !self.state_fields.contains(&field) {
                self.state_fields.push(field);
            }
        }
        if let Some(script) = overlay.init.script {
            append(&mut self.init.script, script.trim(), "\n;\n");
        }
        if let Some(css) = overlay.init.css {
            append(&mut self.init.css, &css, "\n");
        }
        if overlay.config.is_some() {
            self.config = overlay.config;
        }
    }
}

fn append(target: &mut Option<String>, text: &str, separator: &str) {
    *target = Some(match target.take() {
        Some(existing) => format!("{}{}{}", existing, separator, text),
        None => text.to_string(),
    });
}

/// Everything the host's sandbox must inject before the editor boots
#[derive(Debug, Clone, PartialEq)]
pub struct BootBundle {
    /// Editor settings and per-extension configuration
    pub config: Value,
    /// Concatenated extension scripts, in extension order
    pub script: String,
    /// Concatenated extension styles, in extension order
    pub css: String,
    /// BLAKE3 hex digest of the three parts above
    pub fingerprint: String,
}

impl BootBundle {
    pub(crate) fn compose(extensions: &[BridgeExtension], config: &BridgeConfig) -> Self {
        let mut extension_config = Map::new();
        let mut scripts = Vec::new();
        let mut styles = Vec::new();

        for ext in extensions {
            if let Some(cfg) = &ext.config {
                extension_config.insert(ext.name.clone(), cfg.clone());
            }
            if let Some(script) = &ext.init.script {
                scripts.push(format!("/* {} */\n{}", ext.name, script.trim()));
            }
            if let Some(css) = &ext.init.css {
                styles.push(format!("/* {} */\n{}", ext.name, css));
            }
        }

        let config = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "codec": config.codec.to_string(),
            "initialContent": config.initial_content,
            "autofocus": config.autofocus,
            "editable": config.editable,
            "placeholder": config.placeholder,
            "extensions": extensions.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(),
            "extensionConfig": extension_config,
        });
        let script = scripts.join("\n;\n");
        let css = styles.join("\n");

        let mut hasher = blake3::Hasher::new();
        hasher.update(config.to_string().as_bytes());
        hasher.update(&[0]);
        hasher.update(script.as_bytes());
        hasher.update(&[0]);
        hasher.update(css.as_bytes());
        let fingerprint = hasher.finalize().to_hex().to_string();

        Self {
            config,
            script,
            css,
            fingerprint,
        }
    }
}
