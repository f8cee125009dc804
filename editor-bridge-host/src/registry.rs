//! Command registry
//!
//! Commands are registered on a [`CommandRegistryBuilder`] while the bridge is
//! being constructed, then frozen into an immutable [`CommandRegistry`]. There
//! is no way to add a command afterwards, so dispatch never races registration.

use crate::error::BridgeError;
use crate::rpc::RpcLayer;
use editor_bridge_api::{ArgumentEncoding, CommandSpec, ResultKind, Value};
use serde_json::Map;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// A command as registered in a bridge
#[derive(Debug, Clone)]
pub struct CommandDescriptor {
    pub spec: CommandSpec,
    /// Name of the extension that contributed the command
    pub extension: String,
}

/// Named arguments for a command invocation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandArgs(Map<String, Value>);

impl CommandArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an argument
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Build from a JSON object; `null` means no arguments
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Null => Some(Self::default()),
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for CommandArgs {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Collects command descriptors before the registry is frozen
#[derive(Debug, Default)]
pub struct CommandRegistryBuilder {
    commands: HashMap<String, CommandDescriptor>,
    order: Vec<String>,
}

impl CommandRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command contributed by `extension`
    pub fn register(
        &mut self,
        extension: impl Into<String>,
        spec: CommandSpec,
    ) -> Result<(), BridgeError> {
        let extension = extension.into();
        if let Some(existing) = self.commands.get(&spec.name) {
            tracing::warn!(
                command = %spec.name,
                existing = %existing.extension,
                duplicate = %extension,
                "Duplicate command registration"
            );
            return Err(BridgeError::DuplicateCommand(spec.name));
        }

        tracing::debug!(command = %spec.name, extension = %extension, "Command registered");
        self.order.push(spec.name.clone());
        self.commands
            .insert(spec.name.clone(), CommandDescriptor { spec, extension });
        Ok(())
    }

    /// Freeze the registry
    pub fn build(self) -> CommandRegistry {
        CommandRegistry {
            inner: Arc::new(RegistryInner {
                commands: self.commands,
                order: self.order,
            }),
        }
    }
}

/// An immutable, cheaply cloneable command table
#[derive(Debug, Clone)]
pub struct CommandRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Debug)]
struct RegistryInner {
    commands: HashMap<String, CommandDescriptor>,
    /// Registration order, for listing
    order: Vec<String>,
}

impl CommandRegistry {
    pub fn builder() -> CommandRegistryBuilder {
        CommandRegistryBuilder::new()
    }

    pub fn get(&self, name: &str) -> Option<&CommandDescriptor> {
        self.inner.commands.get(name)
    }

    /// Check if a command exists
    pub fn has_command(&self, name: &str) -> bool {
        self.inner.commands.contains_key(name)
    }

    /// Command names in registration order
    pub fn list_commands(&self) -> Vec<&str> {
        self.inner.order.iter().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.commands.is_empty()
    }

    /// Validate and encode arguments into the call payload
    ///
    /// Fails with [`BridgeError::UnknownCommand`] or
    /// [`BridgeError::InvalidArgument`] without touching the channel.
    pub fn encode(&self, name: &str, args: CommandArgs) -> Result<Value, BridgeError> {
        let descriptor = self
            .get(name)
            .ok_or_else(|| BridgeError::UnknownCommand(name.to_string()))?;
        let spec = &descriptor.spec;
        let mut resolved = validate(spec, args)?;

        Ok(match &spec.encoding {
            ArgumentEncoding::None => Value::Null,
            ArgumentEncoding::Single(arg) => resolved.remove(arg).unwrap_or(Value::Null),
            ArgumentEncoding::Object => Value::Object(resolved),
        })
    }

    /// Check a reply against the command's declared result kind
    pub fn decode(&self, name: &str, raw: Value) -> Result<Value, BridgeError> {
        let descriptor = self
            .get(name)
            .ok_or_else(|| BridgeError::UnknownCommand(name.to_string()))?;

        let matches = match descriptor.spec.result {
            ResultKind::Unit => return Ok(Value::Null),
            ResultKind::Json => true,
            ResultKind::Text => raw.is_string(),
            ResultKind::Bool => raw.is_boolean(),
            ResultKind::Number => raw.is_number(),
        };
        if matches {
            Ok(raw)
        } else {
            Err(BridgeError::invalid_result(
                name,
                format!("expected {:?}, got {}", descriptor.spec.result, raw),
            ))
        }
    }

    /// Validate, send, await and decode a command
    pub async fn invoke(
        &self,
        rpc: &RpcLayer,
        name: &str,
        args: CommandArgs,
        timeout: Duration,
    ) -> Result<Value, BridgeError> {
        let payload = self.encode(name, args)?;
        let raw = rpc.call(name, payload, timeout).await?;
        self.decode(name, raw)
    }

    /// Generate help text for a command
    pub fn describe(&self, name: &str) -> Option<String> {
        let CommandDescriptor { spec, extension } = self.get(name)?;
        let mut help = format!("{} ({})\n    {}\n", spec.name, extension, spec.about);

        if !spec.args.is_empty() {
            help.push_str("\nARGUMENTS:\n");
            for arg in &spec.args {
                let required = if arg.required { " (required)" } else { "" };
                help.push_str(&format!("  {} <{}>{}\n", arg.name, arg.kind.as_str(), required));
                if !arg.help.is_empty() {
                    help.push_str(&format!("      {}\n", arg.help));
                }
                if let Some(default) = &arg.default_value {
                    help.push_str(&format!("      [default: {}]\n", default));
                }
                if let Some(values) = &arg.possible_values {
                    let values: Vec<String> = values.iter().map(Value::to_string).collect();
                    help.push_str(&format!("      [possible values: {}]\n", values.join(", ")));
                }
            }
        }

        Some(help)
    }
}

fn validate(spec: &CommandSpec, args: CommandArgs) -> Result<Map<String, Value>, BridgeError> {
    let mut given = args.0;
    if let Some(unknown) = given.keys().find(|key| spec.find_arg(key).is_none()) {
        return Err(BridgeError::invalid_argument(
            &spec.name,
            format!("unknown argument `{}`", unknown),
        ));
    }

    let mut resolved = Map::new();
    for arg in &spec.args {
        let value = match given.remove(&arg.name) {
            Some(value) => value,
            None => match (&arg.default_value, arg.required) {
                (Some(default), _) => default.clone(),
                (None, true) => {
                    return Err(BridgeError::invalid_argument(
                        &spec.name,
                        format!("missing required argument `{}`", arg.name),
                    ))
                }
                (None, false) => continue,
            },
        };

        if !arg.kind.accepts(&value) {
            return Err(BridgeError::invalid_argument(
                &spec.name,
                format!("`{}` must be {}, got {}", arg.name, arg.kind.as_str(), value),
            ));
        }
        if let Some(allowed) = &arg.possible_values {
            if !allowed.contains(&value) {
                return Err(BridgeError::invalid_argument(
                    &spec.name,
                    format!("`{}` does not accept {}", arg.name, value),
                ));
            }
        }
        resolved.insert(arg.name.clone(), value);
    }

    Ok(resolved)
}
