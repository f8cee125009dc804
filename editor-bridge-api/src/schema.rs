//! Declarative command schema
//!
//! A [`CommandSpec`] fully describes how a command's arguments are checked and
//! laid out on the wire, and how its result is read back. Nothing here executes
//! code, so a set of specs can be inspected, printed or merged freely.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Command specification contributed by an extension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Command name, unique within one bridge (e.g. "setContent" or "counter.refresh")
    pub name: String,

    /// Short description for help text
    pub about: String,

    /// Argument specifications
    #[serde(default)]
    pub args: Vec<ArgSpec>,

    /// How the validated arguments become the call payload
    #[serde(default)]
    pub encoding: ArgumentEncoding,

    /// What the sandbox is expected to reply with
    #[serde(default)]
    pub result: ResultKind,
}

/// Argument specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgSpec {
    pub name: String,

    #[serde(default)]
    pub kind: ArgKind,

    #[serde(default)]
    pub required: bool,

    /// Help text for this argument
    #[serde(default)]
    pub help: String,

    /// Value used when the caller omits the argument
    #[serde(default)]
    pub default_value: Option<Value>,

    /// List of allowed values
    #[serde(default)]
    pub possible_values: Option<Vec<Value>>,
}

/// JSON type an argument must have
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgKind {
    String,
    Bool,
    Number,
    Integer,
    Object,
    Array,
    /// Cursor position: "start", "end", "all" or a non-negative offset
    Position,
    #[default]
    Any,
}

/// Layout of the call payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgumentEncoding {
    /// Payload is `null`; the command takes no arguments
    #[default]
    None,
    /// Payload is the value of the named argument
    Single(String),
    /// Payload is an object keyed by argument name
    Object,
}

/// Expected shape of a successful reply
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    /// Reply payload is ignored
    #[default]
    Unit,
    Text,
    Bool,
    Number,
    /// Reply payload is passed through untouched
    Json,
}

impl CommandSpec {
    /// Create a new command spec taking no arguments and returning nothing
    pub fn new(name: impl Into<String>, about: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            about: about.into(),
            args: Vec::new(),
            encoding: ArgumentEncoding::None,
            result: ResultKind::Unit,
        }
    }

    /// Add an argument
    ///
    /// The first argument switches the encoding to [`ArgumentEncoding::Single`],
    /// a second one to [`ArgumentEncoding::Object`]. Call [`CommandSpec::encoding`]
    /// afterwards to override.
    pub fn arg(mut self, arg: ArgSpec) -> Self {
        self.encoding = match self.args.len() {
            0 => ArgumentEncoding::Single(arg.name.clone()),
            _ => ArgumentEncoding::Object,
        };
        self.args.push(arg);
        self
    }

    /// Set the payload layout
    pub fn encoding(mut self, encoding: ArgumentEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Set the expected reply shape
    pub fn returns(mut self, result: ResultKind) -> Self {
        self.result = result;
        self
    }

    /// Look up an argument by name
    pub fn find_arg(&self, name: &str) -> Option<&ArgSpec> {
        self.args.iter().find(|a| a.name == name)
    }
}

impl ArgSpec {
    /// Create an optional argument of the given kind
    pub fn new(name: impl Into<String>, kind: ArgKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            help: String::new(),
            default_value: None,
            possible_values: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, ArgKind::String)
    }

    pub fn bool(name: impl Into<String>) -> Self {
        Self::new(name, ArgKind::Bool)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ArgKind::Integer)
    }

    /// Set as required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Set help text
    pub fn help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }

    /// Set default value
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Restrict the argument to a fixed set of values
    pub fn one_of<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.possible_values = Some(values.into_iter().map(Into::into).collect());
        self
    }
}

impl ArgKind {
    /// Check whether a value has this kind
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Bool => value.is_boolean(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Position => {
                value.is_u64() || matches!(value.as_str(), Some("start" | "end" | "all"))
            }
            Self::Any => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Bool => "bool",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Object => "object",
            Self::Array => "array",
            Self::Position => "position",
            Self::Any => "any",
        }
    }
}
