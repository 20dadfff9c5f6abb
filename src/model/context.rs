use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Flat option value carried across the process boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

/// Arguments a sub-command was invoked with, before they are bound to a
/// command name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvocationArgs {
    pub positional: Vec<String>,
    pub options: BTreeMap<String, Scalar>,
}

impl InvocationArgs {
    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Keys starting with `_` are internal to the host and are dropped.
    pub fn option(mut self, key: impl Into<String>, value: impl Into<Scalar>) -> Self {
        let key = key.into();
        if key.starts_with('_') {
            tracing::debug!(key, "dropping internal option");
            return self;
        }
        self.options.insert(key, value.into());
        self
    }
}

/// Serializable description of one plugin invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationContext {
    pub command_name: String,
    #[serde(default)]
    pub positional_args: Vec<String>,
    #[serde(default)]
    pub options: BTreeMap<String, Scalar>,
}

impl InvocationContext {
    pub fn new(command_name: impl Into<String>, args: InvocationArgs) -> Self {
        Self {
            command_name: command_name.into(),
            positional_args: args.positional,
            options: args.options,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Raw argument vector in the shape plugin commands consume: the
    /// positional arguments followed by one options object.
    pub fn to_argv(&self) -> Vec<Value> {
        let mut argv: Vec<Value> = self
            .positional_args
            .iter()
            .cloned()
            .map(Value::String)
            .collect();

        let options = self
            .options
            .iter()
            .filter_map(|(key, value)| {
                serde_json::to_value(value)
                    .ok()
                    .map(|value| (key.clone(), value))
            })
            .collect();
        argv.push(Value::Object(options));
        argv
    }
}
