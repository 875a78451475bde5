//! Command arguments and per-command validation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ControlError;

/// Structured key-value arguments for a command.
///
/// The schema is per command name and not statically enumerable; use
/// [`CommandCatalog`] to enforce required keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandArgs(HashMap<String, Value>);

impl CommandArgs {
    /// Create empty arguments.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interpret a JSON value as arguments.
    ///
    /// `null` yields empty arguments; anything other than an object is rejected.
    ///
    /// # Errors
    /// Returns `MalformedPayload` if `value` is not an object or null.
    pub fn from_value(value: Value) -> Result<Self, ControlError> {
        match value {
            Value::Null => Ok(Self::new()),
            Value::Object(map) => Ok(Self(map.into_iter().collect())),
            other => Err(ControlError::MalformedPayload(format!(
                "command arguments must be a JSON object, got {other}"
            ))),
        }
    }

    /// Get an argument by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Set an argument.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Required keys that are absent or null.
    #[must_use]
    pub fn missing<'a>(&self, required: &'a [String]) -> Vec<&'a str> {
        required
            .iter()
            .filter(|key| self.0.get(key.as_str()).is_none_or(Value::is_null))
            .map(String::as_str)
            .collect()
    }
}

impl From<HashMap<String, Value>> for CommandArgs {
    fn from(map: HashMap<String, Value>) -> Self {
        Self(map)
    }
}

/// Command-layer validation rules.
///
/// Names are embedded in command ids, so they are restricted to
/// `[A-Za-z0-9_-]`. Commands without an entry accept any arguments.
#[derive(Debug, Clone, Default)]
pub struct CommandCatalog {
    required: HashMap<String, Vec<String>>,
}

impl CommandCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the keys a command must carry.
    #[must_use]
    pub fn require<I, S>(mut self, command: impl Into<String>, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required
            .insert(command.into(), keys.into_iter().map(Into::into).collect());
        self
    }

    /// Validate a command name and its arguments.
    ///
    /// # Errors
    /// Returns `InvalidCommand` for a bad name or missing required keys.
    pub fn validate(&self, command: &str, args: &CommandArgs) -> Result<(), ControlError> {
        if command.is_empty() {
            return Err(ControlError::InvalidCommand(
                "Command name is required".to_string(),
            ));
        }
        if !command
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ControlError::InvalidCommand(format!(
                "Command name '{command}' contains unsupported characters"
            )));
        }

        if let Some(required) = self.required.get(command) {
            let missing = args.missing(required);
            if !missing.is_empty() {
                return Err(ControlError::InvalidCommand(format!(
                    "Command '{command}' is missing required arguments: {}",
                    missing.join(", ")
                )));
            }
        }
        Ok(())
    }
}
