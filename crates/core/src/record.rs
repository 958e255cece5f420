//! Raw dataset rows.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, SerializerError};

/// One raw training example as a key-value row.
///
/// Which keys are required depends on the task: `instruction`/`input`/`output`
/// for completion, `messages` for chat and `article`/`highlights` for
/// summarization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter, mostly useful in tests and bindings.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// String value of a field; `None` when absent or null.
    pub fn get_str(&self, field: &str) -> Result<Option<&str>> {
        match self.0.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(SerializerError::malformed(format!(
                "field `{}` must be a string, found {}",
                field,
                json_kind(other)
            ))),
        }
    }

    /// String value of a field that must be present and non-blank.
    pub fn require_str(&self, field: &str) -> Result<&str> {
        match self.get_str(field)? {
            Some(s) if !s.trim().is_empty() => Ok(s),
            Some(_) => Err(SerializerError::malformed(format!("field `{}` is empty", field))),
            None => Err(SerializerError::malformed(format!("missing field `{}`", field))),
        }
    }

    /// The `messages` list of a chat record.
    pub fn messages(&self) -> Result<Vec<Message>> {
        let value = self
            .0
            .get("messages")
            .ok_or_else(|| SerializerError::malformed("missing field `messages`"))?;
        if !value.is_array() {
            return Err(SerializerError::malformed(format!(
                "field `messages` must be an array, found {}",
                json_kind(value)
            )));
        }
        serde_json::from_value(value.clone())
            .map_err(|e| SerializerError::malformed(format!("invalid `messages`: {}", e)))
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Record {
    type Error = SerializerError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(SerializerError::malformed(format!(
                "record must be an object, found {}",
                json_kind(&other)
            ))),
        }
    }
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn is_user(&self) -> bool {
        self.role.eq_ignore_ascii_case("user")
    }

    pub fn is_assistant(&self) -> bool {
        self.role.eq_ignore_ascii_case("assistant")
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
