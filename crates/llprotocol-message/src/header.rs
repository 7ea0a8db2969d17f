use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{MessageError, Result};

/// Field holding the message type discriminator.
pub const TYPE_FIELD: &str = "type";

/// Accepted on decode in place of [`TYPE_FIELD`].
pub const EVENT_ALIAS: &str = "event";

/// JSON metadata sent ahead of a message body.
///
/// Always carries a non-empty string `type`. Every other field passes
/// through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct MessageHeader {
    fields: Map<String, Value>,
}

impl MessageHeader {
    pub fn new(message_type: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert(TYPE_FIELD.to_string(), Value::String(message_type.into()));
        Self { fields }
    }

    /// Build from decoded JSON fields, resolving the `event` alias.
    pub fn from_fields(mut fields: Map<String, Value>) -> Result<Self> {
        if !fields.contains_key(TYPE_FIELD) {
            if let Some(event) = fields.remove(EVENT_ALIAS) {
                fields.insert(TYPE_FIELD.to_string(), event);
            }
        }
        match fields.get(TYPE_FIELD) {
            Some(Value::String(message_type)) if !message_type.is_empty() => Ok(Self { fields }),
            _ => Err(MessageError::MissingType),
        }
    }

    /// Decode from the raw header bytes (UTF-8 JSON object).
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let fields: Map<String, Value> = serde_json::from_slice(bytes)?;
        Self::from_fields(fields)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.fields)?)
    }

    pub fn message_type(&self) -> &str {
        match self.fields.get(TYPE_FIELD) {
            Some(Value::String(message_type)) => message_type,
            _ => "",
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Set a field. `type` may only be replaced by a non-empty string.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let key = key.into();
        let value = value.into();
        if key == TYPE_FIELD && !matches!(&value, Value::String(s) if !s.is_empty()) {
            return Err(MessageError::MissingType);
        }
        self.fields.insert(key, value);
        Ok(())
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<Self> {
        self.insert(key, value)?;
        Ok(self)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }
}

impl TryFrom<Map<String, Value>> for MessageHeader {
    type Error = MessageError;

    fn try_from(fields: Map<String, Value>) -> Result<Self> {
        Self::from_fields(fields)
    }
}

impl From<MessageHeader> for Map<String, Value> {
    fn from(header: MessageHeader) -> Self {
        header.fields
    }
}
