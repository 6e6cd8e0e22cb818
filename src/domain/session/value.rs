use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number, Value};

const TYPE_TAG: &str = "__type__";
const BYTES_TAG: &str = "bytes";

/// Value stored in session state or events
///
/// Unlike plain JSON it can hold raw bytes. On the wire bytes become
/// `{"__type__": "bytes", "data": "<base64>"}` and are restored on read.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionValue {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<SessionValue>),
    Map(BTreeMap<String, SessionValue>),
}

impl SessionValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SessionValue::String(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            SessionValue::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// JSON-safe encoding
    pub fn to_json(&self) -> Value {
        match self {
            SessionValue::Null => Value::Null,
            SessionValue::Bool(flag) => Value::Bool(*flag),
            SessionValue::Number(number) => Value::Number(number.clone()),
            SessionValue::String(text) => Value::String(text.clone()),
            SessionValue::Bytes(bytes) => {
                let mut tagged = Map::new();
                tagged.insert(TYPE_TAG.to_string(), Value::String(BYTES_TAG.to_string()));
                tagged.insert("data".to_string(), Value::String(STANDARD.encode(bytes)));
                Value::Object(tagged)
            }
            SessionValue::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            SessionValue::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }

    /// Inverse of [`SessionValue::to_json`]. A tagged object whose data is
    /// not valid base64 is kept as an ordinary map.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => SessionValue::Null,
            Value::Bool(flag) => SessionValue::Bool(flag),
            Value::Number(number) => SessionValue::Number(number),
            Value::String(text) => SessionValue::String(text),
            Value::Array(items) => {
                SessionValue::List(items.into_iter().map(Self::from_json).collect())
            }
            Value::Object(map) => {
                if let Some(bytes) = tagged_bytes(&map) {
                    return SessionValue::Bytes(bytes);
                }
                SessionValue::Map(
                    map.into_iter()
                        .map(|(key, value)| (key, Self::from_json(value)))
                        .collect(),
                )
            }
        }
    }
}

fn tagged_bytes(map: &Map<String, Value>) -> Option<Vec<u8>> {
    if map.len() != 2 || map.get(TYPE_TAG)?.as_str()? != BYTES_TAG {
        return None;
    }
    STANDARD.decode(map.get("data")?.as_str()?).ok()
}

impl From<Value> for SessionValue {
    fn from(value: Value) -> Self {
        Self::from_json(value)
    }
}

impl From<&str> for SessionValue {
    fn from(text: &str) -> Self {
        SessionValue::String(text.to_string())
    }
}

impl From<String> for SessionValue {
    fn from(text: String) -> Self {
        SessionValue::String(text)
    }
}

impl From<Vec<u8>> for SessionValue {
    fn from(bytes: Vec<u8>) -> Self {
        SessionValue::Bytes(bytes)
    }
}

impl Serialize for SessionValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SessionValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::from_json)
    }
}
