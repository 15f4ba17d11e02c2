use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number, Value};

/// Identifier of a JSON-RPC request.
///
/// Numbers are kept as the original numeric token so large ids survive a
/// round trip untouched. `Null` is a present-but-null id: the message is
/// still a request, unlike a notification which has no id at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestId {
    Number(Number),
    String(String),
    Null,
}

impl RequestId {
    /// Build an id from a JSON scalar, `None` for arrays, objects and booleans
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => Some(RequestId::Number(n.clone())),
            Value::String(s) => Some(RequestId::String(s.clone())),
            Value::Null => Some(RequestId::Null),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            RequestId::Number(n) => Value::Number(n.clone()),
            RequestId::String(s) => Value::String(s.clone()),
            RequestId::Null => Value::Null,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            RequestId::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RequestId::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    /// Key used for pending-call tables; distinguishes `1` from `"1"`
    pub fn key(&self) -> String {
        match self {
            RequestId::Number(n) => format!("n:{}", n),
            RequestId::String(s) => format!("s:{}", s),
            RequestId::Null => "null".to_string(),
        }
    }
}

impl Hash for RequestId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "{}", s),
            RequestId::Null => write!(f, "null"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n.into())
    }
}

impl From<u64> for RequestId {
    fn from(n: u64) -> Self {
        RequestId::Number(n.into())
    }
}

impl From<i32> for RequestId {
    fn from(n: i32) -> Self {
        RequestId::Number(n.into())
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId::String(s)
    }
}

impl Serialize for RequestId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        RequestId::from_value(&value)
            .ok_or_else(|| serde::de::Error::custom("request id must be a number, string or null"))
    }
}

/// Parameters of a request or notification
#[derive(Debug, Clone, PartialEq)]
pub enum Params {
    /// Positional parameters as an array
    Array(Vec<Value>),
    /// Named parameters as an object
    Object(Map<String, Value>),
}

impl Params {
    /// Positional view handed to handlers; keyed params become a single
    /// argument holding the whole map.
    pub fn to_list(&self) -> Vec<Value> {
        match self {
            Params::Array(vec) => vec.clone(),
            Params::Object(map) => vec![Value::Object(map.clone())],
        }
    }

    /// Get a parameter by name (for object params only)
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Params::Object(map) => map.get(key),
            Params::Array(_) => None,
        }
    }

    /// Get a parameter by index (for array params only)
    pub fn get_index(&self, index: usize) -> Option<&Value> {
        match self {
            Params::Array(vec) => vec.get(index),
            Params::Object(_) => None,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Params::Array(_))
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Params::Object(map) => map.is_empty(),
            Params::Array(vec) => vec.is_empty(),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Params::Object(map) => Value::Object(map.clone()),
            Params::Array(arr) => Value::Array(arr.clone()),
        }
    }
}

impl Default for Params {
    fn default() -> Self {
        Params::Array(Vec::new())
    }
}

impl From<Vec<Value>> for Params {
    fn from(vec: Vec<Value>) -> Self {
        Params::Array(vec)
    }
}

impl From<Map<String, Value>> for Params {
    fn from(map: Map<String, Value>) -> Self {
        Params::Object(map)
    }
}
