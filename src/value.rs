use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};

use crate::port::CommunicationPort;

/// Message body exchanged over a [`CommunicationPort`].
pub type Payload = HashMap<String, Value>;

/// A dynamically typed payload value.
///
/// Everything except [`Value::Port`] survives the network codec unchanged. A port
/// reference only makes sense inside the process that owns it, so encoding one is
/// rejected by the codec.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    List(Vec<Value>),
    Duration(Duration),
    Map(HashMap<String, Value>),
    Null,
    #[serde(skip)]
    Port(CommunicationPort),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_port(&self) -> Option<&CommunicationPort> {
        match self {
            Value::Port(port) => Some(port),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Boolean(_) => "boolean",
            Value::List(_) => "list",
            Value::Duration(_) => "duration",
            Value::Map(_) => "map",
            Value::Null => "null",
            Value::Port(_) => "port",
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<Duration> for Value {
    fn from(value: Duration) -> Self {
        Value::Duration(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl From<HashMap<String, Value>> for Value {
    fn from(value: HashMap<String, Value>) -> Self {
        Value::Map(value)
    }
}

impl From<CommunicationPort> for Value {
    fn from(value: CommunicationPort) -> Self {
        Value::Port(value)
    }
}

/// Builds a [`Payload`] from key/value pairs.
///
/// ```
/// use simlink::value::{payload, Value};
///
/// let request = payload([("x", 1i64)]);
/// assert_eq!(request.get("x"), Some(&Value::Integer(1)));
/// ```
pub fn payload<K, V, I>(entries: I) -> Payload
where
    K: Into<String>,
    V: Into<Value>,
    I: IntoIterator<Item = (K, V)>,
{
    entries
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
