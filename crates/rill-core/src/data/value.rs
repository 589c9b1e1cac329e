//! Dynamic values passed to and returned from task functions.
//!
//! Two closely related types live here:
//!
//! - [`Value`] is what task functions see: plain data plus
//!   [`Value::Data`] handles to materialized objects.
//! - [`ArgValue`] is the serialized form used in argument streams and by the
//!   native codec. It carries [`Placeholder`]s where a `Value` would carry a
//!   data handle.
//!
//! The native codec (content types `pickle` / `cloudpickle`) is bincode over
//! `ArgValue`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::instance::DataInstance;

/// Runtime value handled by task functions.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Absence of a value.
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// A materialized data object.
    Data(Arc<DataInstance>),
}

impl Value {
    /// Short type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Data(_) => "data",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric value as float; integers are widened.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_data(&self) -> Option<&Arc<DataInstance>> {
        match self {
            Value::Data(instance) => Some(instance),
            _ => None,
        }
    }

    /// Convert to JSON. Bytes and data handles have no JSON form.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(match self {
            Value::None => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .ok_or_else(|| {
                    Error::Serialization(format!("float {} has no JSON representation", f))
                })?,
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => serde_json::Value::Array(
                items.iter().map(Value::to_json).collect::<Result<_>>()?,
            ),
            Value::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), v.to_json()?)))
                    .collect::<Result<_>>()?,
            ),
            Value::Bytes(_) | Value::Data(_) => {
                return Err(Error::Serialization(format!(
                    "value of type {} cannot be encoded as JSON",
                    self.type_name()
                )));
            }
        })
    }

    /// Build a value from parsed JSON.
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::None,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            // Data handles compare by identity.
            (Value::Data(a), Value::Data(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Value::Bytes(value.to_vec())
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl From<Arc<DataInstance>> for Value {
    fn from(value: Arc<DataInstance>) -> Self {
        Value::Data(value)
    }
}

impl From<DataInstance> for Value {
    fn from(value: DataInstance) -> Self {
        Value::Data(Arc::new(value))
    }
}

/// Marker standing in for a task input inside an argument stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placeholder {
    /// Index into the task inputs, not counting the closure blob.
    pub index: usize,
    /// Decode the object instead of passing the raw instance.
    /// `None` defers to the task's `auto_load` setting.
    pub load: Option<bool>,
    /// Content type the caller expects, merged with the object's own.
    pub content_type: Option<String>,
}

impl Placeholder {
    /// Placeholder with no explicit load flag or content type.
    pub fn new(index: usize) -> Self {
        Self {
            index,
            load: None,
            content_type: None,
        }
    }

    /// Request (or refuse) decoding of the object.
    pub fn load(mut self, load: bool) -> Self {
        self.load = Some(load);
        self
    }

    /// Set the expected content type.
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Serialized value as it appears in argument streams.
///
/// Variant order is part of the wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArgValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<ArgValue>),
    Map(BTreeMap<String, ArgValue>),
    Placeholder(Placeholder),
}

impl TryFrom<&Value> for ArgValue {
    type Error = Error;

    fn try_from(value: &Value) -> Result<Self> {
        Ok(match value {
            Value::None => ArgValue::None,
            Value::Bool(b) => ArgValue::Bool(*b),
            Value::Int(i) => ArgValue::Int(*i),
            Value::Float(f) => ArgValue::Float(*f),
            Value::Str(s) => ArgValue::Str(s.clone()),
            Value::Bytes(b) => ArgValue::Bytes(b.clone()),
            Value::List(items) => ArgValue::List(
                items
                    .iter()
                    .map(ArgValue::try_from)
                    .collect::<Result<_>>()?,
            ),
            Value::Map(map) => ArgValue::Map(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), ArgValue::try_from(v)?)))
                    .collect::<Result<_>>()?,
            ),
            Value::Data(_) => {
                return Err(Error::Serialization(
                    "data instances cannot be serialized inside a value".to_string(),
                ));
            }
        })
    }
}

impl TryFrom<ArgValue> for Value {
    type Error = Error;

    fn try_from(value: ArgValue) -> Result<Self> {
        Ok(match value {
            ArgValue::None => Value::None,
            ArgValue::Bool(b) => Value::Bool(b),
            ArgValue::Int(i) => Value::Int(i),
            ArgValue::Float(f) => Value::Float(f),
            ArgValue::Str(s) => Value::Str(s),
            ArgValue::Bytes(b) => Value::Bytes(b),
            ArgValue::List(items) => Value::List(
                items
                    .into_iter()
                    .map(Value::try_from)
                    .collect::<Result<_>>()?,
            ),
            ArgValue::Map(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| Ok((k, Value::try_from(v)?)))
                    .collect::<Result<_>>()?,
            ),
            ArgValue::Placeholder(p) => {
                return Err(Error::Placeholder(format!(
                    "placeholder {} found outside an argument stream",
                    p.index
                )));
            }
        })
    }
}

/// Encode a value with the native codec.
pub fn encode_native(value: &Value) -> Result<Vec<u8>> {
    let arg = ArgValue::try_from(value)?;
    encode_args(&arg)
}

/// Decode a value written by [`encode_native`].
pub fn decode_native(bytes: &[u8]) -> Result<Value> {
    let (arg, _): (ArgValue, usize) =
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| Error::Deserialization(format!("invalid native value: {}", e)))?;
    Value::try_from(arg)
}

/// Encode any argument structure (a single value, a positional list or a
/// keyword map) the way argument streams expect it.
pub fn encode_args<T: Serialize + ?Sized>(args: &T) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(args, bincode::config::standard())
        .map_err(|e| Error::Serialization(format!("failed to encode arguments: {}", e)))
}
