//! Scalar payloads and dictionary keys.
//!
//! [`Value`] is the payload carried by scalar time-series outputs. It wraps
//! `serde_json::Value` so any serde type can ride on a time-series. [`Key`]
//! is the restricted, totally ordered subset usable as a dictionary key.

use crate::error::{FlowError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Dynamic scalar value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Value(pub JsonValue);

impl Value {
    /// Create a null value.
    pub fn null() -> Self {
        Self(JsonValue::Null)
    }

    /// Create a boolean value.
    pub fn bool(v: bool) -> Self {
        Self(JsonValue::Bool(v))
    }

    /// Create an integer value.
    pub fn int(v: i64) -> Self {
        Self(JsonValue::Number(v.into()))
    }

    /// Create a floating-point value. Non-finite floats become null.
    pub fn float(v: f64) -> Self {
        Self(serde_json::Number::from_f64(v).map_or(JsonValue::Null, JsonValue::Number))
    }

    /// Create a string value.
    pub fn string(v: impl Into<String>) -> Self {
        Self(JsonValue::String(v.into()))
    }

    /// Encode any serializable type.
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(Self)
            .map_err(|e| FlowError::Serialization(format!("Failed to encode value: {}", e)))
    }

    /// Decode into any deserializable type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.0.clone())
            .map_err(|e| FlowError::Serialization(format!("Failed to decode value: {}", e)))
    }

    /// Check if the value is null.
    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }

    /// Convert to i64 if the value is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        self.0.as_i64()
    }

    /// Convert to f64 if the value is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        self.0.as_f64()
    }

    /// Convert to bool if the value is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        self.0.as_bool()
    }

    /// Borrow as a string slice if the value is a string.
    pub fn as_str(&self) -> Option<&str> {
        self.0.as_str()
    }

    /// Convert to a dictionary key.
    ///
    /// Only booleans, integers, strings and arrays of those are keyable.
    pub fn to_key(&self) -> Option<Key> {
        Key::from_json(&self.0)
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            JsonValue::String(s) => write!(f, "{}", s),
            other => write!(f, "{}", other),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::string(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::string(v)
    }
}

impl From<Key> for Value {
    fn from(key: Key) -> Self {
        Self(key.to_json())
    }
}

/// Dictionary key: hashable and totally ordered so dict iteration is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    /// Boolean key.
    Bool(bool),
    /// Integer key.
    Int(i64),
    /// String key.
    Str(String),
    /// Composite key.
    Tuple(Vec<Key>),
}

impl Key {
    fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Bool(b) => Some(Self::Bool(*b)),
            JsonValue::Number(n) => n.as_i64().map(Self::Int),
            JsonValue::String(s) => Some(Self::Str(s.clone())),
            JsonValue::Array(items) => items
                .iter()
                .map(Self::from_json)
                .collect::<Option<Vec<_>>>()
                .map(Self::Tuple),
            _ => None,
        }
    }

    fn to_json(&self) -> JsonValue {
        match self {
            Self::Bool(b) => JsonValue::Bool(*b),
            Self::Int(i) => JsonValue::Number((*i).into()),
            Self::Str(s) => JsonValue::String(s.clone()),
            Self::Tuple(items) => JsonValue::Array(items.iter().map(Self::to_json).collect()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Str(s) => write!(f, "{}", s),
            Self::Tuple(items) => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "({})", parts.join(", "))
            }
        }
    }
}

impl From<i64> for Key {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Key {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<&str> for Key {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Key {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_accessors() {
        assert_eq!(Value::int(42).as_i64(), Some(42));
        assert_eq!(Value::float(1.5).as_f64(), Some(1.5));
        assert!(Value::float(f64::NAN).is_null());
        assert_eq!(Value::from("abc").as_str(), Some("abc"));
    }

    #[test]
    fn keys_from_values() {
        assert_eq!(Value::int(3).to_key(), Some(Key::Int(3)));
        assert_eq!(Value::from("a").to_key(), Some(Key::from("a")));
        assert_eq!(Value::float(0.5).to_key(), None);
        assert_eq!(Value::null().to_key(), None);

        let tuple = Value(serde_json::json!(["a", 1]));
        assert_eq!(
            tuple.to_key(),
            Some(Key::Tuple(vec![Key::from("a"), Key::Int(1)]))
        );
    }

    #[test]
    fn key_value_conversion_is_lossless() {
        let key = Key::Tuple(vec![Key::Bool(true), Key::from("x")]);
        let value = Value::from(key.clone());
        assert_eq!(value.to_key(), Some(key));
    }

    #[test]
    fn typed_encode_decode() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Quote {
            bid: f64,
            ask: f64,
        }

        let quote = Quote { bid: 1.0, ask: 1.5 };
        let value = Value::from_serialize(&quote).unwrap();
        assert_eq!(value.decode::<Quote>().unwrap(), quote);
        assert!(value.decode::<i64>().is_err());
    }

    #[test]
    fn keys_are_ordered() {
        let mut keys = vec![Key::from("b"), Key::Int(2), Key::from("a"), Key::Int(1)];
        keys.sort();
        assert_eq!(
            keys,
            vec![Key::Int(1), Key::Int(2), Key::from("a"), Key::from("b")]
        );
    }
}
