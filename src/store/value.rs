//! Value types for the key-value store

use bytes::Bytes;
use std::collections::HashMap;

/// Represents the different types of values that can be stored
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// String value (binary-safe)
    String(Bytes),

    /// Integer value (used for counters)
    Integer(i64),

    /// Hash map (field -> reentrancy count, used by lock records)
    Hash(HashMap<String, i64>),
}

impl Value {
    /// Create a string value
    pub fn string(bytes: impl Into<Bytes>) -> Self {
        Value::String(bytes.into())
    }

    /// Create an integer value
    pub fn integer(i: i64) -> Self {
        Value::Integer(i)
    }

    /// Get the type name as a string
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Integer(_) => "integer",
            Value::Hash(_) => "hash",
        }
    }

    /// View the value as raw bytes, converting integers to their decimal form
    pub fn as_bytes(&self) -> Option<Bytes> {
        match self {
            Value::String(bytes) => Some(bytes.clone()),
            Value::Integer(i) => Some(Bytes::from(i.to_string())),
            Value::Hash(_) => None,
        }
    }

    /// View the value as an integer, parsing strings if possible
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::String(bytes) => std::str::from_utf8(bytes).ok()?.parse().ok(),
            Value::Hash(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_integer_parses_strings() {
        assert_eq!(Value::string("42").as_integer(), Some(42));
        assert_eq!(Value::integer(7).as_integer(), Some(7));
        assert_eq!(Value::string("nope").as_integer(), None);
    }

    #[test]
    fn test_as_bytes_renders_integers() {
        assert_eq!(Value::integer(12).as_bytes(), Some(Bytes::from("12")));
        assert_eq!(Value::Hash(HashMap::new()).as_bytes(), None);
    }
}
