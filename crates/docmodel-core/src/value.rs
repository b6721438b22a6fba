//! Dynamic SQL values and the column value kinds they are coerced to.

use crate::Result;
use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A dynamically-typed SQL value.
///
/// Used for parameter binding, result fetching and as the scalar leaves of
/// document keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,

    /// Boolean value
    Bool(bool),

    /// 32-bit signed integer
    Int(i32),

    /// 64-bit signed integer
    BigInt(i64),

    /// 64-bit floating point
    Double(f64),

    /// Text string
    Text(String),

    /// Binary data
    Bytes(Vec<u8>),

    /// UUID (as 16 bytes)
    Uuid([u8; 16]),
}

impl Value {
    /// Check if this value is NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get the SQL type name of this value.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::Int(_) => "INTEGER",
            Value::BigInt(_) => "BIGINT",
            Value::Double(_) => "DOUBLE",
            Value::Text(_) => "TEXT",
            Value::Bytes(_) => "BLOB",
            Value::Uuid(_) => "UUID",
        }
    }

    /// Try to convert this value to an i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(i64::from(*v)),
            Value::BigInt(v) => Some(*v),
            Value::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    /// Try to get this value as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Compare two values, treating doubles by bit pattern so the relation
    /// is reflexive. Used for identity lookups.
    pub fn same_as(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (a, b) => a == b,
        }
    }

    /// Convert a JSON scalar into a value.
    ///
    /// Objects and arrays are kept as their JSON text.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Value::BigInt)
                .or_else(|| n.as_f64().map(Value::Double))
                .unwrap_or(Value::Null),
            serde_json::Value::String(s) => Value::Text(s.clone()),
            other => Value::Text(other.to_string()),
        }
    }

    /// Convert this value into its JSON representation.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(v) => serde_json::Value::from(*v),
            Value::BigInt(v) => serde_json::Value::from(*v),
            Value::Double(v) => serde_json::Value::from(*v),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => serde_json::Value::String(hex(b)),
            Value::Uuid(u) => serde_json::Value::String(format_uuid(u)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(v) => write!(f, "{}", v),
            Value::BigInt(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Text(s) => f.write_str(s),
            Value::Bytes(b) => f.write_str(&hex(b)),
            Value::Uuid(u) => f.write_str(&format_uuid(u)),
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Render a UUID in its hyphenated lowercase form.
pub fn format_uuid(bytes: &[u8; 16]) -> String {
    let h = hex(bytes);
    format!(
        "{}-{}-{}-{}-{}",
        &h[0..8],
        &h[8..12],
        &h[12..16],
        &h[16..20],
        &h[20..32]
    )
}

/// Parse a UUID from its hyphenated or plain hex form.
pub fn parse_uuid(text: &str) -> Option<[u8; 16]> {
    let digits: Vec<u8> = text.bytes().filter(|b| *b != b'-').collect();
    if digits.len() != 32 {
        return None;
    }
    let mut out = [0u8; 16];
    for (i, pair) in digits.chunks(2).enumerate() {
        let s = std::str::from_utf8(pair).ok()?;
        out[i] = u8::from_str_radix(s, 16).ok()?;
    }
    Some(out)
}

/// The storage kind of a column.
///
/// Driver values are coerced to the column kind when rows are read, so a
/// SQLite `INTEGER` lands as `BigInt` for a `BigInt` key column and as `Int`
/// for an `Int` one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Bool,
    Int,
    BigInt,
    Double,
    Text,
    Bytes,
    Uuid,
}

impl ValueKind {
    /// Name used in error messages.
    pub const fn name(self) -> &'static str {
        match self {
            ValueKind::Bool => "BOOLEAN",
            ValueKind::Int => "INTEGER",
            ValueKind::BigInt => "BIGINT",
            ValueKind::Double => "DOUBLE",
            ValueKind::Text => "TEXT",
            ValueKind::Bytes => "BLOB",
            ValueKind::Uuid => "UUID",
        }
    }

    /// Coerce a driver value to this kind. NULL passes through unchanged.
    pub fn coerce(self, value: Value) -> Result<Value> {
        let mismatch = |v: &Value| Error::type_error(self.name(), v.type_name());
        match (self, value) {
            (_, Value::Null) => Ok(Value::Null),
            (ValueKind::Bool, Value::Bool(b)) => Ok(Value::Bool(b)),
            (ValueKind::Bool, v @ (Value::Int(_) | Value::BigInt(_))) => {
                Ok(Value::Bool(v.as_i64().is_some_and(|n| n != 0)))
            }
            (ValueKind::Int, Value::Int(n)) => Ok(Value::Int(n)),
            (ValueKind::Int, Value::BigInt(n)) => i32::try_from(n)
                .map(Value::Int)
                .map_err(|_| Error::type_error("INTEGER", format!("out of range {}", n))),
            (ValueKind::BigInt, Value::BigInt(n)) => Ok(Value::BigInt(n)),
            (ValueKind::BigInt, Value::Int(n)) => Ok(Value::BigInt(i64::from(n))),
            (ValueKind::Double, Value::Double(d)) => Ok(Value::Double(d)),
            (ValueKind::Double, Value::Int(n)) => Ok(Value::Double(f64::from(n))),
            (ValueKind::Double, Value::BigInt(n)) => Ok(Value::Double(n as f64)),
            (ValueKind::Text, Value::Text(s)) => Ok(Value::Text(s)),
            (ValueKind::Bytes, Value::Bytes(b)) => Ok(Value::Bytes(b)),
            (ValueKind::Uuid, Value::Uuid(u)) => Ok(Value::Uuid(u)),
            (ValueKind::Uuid, Value::Bytes(b)) => <[u8; 16]>::try_from(b.as_slice())
                .map(Value::Uuid)
                .map_err(|_| Error::type_error("UUID", format!("{} bytes", b.len()))),
            (ValueKind::Uuid, Value::Text(s)) => parse_uuid(&s)
                .map(Value::Uuid)
                .ok_or_else(|| Error::type_error("UUID", s)),
            (_, v) => Err(mismatch(&v)),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<[u8; 16]> for Value {
    fn from(v: [u8; 16]) -> Self {
        Value::Uuid(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerce_widens_and_narrows_integers() {
        assert_eq!(
            ValueKind::BigInt.coerce(Value::Int(7)).unwrap(),
            Value::BigInt(7)
        );
        assert_eq!(
            ValueKind::Int.coerce(Value::BigInt(7)).unwrap(),
            Value::Int(7)
        );
        assert!(ValueKind::Int.coerce(Value::BigInt(i64::MAX)).is_err());
    }

    #[test]
    fn coerce_keeps_null() {
        assert_eq!(ValueKind::Uuid.coerce(Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn coerce_rejects_text_for_numbers() {
        let err = ValueKind::BigInt
            .coerce(Value::Text("x".into()))
            .unwrap_err();
        assert!(matches!(err, Error::Type(_)));
    }

    #[test]
    fn uuid_text_round_trips() {
        let bytes = [
            0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0xf0, 0x01, 0x23, 0x45, 0x67, 0x89, 0xab,
            0xcd, 0xef,
        ];
        let text = format_uuid(&bytes);
        assert_eq!(text, "12345678-9abc-def0-0123-456789abcdef");
        assert_eq!(
            ValueKind::Uuid.coerce(Value::Text(text)).unwrap(),
            Value::Uuid(bytes)
        );
    }

    #[test]
    fn same_as_is_reflexive_for_nan() {
        let nan = Value::Double(f64::NAN);
        assert!(nan.same_as(&nan.clone()));
        assert!(!Value::Int(1).same_as(&Value::BigInt(1)));
    }

    #[test]
    fn json_scalars_map_to_values() {
        assert_eq!(Value::from_json(&serde_json::json!(5)), Value::BigInt(5));
        assert_eq!(
            Value::from_json(&serde_json::json!("a")),
            Value::Text("a".into())
        );
        assert_eq!(Value::from_json(&serde_json::Value::Null), Value::Null);
        assert_eq!(Value::BigInt(5).to_json(), serde_json::json!(5));
    }
}
