//! Document keys.
//!
//! A key is either a single scalar or a value object made of named members,
//! possibly nested. Keys convert to and from a [`KeyValue`] tree so the key
//! factory can build them from row columns without reflection.

use crate::Result;
use crate::error::Error;
use crate::value::Value;
use std::fmt::Debug;
use std::hash::Hash;

/// Structural representation of a key.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyValue {
    /// A single column value.
    Scalar(Value),
    /// Named members of a value-object key, in declaration order.
    Composite(Vec<(String, KeyValue)>),
}

impl KeyValue {
    /// Build a composite key from `(member, value)` pairs.
    pub fn composite<I, S>(members: I) -> Self
    where
        I: IntoIterator<Item = (S, KeyValue)>,
        S: Into<String>,
    {
        KeyValue::Composite(members.into_iter().map(|(n, v)| (n.into(), v)).collect())
    }

    /// Look up a direct member.
    pub fn member(&self, name: &str) -> Option<&KeyValue> {
        match self {
            KeyValue::Composite(members) => {
                members.iter().find(|(n, _)| n == name).map(|(_, v)| v)
            }
            KeyValue::Scalar(_) => None,
        }
    }

    /// Follow a member path. A scalar reached before the path ends answers
    /// for the rest of the path, which is how a primitive key is addressed
    /// through a named key column.
    pub fn at_path(&self, path: &[String]) -> Option<&Value> {
        match (self, path.split_first()) {
            (KeyValue::Scalar(v), _) => Some(v),
            (KeyValue::Composite(_), None) => None,
            (KeyValue::Composite(_), Some((head, rest))) => {
                self.member(head).and_then(|m| m.at_path(rest))
            }
        }
    }

    /// Unwrap a scalar key.
    pub fn into_scalar(self) -> Result<Value> {
        match self {
            KeyValue::Scalar(v) => Ok(v),
            KeyValue::Composite(members) => Err(Error::type_error(
                "scalar key",
                format!("composite key with {} members", members.len()),
            )),
        }
    }

    /// Open a composite key for member-by-member extraction.
    pub fn into_members(self) -> Result<KeyMembers> {
        match self {
            KeyValue::Composite(members) => Ok(KeyMembers { members }),
            KeyValue::Scalar(v) => Err(Error::type_error("composite key", v.type_name())),
        }
    }
}

/// Members of a composite key being consumed by [`Key::from_key_value`].
#[derive(Debug)]
pub struct KeyMembers {
    members: Vec<(String, KeyValue)>,
}

impl KeyMembers {
    /// Remove a member and convert it to its key type.
    pub fn take<K: Key>(&mut self, name: &str) -> Result<K> {
        let pos = self
            .members
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| Error::type_error("key member", format!("missing member '{}'", name)))?;
        let (_, value) = self.members.remove(pos);
        K::from_key_value(value).map_err(|e| e.in_column(name))
    }
}

/// How a key type is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyShape {
    /// A single scalar.
    Primitive,
    /// A value object with named members.
    Composite,
    /// A tuple; members are named `"0"`, `"1"`, ...
    Tuple(usize),
}

/// A type usable as a document key.
///
/// Implemented for the common scalars and tuples. Value-object keys
/// implement it by listing their members:
///
/// ```ignore
/// impl Key for OrderId {
///     const SHAPE: KeyShape = KeyShape::Composite;
///     fn to_key_value(&self) -> KeyValue {
///         KeyValue::composite([
///             ("tenant", self.tenant.to_key_value()),
///             ("number", self.number.to_key_value()),
///         ])
///     }
///     fn from_key_value(value: KeyValue) -> Result<Self> {
///         let mut m = value.into_members()?;
///         Ok(Self { tenant: m.take("tenant")?, number: m.take("number")? })
///     }
/// }
/// ```
pub trait Key: Clone + Eq + Hash + Debug + Send + Sync + 'static {
    const SHAPE: KeyShape;

    fn to_key_value(&self) -> KeyValue;

    fn from_key_value(value: KeyValue) -> Result<Self>;
}

macro_rules! scalar_key {
    ($ty:ty, $variant:ident, $expected:literal) => {
        impl Key for $ty {
            const SHAPE: KeyShape = KeyShape::Primitive;

            fn to_key_value(&self) -> KeyValue {
                KeyValue::Scalar(Value::$variant(self.clone()))
            }

            fn from_key_value(value: KeyValue) -> Result<Self> {
                match value.into_scalar()? {
                    Value::$variant(v) => Ok(v),
                    other => Err(Error::type_error($expected, other.type_name())),
                }
            }
        }
    };
}

scalar_key!(i32, Int, "i32");
scalar_key!(bool, Bool, "bool");
scalar_key!(String, Text, "String");
scalar_key!([u8; 16], Uuid, "uuid");

impl Key for i64 {
    const SHAPE: KeyShape = KeyShape::Primitive;

    fn to_key_value(&self) -> KeyValue {
        KeyValue::Scalar(Value::BigInt(*self))
    }

    fn from_key_value(value: KeyValue) -> Result<Self> {
        match value.into_scalar()? {
            Value::BigInt(v) => Ok(v),
            Value::Int(v) => Ok(i64::from(v)),
            other => Err(Error::type_error("i64", other.type_name())),
        }
    }
}

impl<A: Key, B: Key> Key for (A, B) {
    const SHAPE: KeyShape = KeyShape::Tuple(2);

    fn to_key_value(&self) -> KeyValue {
        KeyValue::composite([("0", self.0.to_key_value()), ("1", self.1.to_key_value())])
    }

    fn from_key_value(value: KeyValue) -> Result<Self> {
        let mut m = value.into_members()?;
        Ok((m.take("0")?, m.take("1")?))
    }
}

impl<A: Key, B: Key, C: Key> Key for (A, B, C) {
    const SHAPE: KeyShape = KeyShape::Tuple(3);

    fn to_key_value(&self) -> KeyValue {
        KeyValue::composite([
            ("0", self.0.to_key_value()),
            ("1", self.1.to_key_value()),
            ("2", self.2.to_key_value()),
        ])
    }

    fn from_key_value(value: KeyValue) -> Result<Self> {
        let mut m = value.into_members()?;
        Ok((m.take("0")?, m.take("1")?, m.take("2")?))
    }
}

/// Render key column values for messages and cache keys.
pub fn render_key(values: &[Value]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("|")
}
