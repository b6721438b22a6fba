//! Building keys from row values and splitting keys back into columns.
//!
//! Each key column carries a member path relative to the key. The factory
//! folds those paths into a tree once, when the collection is defined, and
//! then evaluates the tree against row values.

use crate::Result;
use crate::error::{Error, SchemaErrorKind};
use crate::key::{Key, KeyShape, KeyValue};
use crate::value::{Value, ValueKind};

/// A key column as seen by the key factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyColumn {
    /// Position of the column in the collection's column list.
    pub column: usize,
    /// Member path from the key to the scalar stored in this column.
    pub path: Vec<String>,
    pub kind: ValueKind,
}

#[derive(Debug, Clone)]
enum KeyNode {
    Leaf {
        column: usize,
        kind: ValueKind,
    },
    Node {
        primitive: bool,
        children: Vec<(String, KeyNode)>,
    },
}

impl KeyNode {
    fn build(entries: &[(&KeyColumn, &[String])], primitive: bool) -> Result<Self> {
        if let [(column, path)] = entries {
            if path.is_empty() {
                return Ok(KeyNode::Leaf {
                    column: column.column,
                    kind: column.kind,
                });
            }
        }

        let mut groups: Vec<(&str, Vec<(&KeyColumn, &[String])>)> = Vec::new();
        for &(column, path) in entries {
            let Some((head, rest)) = path.split_first() else {
                return Err(Error::schema(
                    SchemaErrorKind::Invalid,
                    "key column paths conflict: one path is a prefix of another",
                ));
            };
            match groups.iter_mut().find(|(name, _)| *name == head.as_str()) {
                Some((_, members)) => members.push((column, rest)),
                None => groups.push((head.as_str(), vec![(column, rest)])),
            }
        }

        if primitive && groups.len() != 1 {
            return Err(Error::schema(
                SchemaErrorKind::Invalid,
                "a primitive key maps to exactly one column",
            ));
        }

        let children = groups
            .into_iter()
            .map(|(name, members)| Ok((name.to_string(), KeyNode::build(&members, false)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(KeyNode::Node {
            primitive,
            children,
        })
    }

    fn create(&self, row: &[Value]) -> Result<KeyValue> {
        match self {
            KeyNode::Leaf { column, kind } => {
                let raw = row.get(*column).cloned().ok_or_else(|| {
                    Error::type_error("key column", format!("row has no column {}", column))
                })?;
                Ok(KeyValue::Scalar(kind.coerce(raw)?))
            }
            KeyNode::Node {
                primitive: true,
                children,
            } if children.len() == 1 => children[0].1.create(row),
            KeyNode::Node { children, .. } => {
                let members = children
                    .iter()
                    .map(|(name, child)| Ok((name.clone(), child.create(row)?)))
                    .collect::<Result<Vec<_>>>()?;
                Ok(KeyValue::Composite(members))
            }
        }
    }
}

#[derive(Debug, Clone)]
enum Builder {
    Members(KeyNode),
    /// One independent factory per tuple slot, combined positionally.
    Tuple(Vec<(String, KeyNode)>),
}

/// Builds keys from row values and decomposes keys into column values.
#[derive(Debug, Clone)]
pub struct KeyFactory {
    shape: KeyShape,
    columns: Vec<KeyColumn>,
    builder: Builder,
}

impl KeyFactory {
    /// Prepare a factory for a key of the given shape.
    pub fn new(shape: KeyShape, columns: Vec<KeyColumn>) -> Result<Self> {
        if columns.is_empty() {
            return Err(Error::schema(
                SchemaErrorKind::Invalid,
                "a collection needs at least one key column",
            ));
        }
        for (i, a) in columns.iter().enumerate() {
            if columns[i + 1..].iter().any(|b| b.path == a.path) {
                return Err(Error::schema(
                    SchemaErrorKind::Invalid,
                    format!("key member path '{}' is mapped twice", a.path.join(".")),
                ));
            }
        }

        let builder = match shape {
            KeyShape::Tuple(arity) => Builder::Tuple(Self::tuple_slots(arity, &columns)?),
            KeyShape::Primitive | KeyShape::Composite => {
                let entries: Vec<_> = columns.iter().map(|c| (c, c.path.as_slice())).collect();
                Builder::Members(KeyNode::build(
                    &entries,
                    shape == KeyShape::Primitive,
                )?)
            }
        };

        Ok(Self {
            shape,
            columns,
            builder,
        })
    }

    fn tuple_slots(arity: usize, columns: &[KeyColumn]) -> Result<Vec<(String, KeyNode)>> {
        (0..arity)
            .map(|slot| {
                let name = slot.to_string();
                let entries: Vec<_> = columns
                    .iter()
                    .filter(|c| c.path.first() == Some(&name))
                    .map(|c| (c, &c.path[1..]))
                    .collect();
                if entries.is_empty() {
                    return Err(Error::schema(
                        SchemaErrorKind::Invalid,
                        format!("tuple key slot {} has no column", slot),
                    ));
                }
                Ok((name, KeyNode::build(&entries, false)?))
            })
            .collect::<Result<Vec<_>>>()
            .and_then(|slots| {
                let mapped: usize = slots.len();
                let stray = columns.iter().any(|c| {
                    c.path
                        .first()
                        .and_then(|p| p.parse::<usize>().ok())
                        .is_none_or(|i| i >= mapped)
                });
                if stray {
                    Err(Error::schema(
                        SchemaErrorKind::Invalid,
                        "tuple key column path must start with a slot index",
                    ))
                } else {
                    Ok(slots)
                }
            })
    }

    pub fn shape(&self) -> KeyShape {
        self.shape
    }

    pub fn columns(&self) -> &[KeyColumn] {
        &self.columns
    }

    /// Build the structural key from a full row of column values.
    pub fn create(&self, row: &[Value]) -> Result<KeyValue> {
        match &self.builder {
            Builder::Members(root) => root.create(row),
            Builder::Tuple(slots) => {
                let members = slots
                    .iter()
                    .map(|(name, node)| Ok((name.clone(), node.create(row)?)))
                    .collect::<Result<Vec<_>>>()?;
                Ok(KeyValue::Composite(members))
            }
        }
    }

    /// Build a typed key from a full row of column values.
    pub fn create_key<K: Key>(&self, row: &[Value]) -> Result<K> {
        K::from_key_value(self.create(row)?)
    }

    /// Value of one key column for a given key.
    pub fn key_column_value(&self, key: &KeyValue, column: &KeyColumn) -> Result<Value> {
        let value = key.at_path(&column.path).cloned().ok_or_else(|| {
            Error::type_error(
                "key member",
                format!("key has no member '{}'", column.path.join(".")),
            )
        })?;
        column.kind.coerce(value)
    }

    /// All key column values for a key, in key-column order.
    pub fn decompose(&self, key: &KeyValue) -> Result<Vec<Value>> {
        self.columns
            .iter()
            .map(|c| self.key_column_value(key, c))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyMembers;

    fn col(column: usize, path: &[&str], kind: ValueKind) -> KeyColumn {
        KeyColumn {
            column,
            path: path.iter().map(|s| (*s).to_string()).collect(),
            kind,
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct Region {
        country: String,
        zone: i32,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct SiteId {
        region: Region,
        number: i64,
    }

    impl Key for Region {
        const SHAPE: KeyShape = KeyShape::Composite;
        fn to_key_value(&self) -> KeyValue {
            KeyValue::composite([
                ("country", self.country.to_key_value()),
                ("zone", self.zone.to_key_value()),
            ])
        }
        fn from_key_value(value: KeyValue) -> Result<Self> {
            let mut m: KeyMembers = value.into_members()?;
            Ok(Self {
                country: m.take("country")?,
                zone: m.take("zone")?,
            })
        }
    }

    impl Key for SiteId {
        const SHAPE: KeyShape = KeyShape::Composite;
        fn to_key_value(&self) -> KeyValue {
            KeyValue::composite([
                ("region", self.region.to_key_value()),
                ("number", self.number.to_key_value()),
            ])
        }
        fn from_key_value(value: KeyValue) -> Result<Self> {
            let mut m = value.into_members()?;
            Ok(Self {
                region: m.take("region")?,
                number: m.take("number")?,
            })
        }
    }

    #[test]
    fn primitive_key_short_circuits_named_column() {
        let factory = KeyFactory::new(
            KeyShape::Primitive,
            vec![col(0, &["Id"], ValueKind::BigInt)],
        )
        .unwrap();
        let key: i64 = factory.create_key(&[Value::Int(12)]).unwrap();
        assert_eq!(key, 12);
        assert_eq!(
            factory.decompose(&key.to_key_value()).unwrap(),
            vec![Value::BigInt(12)]
        );
    }

    #[test]
    fn nested_members_share_one_node() {
        let factory = KeyFactory::new(
            KeyShape::Composite,
            vec![
                col(0, &["region", "country"], ValueKind::Text),
                col(2, &["number"], ValueKind::BigInt),
                col(1, &["region", "zone"], ValueKind::Int),
            ],
        )
        .unwrap();
        let row = [Value::Text("NO".into()), Value::BigInt(3), Value::Int(44)];
        let key: SiteId = factory.create_key(&row).unwrap();
        assert_eq!(
            key,
            SiteId {
                region: Region {
                    country: "NO".into(),
                    zone: 3
                },
                number: 44
            }
        );
        assert_eq!(
            factory.decompose(&key.to_key_value()).unwrap(),
            vec![Value::Text("NO".into()), Value::BigInt(44), Value::Int(3)]
        );
    }

    #[test]
    fn tuple_keys_combine_slots() {
        let factory = KeyFactory::new(
            KeyShape::Tuple(2),
            vec![
                col(0, &["0"], ValueKind::Int),
                col(1, &["1", "country"], ValueKind::Text),
                col(2, &["1", "zone"], ValueKind::Int),
            ],
        )
        .unwrap();
        let row = [Value::BigInt(1), Value::Text("SE".into()), Value::Int(2)];
        let key: (i32, Region) = factory.create_key(&row).unwrap();
        assert_eq!(
            key,
            (
                1,
                Region {
                    country: "SE".into(),
                    zone: 2
                }
            )
        );
    }

    #[test]
    fn tuple_slot_without_column_is_rejected() {
        let err = KeyFactory::new(KeyShape::Tuple(2), vec![col(0, &["0"], ValueKind::Int)])
            .unwrap_err();
        assert!(err.to_string().contains("slot 1"));
    }

    #[test]
    fn duplicate_and_prefix_paths_are_rejected() {
        assert!(
            KeyFactory::new(
                KeyShape::Composite,
                vec![col(0, &["a"], ValueKind::Int), col(1, &["a"], ValueKind::Int)],
            )
            .is_err()
        );
        assert!(
            KeyFactory::new(
                KeyShape::Composite,
                vec![
                    col(0, &["a"], ValueKind::Int),
                    col(1, &["a", "b"], ValueKind::Int)
                ],
            )
            .is_err()
        );
    }

    #[test]
    fn create_coerces_driver_values() {
        let factory =
            KeyFactory::new(KeyShape::Primitive, vec![col(0, &[], ValueKind::Int)]).unwrap();
        assert!(factory.create(&[Value::Text("x".into())]).is_err());
        let key: i32 = factory.create_key(&[Value::BigInt(9)]).unwrap();
        assert_eq!(key, 9);
    }
}
