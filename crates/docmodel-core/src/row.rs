//! Result rows as returned by a driver.

use crate::Result;
use crate::error::{Error, TypeError};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Column names of a result set, with a lookup from name to position.
#[derive(Debug, Clone)]
pub struct RowShape {
    names: Vec<String>,
    positions: HashMap<String, usize>,
}

impl RowShape {
    pub fn new(names: Vec<String>) -> Self {
        let mut positions = HashMap::with_capacity(names.len());
        for (position, name) in names.iter().enumerate() {
            // Duplicate names resolve to the first occurrence.
            positions.entry(name.clone()).or_insert(position);
        }
        Self { names, positions }
    }

    pub fn width(&self) -> usize {
        self.names.len()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// One row of a result set. Rows read in the same batch share their shape.
#[derive(Debug, Clone)]
pub struct Row {
    shape: Arc<RowShape>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(column_names: Vec<String>, values: Vec<Value>) -> Self {
        Self::shaped(Arc::new(RowShape::new(column_names)), values)
    }

    pub fn shaped(shape: Arc<RowShape>, values: Vec<Value>) -> Self {
        Self { shape, values }
    }

    pub fn shape(&self) -> &Arc<RowShape> {
        &self.shape
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        let position = self.shape.position(name)?;
        self.values.get(position)
    }

    /// Like [`get_by_name`](Self::get_by_name), but a missing column is a type error.
    pub fn require(&self, name: &str) -> Result<&Value> {
        match self.get_by_name(name) {
            Some(value) => Ok(value),
            None => Err(Error::Type(TypeError {
                expected: "column",
                actual: format!("no column named '{name}'"),
                column: Some(name.to_owned()),
            })),
        }
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.shape.names.iter().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.values.iter()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.column_names().zip(&self.values)
    }
}

/// Serializable form of a result set, used by second-level caches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl RowSet {
    /// Capture rows. All rows are assumed to share the first row's columns.
    pub fn from_rows(rows: &[Row]) -> Self {
        let columns = rows
            .first()
            .map(|r| r.shape.names.clone())
            .unwrap_or_default();
        Self {
            columns,
            rows: rows.iter().map(|r| r.values.clone()).collect(),
        }
    }

    pub fn into_rows(self) -> Vec<Row> {
        let shape = Arc::new(RowShape::new(self.columns));
        self.rows
            .into_iter()
            .map(|values| Row::shaped(Arc::clone(&shape), values))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_access_and_missing_columns() {
        let row = Row::new(
            vec!["Id".into(), "Document".into()],
            vec![Value::BigInt(1), Value::Text("{}".into())],
        );
        assert_eq!(row.get_by_name("Id"), Some(&Value::BigInt(1)));
        assert!(row.get_by_name("Nope").is_none());
        let err = row.require("Nope").unwrap_err();
        assert!(err.to_string().contains("Nope"));
    }

    #[test]
    fn row_set_restores_shared_columns() {
        let shape = Arc::new(RowShape::new(vec!["Id".into()]));
        let rows = vec![
            Row::shaped(Arc::clone(&shape), vec![Value::BigInt(1)]),
            Row::shaped(Arc::clone(&shape), vec![Value::BigInt(2)]),
        ];
        let restored = RowSet::from_rows(&rows).into_rows();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored[1].get_by_name("Id"), Some(&Value::BigInt(2)));
        assert!(Arc::ptr_eq(restored[0].shape(), restored[1].shape()));
        assert_eq!(restored[0].shape().width(), 1);
    }

    #[test]
    fn empty_row_set() {
        let set = RowSet::from_rows(&[]);
        assert!(set.columns.is_empty());
        assert!(set.into_rows().is_empty());
    }
}
