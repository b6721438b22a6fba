//! Serializable model snapshots.
//!
//! A [`ModelSnapshot`] is the table layout a [`Schema`] maps to, reduced to
//! what DDL needs. Snapshots are stored as JSON next to the migrations they
//! produced, so the next migration can be computed without a database.

use docmodel_core::error::SchemaErrorKind;
use docmodel_core::{Collection, ColumnKind, Error, Result, Schema, ValueKind};
use serde::{Deserialize, Serialize};

/// Format version written into every snapshot.
pub const SNAPSHOT_VERSION: u32 = 1;

/// A column as the database sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSnapshot {
    pub name: String,
    pub kind: ValueKind,
    #[serde(default)]
    pub nullable: bool,
    /// Assigned by the database on insert.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub identity: bool,
}

impl ColumnSnapshot {
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
            identity: false,
        }
    }

    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    #[must_use]
    pub fn identity(mut self) -> Self {
        self.identity = true;
        self
    }
}

/// One collection's table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub name: String,
    pub columns: Vec<ColumnSnapshot>,
    pub primary_key: Vec<String>,
}

impl TableSnapshot {
    pub fn column(&self, name: &str) -> Option<&ColumnSnapshot> {
        self.columns.iter().find(|c| c.name == name)
    }

    fn from_collection(collection: &Collection) -> Self {
        let columns = collection
            .columns()
            .iter()
            .map(|c| ColumnSnapshot {
                name: c.name.clone(),
                kind: c.value_kind,
                nullable: c.nullable,
                identity: matches!(c.kind, ColumnKind::Key { computed: true, .. }),
            })
            .collect();
        let primary_key = collection
            .columns()
            .iter()
            .filter(|c| c.is_key())
            .map(|c| c.name.clone())
            .collect();
        Self {
            name: collection.name().to_string(),
            columns,
            primary_key,
        }
    }
}

/// Every table of a schema, in registration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub version: u32,
    pub tables: Vec<TableSnapshot>,
}

impl Default for ModelSnapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            tables: Vec::new(),
        }
    }
}

impl ModelSnapshot {
    /// An empty snapshot, the starting point of the first migration.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_schema(schema: &Schema) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            tables: schema
                .collections()
                .iter()
                .map(|c| TableSnapshot::from_collection(c))
                .collect(),
        }
    }

    pub fn table(&self, name: &str) -> Option<&TableSnapshot> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a stored snapshot, rejecting formats this version cannot read.
    pub fn from_json(text: &str) -> Result<Self> {
        let snapshot: Self = serde_json::from_str(text)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(Error::schema(
                SchemaErrorKind::Migration,
                format!(
                    "snapshot version {} is not supported (expected {})",
                    snapshot.version, SNAPSHOT_VERSION
                ),
            ));
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::schema;

    #[test]
    fn schema_columns_become_table_columns() {
        let snapshot = ModelSnapshot::from_schema(&schema());
        let animals = snapshot.table("Animals").unwrap();
        assert_eq!(animals.primary_key, vec!["Id"]);
        let names: Vec<_> = animals.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["Id", "Document", "Discriminator", "Etag"]);

        let counters = snapshot.table("Counters").unwrap();
        assert!(counters.column("Id").unwrap().identity);
    }

    #[test]
    fn snapshot_json_is_stable() {
        let snapshot = ModelSnapshot::from_schema(&schema());
        let text = snapshot.to_json().unwrap();
        assert!(!text.contains("\"identity\": false"));
        assert_eq!(ModelSnapshot::from_json(&text).unwrap(), snapshot);
    }

    #[test]
    fn unknown_version_is_rejected() {
        let err = ModelSnapshot::from_json(r#"{"version": 9, "tables": []}"#).unwrap_err();
        assert!(matches!(err, Error::Schema(e) if e.kind == SchemaErrorKind::Migration));
    }
}
