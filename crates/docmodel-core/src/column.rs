//! Columns of a document table.

use crate::value::{Value, ValueKind};
use std::fmt;
use std::sync::Arc;

/// Default name of the column holding the serialized document.
pub const DOCUMENT_COLUMN: &str = "Document";
/// Default name of the column holding the concrete type discriminator.
pub const DISCRIMINATOR_COLUMN: &str = "Discriminator";
/// Default name of the optimistic concurrency token column.
pub const ETAG_COLUMN: &str = "Etag";

/// Extracts a column value from an entity's JSON document.
#[derive(Clone)]
pub struct Projection(Arc<dyn Fn(&serde_json::Value) -> Value + Send + Sync>);

impl Projection {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&serde_json::Value) -> Value + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Project the value at a JSON pointer such as `/address/city`.
    pub fn pointer(pointer: impl Into<String>) -> Self {
        let pointer = pointer.into();
        Self::new(move |doc| doc.pointer(&pointer).map_or(Value::Null, Value::from_json))
    }

    pub fn apply(&self, document: &serde_json::Value) -> Value {
        (self.0)(document)
    }
}

impl fmt::Debug for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Projection(..)")
    }
}

/// Role a column plays in a document row.
#[derive(Debug, Clone)]
pub enum ColumnKind {
    /// Part of the primary key. `path` addresses the key member stored
    /// here; `computed` keys are assigned by the database on insert.
    Key { path: Vec<String>, computed: bool },
    /// The serialized JSON document.
    Document,
    /// The concrete type discriminator.
    Discriminator,
    /// Random token replaced on every write and checked on update/delete.
    Etag,
    /// Value derived from the document on every write.
    Projection(Projection),
    /// Value produced by the database; read back, never written.
    Generated,
}

/// A column of a collection's table.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
    pub value_kind: ValueKind,
    pub nullable: bool,
}

impl Column {
    pub fn is_key(&self) -> bool {
        matches!(self.kind, ColumnKind::Key { .. })
    }

    /// Columns whose value comes from the database rather than the session.
    pub fn is_computed(&self) -> bool {
        matches!(
            self.kind,
            ColumnKind::Key { computed: true, .. } | ColumnKind::Generated
        )
    }

    /// Whether an INSERT or UPDATE writes this column.
    pub fn is_written(&self) -> bool {
        !self.is_computed()
    }
}
