//! Dirty detection by JSON value equality.
//!
//! A persisted document is dirty when the entity's current serialization is
//! not JSON-equal to the document text stored in its row. Equality is
//! semantic, not textual:
//!
//! - object member order is irrelevant, and an absent member equals `null`
//! - arrays compare element-wise in order
//! - numbers compare by value (`1` equals `1.0`)
//! - `""` is a real value and never equals `null`
//!
//! Fields a serializer leaves out for default values (`#[serde(skip_serializing_if)]`)
//! therefore compare equal to `null` in the stored document.

use docmodel_core::{AnyEntity, Result, Serializer};
use serde_json::{Map, Number, Value as Json};
use std::collections::HashSet;
use std::sync::Arc;

fn numbers_equal(a: &Number, b: &Number) -> bool {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x == y;
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

fn objects_equal(a: &Map<String, Json>, b: &Map<String, Json>, ignored: &HashSet<String>) -> bool {
    let members = a.keys().chain(b.keys().filter(|k| !a.contains_key(*k)));
    for name in members {
        if ignored.contains(name) {
            continue;
        }
        let left = a.get(name).unwrap_or(&Json::Null);
        let right = b.get(name).unwrap_or(&Json::Null);
        if !json_equals(left, right, ignored) {
            return false;
        }
    }
    true
}

/// Compare two JSON values by meaning. Members named in `ignored` are skipped
/// at every object level.
pub fn json_equals(a: &Json, b: &Json, ignored: &HashSet<String>) -> bool {
    match (a, b) {
        (Json::Null, Json::Null) => true,
        (Json::Bool(x), Json::Bool(y)) => x == y,
        (Json::Number(x), Json::Number(y)) => numbers_equal(x, y),
        (Json::String(x), Json::String(y)) => x == y,
        (Json::Array(x), Json::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| json_equals(l, r, ignored))
        }
        (Json::Object(x), Json::Object(y)) => objects_equal(x, y, ignored),
        _ => false,
    }
}

/// Decides whether persisted entities need an update.
#[derive(Clone)]
pub struct ChangeTracker {
    serializer: Arc<dyn Serializer>,
    ignored: HashSet<String>,
}

impl ChangeTracker {
    pub fn new(serializer: Arc<dyn Serializer>) -> Self {
        Self {
            serializer,
            ignored: HashSet::new(),
        }
    }

    /// Skip members with these names when comparing documents.
    pub fn ignore<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignored.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn ignored(&self) -> &HashSet<String> {
        &self.ignored
    }

    /// Has `entity` drifted from the stored document text?
    #[tracing::instrument(level = "trace", skip(self, baseline, entity), fields(entity = entity.rust_type_name()))]
    pub fn has_changed(&self, baseline: &str, entity: &AnyEntity) -> Result<bool> {
        let current = entity.to_document()?;
        let changed = self.document_changed(baseline, &current)?;
        tracing::trace!(dirty = changed, "Dirty check result");
        Ok(changed)
    }

    /// Compare stored document text against an already serialized document.
    ///
    /// The current document goes through the serializer first so both sides
    /// see the same encoding settings.
    pub fn document_changed(&self, baseline: &str, current: &Json) -> Result<bool> {
        let stored = self.serializer.deserialize(baseline)?;
        let current = self
            .serializer
            .deserialize(&self.serializer.serialize(current)?)?;
        Ok(!json_equals(&stored, &current, &self.ignored))
    }
}

impl std::fmt::Debug for ChangeTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeTracker")
            .field("ignored", &self.ignored)
            .finish_non_exhaustive()
    }
}
