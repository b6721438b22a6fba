//! Immutable column snapshots of stored documents.

use crate::Result;
use crate::collection::Collection;
use crate::column::ColumnKind;
use crate::entity::AnyEntity;
use crate::error::Error;
use crate::key::KeyValue;
use crate::row::Row;
use crate::serializer::Serializer;
use crate::value::Value;
use std::sync::Arc;

/// One row of a collection's table, with values in column order.
///
/// Rows never change; "updating" a row produces a new one.
#[derive(Debug, Clone)]
pub struct DatabaseRow {
    collection: Arc<Collection>,
    values: Arc<[Value]>,
}

impl DatabaseRow {
    pub fn new(collection: Arc<Collection>, values: Vec<Value>) -> Result<Self> {
        if values.len() != collection.columns().len() {
            return Err(Error::type_error(
                "row for collection",
                format!(
                    "{} values for {} columns of '{}'",
                    values.len(),
                    collection.columns().len(),
                    collection.name()
                ),
            ));
        }
        Ok(Self {
            collection,
            values: values.into(),
        })
    }

    /// Read a driver row, coercing each column to its declared kind.
    pub fn from_row(collection: &Arc<Collection>, row: &Row) -> Result<Self> {
        let values = collection
            .columns()
            .iter()
            .map(|c| {
                let raw = row.require(&c.name)?.clone();
                c.value_kind.coerce(raw).map_err(|e| e.in_column(&c.name))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(Arc::clone(collection), values)
    }

    pub fn collection(&self) -> &Arc<Collection> {
        &self.collection
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.collection
            .column_index(column)
            .and_then(|i| self.values.get(i))
    }

    /// Text column value; errors name the column as configured.
    fn text_at(&self, index: usize, expected: &'static str) -> Result<&str> {
        let name = self
            .collection
            .columns()
            .get(index)
            .map_or("?", |c| c.name.as_str());
        match self.values.get(index) {
            Some(value) => value
                .as_str()
                .ok_or_else(|| Error::type_error(expected, "NULL").in_column(name)),
            None => Err(Error::type_error(expected, "missing column").in_column(name)),
        }
    }

    pub fn document(&self) -> Result<&str> {
        self.text_at(self.collection.document_index(), "document text")
    }

    pub fn discriminator(&self) -> Result<&str> {
        self.text_at(self.collection.discriminator_index(), "discriminator")
    }

    pub fn etag(&self) -> Option<&Value> {
        self.collection
            .etag_index()
            .and_then(|i| self.values.get(i))
    }

    /// Key column values in key-column order.
    pub fn key_values(&self) -> Vec<Value> {
        self.collection
            .key_columns()
            .iter()
            .map(|k| self.values.get(k.column).cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// Rebuild the structural key from this row.
    pub fn key(&self) -> Result<KeyValue> {
        self.collection.key_factory().create(&self.values)
    }

    /// Copy of this row with one column replaced.
    pub fn with_value(&self, index: usize, value: Value) -> Result<Self> {
        let mut values = self.values.to_vec();
        let slot = values.get_mut(index).ok_or_else(|| {
            Error::type_error("column index", format!("{} out of range", index))
        })?;
        *slot = value;
        Self::new(Arc::clone(&self.collection), values)
    }
}

/// Builds rows from entities.
#[derive(Clone)]
pub struct RowFactory {
    serializer: Arc<dyn Serializer>,
}

impl RowFactory {
    pub fn new(serializer: Arc<dyn Serializer>) -> Self {
        Self { serializer }
    }

    pub fn serializer(&self) -> &Arc<dyn Serializer> {
        &self.serializer
    }

    /// A fresh concurrency token.
    pub fn new_etag() -> Value {
        Value::Uuid(rand::random())
    }

    /// Snapshot an entity as a row. `etag` is ignored when the collection
    /// has no etag column.
    pub fn create_row(
        &self,
        collection: &Arc<Collection>,
        entity: &AnyEntity,
        etag: Value,
    ) -> Result<DatabaseRow> {
        let document = entity.to_document()?;
        self.create_row_from_document(collection, entity, &document, etag)
    }

    /// Snapshot an entity whose document is already serialized to JSON.
    pub fn create_row_from_document(
        &self,
        collection: &Arc<Collection>,
        entity: &AnyEntity,
        document: &serde_json::Value,
        etag: Value,
    ) -> Result<DatabaseRow> {
        let key = entity.key_value()?;
        let key_values = collection.key_values_of(&key)?;
        let text = self.serializer.serialize(document)?;

        let mut key_values = key_values.into_iter();
        let mut etag = Some(etag);
        let values = collection
            .columns()
            .iter()
            .map(|column| match &column.kind {
                ColumnKind::Key { .. } => key_values.next().unwrap_or(Value::Null),
                ColumnKind::Document => Value::Text(text.clone()),
                ColumnKind::Discriminator => Value::Text(entity.discriminator().to_string()),
                ColumnKind::Etag => etag.take().unwrap_or(Value::Null),
                ColumnKind::Projection(projection) => projection.apply(document),
                ColumnKind::Generated => Value::Null,
            })
            .collect();
        DatabaseRow::new(Arc::clone(collection), values)
    }
}

impl std::fmt::Debug for RowFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowFactory").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::Projection;
    use crate::entity::{Entity, entity_ref};
    use crate::serializer::JsonSerializer;
    use crate::value::ValueKind;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Order {
        id: i64,
        total: f64,
    }

    impl Entity for Order {
        type Key = i64;
        const TYPE_NAME: &'static str = "Order";
        fn key(&self) -> i64 {
            self.id
        }
    }

    fn orders() -> Arc<Collection> {
        Arc::new(
            Collection::builder::<Order>("Orders")
                .key("Id", ValueKind::BigInt)
                .etag()
                .project("Total", ValueKind::Double, Projection::pointer("/total"))
                .generated("CreatedAt", ValueKind::Text)
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn create_row_fills_every_column() {
        let collection = orders();
        let factory = RowFactory::new(Arc::new(JsonSerializer::new()));
        let entity = AnyEntity::new(entity_ref(Order { id: 4, total: 2.5 }));
        let etag = RowFactory::new_etag();
        let row = factory
            .create_row(&collection, &entity, etag.clone())
            .unwrap();
        assert_eq!(row.key_values(), vec![Value::BigInt(4)]);
        assert_eq!(row.document().unwrap(), r#"{"id":4,"total":2.5}"#);
        assert_eq!(row.discriminator().unwrap(), "Order");
        assert_eq!(row.etag(), Some(&etag));
        assert_eq!(row.get("Total"), Some(&Value::Double(2.5)));
        assert_eq!(row.get("CreatedAt"), Some(&Value::Null));
        assert_eq!(row.key().unwrap(), KeyValue::Scalar(Value::BigInt(4)));
    }

    #[test]
    fn from_row_coerces_and_requires_columns() {
        let collection = orders();
        let row = Row::new(
            vec![
                "Id".into(),
                "Document".into(),
                "Discriminator".into(),
                "Etag".into(),
                "Total".into(),
                "CreatedAt".into(),
            ],
            vec![
                Value::Int(4),
                Value::Text("{}".into()),
                Value::Text("Order".into()),
                Value::Null,
                Value::Int(3),
                Value::Text("now".into()),
            ],
        );
        let db = DatabaseRow::from_row(&collection, &row).unwrap();
        assert_eq!(db.key_values(), vec![Value::BigInt(4)]);
        assert_eq!(db.get("Total"), Some(&Value::Double(3.0)));

        let short = Row::new(vec!["Id".into()], vec![Value::Int(4)]);
        assert!(DatabaseRow::from_row(&collection, &short).is_err());
    }

    #[test]
    fn with_value_leaves_original_untouched() {
        let collection = orders();
        let factory = RowFactory::new(Arc::new(JsonSerializer::new()));
        let entity = AnyEntity::new(entity_ref(Order { id: 1, total: 1.0 }));
        let row = factory.create_row(&collection, &entity, Value::Null).unwrap();
        let patched = row.with_value(0, Value::BigInt(99)).unwrap();
        assert_eq!(row.key_values(), vec![Value::BigInt(1)]);
        assert_eq!(patched.key_values(), vec![Value::BigInt(99)]);
        assert!(row.with_value(42, Value::Null).is_err());
    }

    #[test]
    fn null_document_error_names_the_configured_column() {
        let collection = Arc::new(
            Collection::builder::<Order>("Orders")
                .key("Id", ValueKind::BigInt)
                .document_column("Body")
                .build()
                .unwrap(),
        );
        let mut values = vec![Value::Null; collection.columns().len()];
        values[0] = Value::BigInt(1);
        let row = DatabaseRow::new(Arc::clone(&collection), values).unwrap();
        let err = row.document().unwrap_err().to_string();
        assert!(err.contains("'Body'"), "{err}");
        assert!(row.discriminator().is_err());
    }
}
