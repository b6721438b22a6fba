//! The set of collections known to a session factory.

use crate::Result;
use crate::collection::Collection;
use crate::error::{Error, SchemaErrorKind};
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

/// All collections, indexed by name and by every type they can serve.
#[derive(Debug, Default)]
pub struct Schema {
    collections: Vec<Arc<Collection>>,
    by_name: HashMap<String, usize>,
    by_type: HashMap<TypeId, usize>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    pub fn collections(&self) -> &[Arc<Collection>] {
        &self.collections
    }

    pub fn collection(&self, name: &str) -> Option<&Arc<Collection>> {
        self.by_name.get(name).map(|i| &self.collections[*i])
    }

    /// The collection serving `T`, either as a stored type or as a view.
    pub fn collection_for<T: ?Sized + 'static>(&self) -> Result<&Arc<Collection>> {
        self.collection_for_id(TypeId::of::<T>(), std::any::type_name::<T>())
    }

    pub fn collection_for_id(&self, type_id: TypeId, type_name: &str) -> Result<&Arc<Collection>> {
        self.by_type
            .get(&type_id)
            .map(|i| &self.collections[*i])
            .ok_or_else(|| {
                Error::schema(
                    SchemaErrorKind::UnknownType,
                    format!("no collection stores or views {}", type_name),
                )
            })
    }
}

#[derive(Debug, Default)]
pub struct SchemaBuilder {
    collections: Vec<Collection>,
}

impl SchemaBuilder {
    pub fn collection(mut self, collection: Collection) -> Self {
        self.collections.push(collection);
        self
    }

    pub fn build(self) -> Result<Schema> {
        let mut schema = Schema::default();
        for collection in self.collections {
            let index = schema.collections.len();
            if schema
                .by_name
                .insert(collection.name().to_string(), index)
                .is_some()
            {
                return Err(Error::schema(
                    SchemaErrorKind::DuplicateCollection,
                    format!("collection '{}' registered twice", collection.name()),
                ));
            }
            for (type_id, type_name) in collection.requestable_types() {
                if let Some(other) = schema.by_type.insert(type_id, index) {
                    return Err(Error::schema(
                        SchemaErrorKind::AmbiguousType,
                        format!(
                            "{} is served by both '{}' and '{}'",
                            type_name,
                            schema.collections[other].name(),
                            collection.name()
                        ),
                    ));
                }
            }
            schema.collections.push(Arc::new(collection));
        }
        tracing::info!(collections = schema.collections.len(), "Schema built");
        Ok(schema)
    }
}
