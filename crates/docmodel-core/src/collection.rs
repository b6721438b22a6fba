//! Collection definitions: one table of JSON documents per collection.
//!
//! A collection has a base entity type, optional subtypes stored in the same
//! table, and views: trait objects (or other types) the stored entities can
//! be viewed as. Lookups through a view match every stored type registered
//! for it, which is how a session answers "give me any `dyn Animal` with
//! this key".

use crate::Result;
use crate::column::{
    Column, ColumnKind, DISCRIMINATOR_COLUMN, DOCUMENT_COLUMN, ETAG_COLUMN, Projection,
};
use crate::entity::{AnyEntity, Entity, EntityRef};
use crate::error::{Error, SchemaErrorKind, TypeMismatchError};
use crate::key::{Key, KeyValue};
use crate::key_factory::{KeyColumn, KeyFactory};
use crate::value::{Value, ValueKind};
use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

type Cast = Arc<dyn Fn(&AnyEntity) -> Option<Box<dyn Any + Send + Sync>> + Send + Sync>;

/// A concrete entity type stored in a collection.
#[derive(Clone)]
pub struct EntityType {
    pub type_id: TypeId,
    pub rust_name: &'static str,
    pub discriminator: &'static str,
    materialize: fn(serde_json::Value) -> Result<AnyEntity>,
}

impl EntityType {
    fn of<T: Entity>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            rust_name: std::any::type_name::<T>(),
            discriminator: T::TYPE_NAME,
            materialize: AnyEntity::materialize::<T>,
        }
    }

    /// Deserialize a stored document into a new entity of this type.
    pub fn materialize(&self, document: serde_json::Value) -> Result<AnyEntity> {
        (self.materialize)(document)
    }
}

impl fmt::Debug for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityType")
            .field("rust_name", &self.rust_name)
            .field("discriminator", &self.discriminator)
            .finish()
    }
}

/// A database-assigned key and where it lives inside the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputedKey {
    /// Index of the key column.
    pub column: usize,
    /// Member path of the key inside the JSON document.
    pub document_path: Vec<String>,
}

/// A collection: table layout, key mapping and the types stored in it.
pub struct Collection {
    name: String,
    columns: Vec<Column>,
    column_index: HashMap<String, usize>,
    key_factory: KeyFactory,
    document: usize,
    discriminator: usize,
    etag: Option<usize>,
    computed_key: Option<ComputedKey>,
    key_type: TypeId,
    key_type_name: &'static str,
    entity_types: Vec<EntityType>,
    casts: HashMap<(TypeId, TypeId), Cast>,
    type_names: HashMap<TypeId, &'static str>,
}

impl Collection {
    /// Start a collection whose base entity type is `T`.
    pub fn builder<T: Entity>(name: impl Into<String>) -> CollectionBuilder<T::Key> {
        CollectionBuilder::new(name.into()).subtype::<T>()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.column_index(name).map(|i| &self.columns[i])
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.column_index.get(name).copied()
    }

    pub fn key_factory(&self) -> &KeyFactory {
        &self.key_factory
    }

    pub fn key_columns(&self) -> &[KeyColumn] {
        self.key_factory.columns()
    }

    pub fn document_index(&self) -> usize {
        self.document
    }

    pub fn discriminator_index(&self) -> usize {
        self.discriminator
    }

    pub fn etag_index(&self) -> Option<usize> {
        self.etag
    }

    pub fn computed_key(&self) -> Option<&ComputedKey> {
        self.computed_key.as_ref()
    }

    pub fn key_type_name(&self) -> &'static str {
        self.key_type_name
    }

    /// Fail unless `K` is this collection's key type.
    pub fn check_key_type<K: Key>(&self) -> Result<()> {
        if TypeId::of::<K>() == self.key_type {
            Ok(())
        } else {
            Err(Error::type_error(
                self.key_type_name,
                format!(
                    "{} used as key for '{}'",
                    std::any::type_name::<K>(),
                    self.name
                ),
            ))
        }
    }

    /// Key column values of a typed key.
    pub fn key_values<K: Key>(&self, key: &K) -> Result<Vec<Value>> {
        self.check_key_type::<K>()?;
        self.key_factory.decompose(&key.to_key_value())
    }

    /// Key column values of a structural key.
    pub fn key_values_of(&self, key: &KeyValue) -> Result<Vec<Value>> {
        self.key_factory.decompose(key)
    }

    pub fn entity_types(&self) -> &[EntityType] {
        &self.entity_types
    }

    pub fn entity_type_by_discriminator(&self, discriminator: &str) -> Result<&EntityType> {
        self.entity_types
            .iter()
            .find(|t| t.discriminator == discriminator)
            .ok_or_else(|| {
                Error::schema(
                    SchemaErrorKind::UnknownType,
                    format!(
                        "collection '{}' has no type with discriminator '{}'",
                        self.name, discriminator
                    ),
                )
            })
    }

    /// Every type that can be requested from this collection.
    pub fn requestable_types(&self) -> impl Iterator<Item = (TypeId, &'static str)> + '_ {
        self.type_names.iter().map(|(id, name)| (*id, *name))
    }

    /// Discriminators of stored types viewable as `requested`.
    ///
    /// `None` means every stored type qualifies and no filter is needed.
    pub fn discriminators_for(&self, requested: TypeId) -> Option<Vec<&'static str>> {
        let matching: Vec<_> = self
            .entity_types
            .iter()
            .filter(|t| self.casts.contains_key(&(t.type_id, requested)))
            .map(|t| t.discriminator)
            .collect();
        if matching.len() == self.entity_types.len() {
            None
        } else {
            Some(matching)
        }
    }

    /// Whether an entity can be viewed as `T`.
    pub fn can_cast<T: ?Sized + 'static>(&self, entity: &AnyEntity) -> bool {
        self.casts
            .contains_key(&(entity.concrete_type(), TypeId::of::<T>()))
    }

    /// View an entity as `T`, failing with a type mismatch when `T` is not
    /// one of the entity's registered views.
    pub fn cast<T: ?Sized + 'static>(&self, entity: &AnyEntity) -> Result<EntityRef<T>> {
        let mismatch = || {
            Error::TypeMismatch(TypeMismatchError {
                collection: self.name.clone(),
                actual: entity.rust_type_name(),
                requested: std::any::type_name::<T>(),
            })
        };
        let cast = self
            .casts
            .get(&(entity.concrete_type(), TypeId::of::<T>()))
            .ok_or_else(mismatch)?;
        let boxed = cast(entity).ok_or_else(mismatch)?;
        boxed
            .downcast::<EntityRef<T>>()
            .map(|b| *b)
            .map_err(|_| mismatch())
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("columns", &self.columns)
            .field("entity_types", &self.entity_types)
            .finish_non_exhaustive()
    }
}

enum Extra {
    Projection(String, ValueKind, Projection),
    Generated(String, ValueKind),
}

/// Builder for [`Collection`]. Validation happens in [`build`](Self::build).
pub struct CollectionBuilder<K: Key> {
    name: String,
    keys: Vec<(String, Vec<String>, ValueKind)>,
    computed_key: Option<Vec<String>>,
    etag: bool,
    document_column: String,
    extras: Vec<Extra>,
    entity_types: Vec<EntityType>,
    casts: HashMap<(TypeId, TypeId), Cast>,
    type_names: HashMap<TypeId, &'static str>,
    _key: PhantomData<fn() -> K>,
}

impl<K: Key> CollectionBuilder<K> {
    fn new(name: String) -> Self {
        Self {
            name,
            keys: Vec::new(),
            computed_key: None,
            etag: false,
            document_column: DOCUMENT_COLUMN.to_string(),
            extras: Vec::new(),
            entity_types: Vec::new(),
            casts: HashMap::new(),
            type_names: HashMap::new(),
            _key: PhantomData,
        }
    }

    fn register_cast<D: Entity, V: ?Sized + Send + Sync + 'static>(
        &mut self,
        upcast: fn(EntityRef<D>) -> EntityRef<V>,
    ) {
        let cast: Cast = Arc::new(move |entity: &AnyEntity| {
            entity
                .downcast::<D>()
                .map(|e| Box::new(upcast(e)) as Box<dyn Any + Send + Sync>)
        });
        self.casts.insert((TypeId::of::<D>(), TypeId::of::<V>()), cast);
        self.type_names
            .insert(TypeId::of::<V>(), std::any::type_name::<V>());
    }

    /// Store another concrete type in this collection.
    pub fn subtype<D: Entity<Key = K>>(mut self) -> Self {
        self.entity_types.push(EntityType::of::<D>());
        self.register_cast::<D, D>(|e| e);
        self
    }

    /// Make entities of type `D` loadable as `V`.
    ///
    /// ```ignore
    /// builder.view::<Dog, dyn Animal>(|dog| dog)
    /// ```
    pub fn view<D, V>(mut self, upcast: fn(EntityRef<D>) -> EntityRef<V>) -> Self
    where
        D: Entity<Key = K>,
        V: ?Sized + Send + Sync + 'static,
    {
        self.register_cast::<D, V>(upcast);
        self
    }

    /// Map a primitive key to a single column.
    pub fn key(self, column: impl Into<String>, kind: ValueKind) -> Self {
        self.key_member(column, &[], kind)
    }

    /// Map one member of a value-object or tuple key to a column.
    pub fn key_member(mut self, column: impl Into<String>, path: &[&str], kind: ValueKind) -> Self {
        self.keys.push((
            column.into(),
            path.iter().map(|s| (*s).to_string()).collect(),
            kind,
        ));
        self
    }

    /// Let the database assign the key on insert. `document_path` names the
    /// member of the JSON document that receives the assigned value.
    pub fn computed_key(
        mut self,
        column: impl Into<String>,
        kind: ValueKind,
        document_path: &[&str],
    ) -> Self {
        self.keys.push((column.into(), Vec::new(), kind));
        self.computed_key = Some(document_path.iter().map(|s| (*s).to_string()).collect());
        self
    }

    /// Add an etag column used for optimistic concurrency.
    pub fn etag(mut self) -> Self {
        self.etag = true;
        self
    }

    pub fn document_column(mut self, name: impl Into<String>) -> Self {
        self.document_column = name.into();
        self
    }

    /// Add a column filled from the document on every write.
    pub fn project(mut self, column: impl Into<String>, kind: ValueKind, projection: Projection) -> Self {
        self.extras
            .push(Extra::Projection(column.into(), kind, projection));
        self
    }

    /// Add a column whose value the database produces.
    pub fn generated(mut self, column: impl Into<String>, kind: ValueKind) -> Self {
        self.extras.push(Extra::Generated(column.into(), kind));
        self
    }

    pub fn build(self) -> Result<Collection> {
        let invalid = |msg: String| Error::schema(SchemaErrorKind::Invalid, msg);
        if self.name.trim().is_empty() {
            return Err(invalid("collection name must not be empty".to_string()));
        }

        let mut seen = HashSet::new();
        for t in &self.entity_types {
            if !seen.insert(t.discriminator) {
                return Err(invalid(format!(
                    "discriminator '{}' used twice in '{}'",
                    t.discriminator, self.name
                )));
            }
        }

        let mut columns = Vec::new();
        let mut key_columns = Vec::new();
        for (name, path, kind) in &self.keys {
            key_columns.push(KeyColumn {
                column: columns.len(),
                path: path.clone(),
                kind: *kind,
            });
            columns.push(Column {
                name: name.clone(),
                kind: ColumnKind::Key {
                    path: path.clone(),
                    computed: self.computed_key.is_some(),
                },
                value_kind: *kind,
                nullable: false,
            });
        }
        if self.computed_key.is_some() && self.keys.len() > 1 {
            return Err(Error::Unsupported(format!(
                "'{}' combines a computed key with other key columns",
                self.name
            )));
        }
        let key_factory = KeyFactory::new(K::SHAPE, key_columns)?;

        let computed_key = match self.computed_key {
            None => None,
            Some(document_path) => {
                if !matches!(self.keys[0].2, ValueKind::Int | ValueKind::BigInt) {
                    return Err(invalid(format!(
                        "computed key of '{}' must be a single integer column",
                        self.name
                    )));
                }
                if document_path.is_empty() {
                    return Err(invalid("computed key needs a document path".to_string()));
                }
                Some(ComputedKey {
                    column: 0,
                    document_path,
                })
            }
        };

        let document = columns.len();
        columns.push(Column {
            name: self.document_column,
            kind: ColumnKind::Document,
            value_kind: ValueKind::Text,
            nullable: false,
        });
        let discriminator = columns.len();
        columns.push(Column {
            name: DISCRIMINATOR_COLUMN.to_string(),
            kind: ColumnKind::Discriminator,
            value_kind: ValueKind::Text,
            nullable: false,
        });
        let etag = if self.etag {
            columns.push(Column {
                name: ETAG_COLUMN.to_string(),
                kind: ColumnKind::Etag,
                value_kind: ValueKind::Uuid,
                nullable: true,
            });
            Some(columns.len() - 1)
        } else {
            None
        };
        for extra in self.extras {
            columns.push(match extra {
                Extra::Projection(name, kind, projection) => Column {
                    name,
                    kind: ColumnKind::Projection(projection),
                    value_kind: kind,
                    nullable: true,
                },
                Extra::Generated(name, kind) => Column {
                    name,
                    kind: ColumnKind::Generated,
                    value_kind: kind,
                    nullable: true,
                },
            });
        }

        let mut column_index = HashMap::new();
        for (i, c) in columns.iter().enumerate() {
            if column_index.insert(c.name.clone(), i).is_some() {
                return Err(Error::schema(
                    SchemaErrorKind::DuplicateColumn,
                    format!("column '{}' defined twice in '{}'", c.name, self.name),
                ));
            }
        }

        tracing::debug!(
            collection = %self.name,
            columns = columns.len(),
            types = self.entity_types.len(),
            "Built collection"
        );

        Ok(Collection {
            name: self.name,
            columns,
            column_index,
            key_factory,
            document,
            discriminator,
            etag,
            computed_key,
            key_type: TypeId::of::<K>(),
            key_type_name: std::any::type_name::<K>(),
            entity_types: self.entity_types,
            casts: self.casts,
            type_names: self.type_names,
        })
    }
}
