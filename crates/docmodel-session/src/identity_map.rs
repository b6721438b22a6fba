//! Identity Map pattern for tracking unique entity instances per key.
//!
//! The identity map ensures that each stored document corresponds to exactly
//! one entity instance within a session:
//!
//! - **Uniqueness**: the same key always yields the same `Arc`
//! - **Cache**: key lookups already satisfied skip the database
//! - **Views**: an entry is stored once per collection and handed out as any
//!   type the collection can view it as
//!
//! # Example
//!
//! ```ignore
//! let mut map = IdentityMap::new();
//! map.add(&animals, vec![Value::BigInt(1)], AnyEntity::new(rex.clone()))?;
//!
//! let as_dog = map.try_get::<Dog>(&animals, &[Value::BigInt(1)])?.unwrap();
//! let as_animal = map.try_get::<dyn Animal>(&animals, &[Value::BigInt(1)])?.unwrap();
//! assert_eq!(EntityId::of(&as_dog), EntityId::of(&as_animal));
//! ```

use docmodel_core::error::DuplicateIdentityError;
use docmodel_core::{AnyEntity, Collection, EntityRef, Error, Result, Value, render_key};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Hash a single value into the hasher. Doubles hash by bit pattern.
fn hash_value(v: &Value, hasher: &mut impl Hasher) {
    match v {
        Value::Null => 0u8.hash(hasher),
        Value::Bool(b) => {
            1u8.hash(hasher);
            b.hash(hasher);
        }
        Value::Int(i) => {
            2u8.hash(hasher);
            i.hash(hasher);
        }
        Value::BigInt(i) => {
            3u8.hash(hasher);
            i.hash(hasher);
        }
        Value::Double(f) => {
            4u8.hash(hasher);
            f.to_bits().hash(hasher);
        }
        Value::Text(s) => {
            5u8.hash(hasher);
            s.hash(hasher);
        }
        Value::Bytes(b) => {
            6u8.hash(hasher);
            b.hash(hasher);
        }
        Value::Uuid(u) => {
            7u8.hash(hasher);
            u.hash(hasher);
        }
    }
}

/// Identity of a stored document: collection name plus key column values.
#[derive(Debug, Clone)]
pub struct IdentityKey {
    collection: String,
    key: Vec<Value>,
}

impl IdentityKey {
    pub fn new(collection: &Collection, key: Vec<Value>) -> Self {
        Self {
            collection: collection.name().to_string(),
            key,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn key(&self) -> &[Value] {
        &self.key
    }
}

impl PartialEq for IdentityKey {
    fn eq(&self, other: &Self) -> bool {
        self.collection == other.collection
            && self.key.len() == other.key.len()
            && self.key.iter().zip(&other.key).all(|(a, b)| a.same_as(b))
    }
}

impl Eq for IdentityKey {}

impl Hash for IdentityKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.collection.hash(state);
        for v in &self.key {
            hash_value(v, state);
        }
    }
}

/// Session-scoped map from document identity to entity instance.
#[derive(Debug, Default)]
pub struct IdentityMap {
    entries: HashMap<IdentityKey, AnyEntity>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity. Re-adding the same instance is a no-op; adding a
    /// different instance under a taken identity fails.
    #[tracing::instrument(level = "trace", skip(self, collection, entity), fields(collection = collection.name()))]
    pub fn add(&mut self, collection: &Collection, key: Vec<Value>, entity: AnyEntity) -> Result<()> {
        let identity = IdentityKey::new(collection, key);
        if let Some(existing) = self.entries.get(&identity) {
            if existing.same_instance(&entity) {
                return Ok(());
            }
            return Err(Error::DuplicateIdentity(DuplicateIdentityError {
                collection: identity.collection,
                key: render_key(&identity.key),
            }));
        }
        tracing::trace!(key = %render_key(identity.key()), "Tracking identity");
        self.entries.insert(identity, entity);
        Ok(())
    }

    /// The tracked instance for a key, whatever its type.
    pub fn get_any(&self, collection: &Collection, key: &[Value]) -> Option<&AnyEntity> {
        self.entries
            .get(&IdentityKey::new(collection, key.to_vec()))
    }

    /// The tracked instance viewed as `T`.
    ///
    /// Returns `Ok(None)` when nothing is tracked for the key, and a type
    /// mismatch when the tracked instance cannot be viewed as `T`.
    pub fn try_get<T: ?Sized + 'static>(&self, collection: &Collection, key: &[Value]) -> Result<Option<EntityRef<T>>> {
        match self.get_any(collection, key) {
            None => Ok(None),
            Some(entity) => collection.cast::<T>(entity).map(Some),
        }
    }

    pub fn contains(&self, collection: &Collection, key: &[Value]) -> bool {
        self.get_any(collection, key).is_some()
    }

    pub fn remove(&mut self, collection: &Collection, key: &[Value]) -> Option<AnyEntity> {
        self.entries
            .remove(&IdentityKey::new(collection, key.to_vec()))
    }

    /// Forget an instance wherever it is registered.
    pub fn remove_instance(&mut self, entity: &AnyEntity) -> bool {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.same_instance(entity));
        before != self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
