//! Entities and type-erased handles to tracked entities.

use crate::Result;
use crate::error::Error;
use crate::key::{Key, KeyValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::any::{Any, TypeId};
use std::sync::{Arc, RwLock};

/// A document type stored in a collection.
///
/// The whole value is serialized to JSON as the row's document. Fields that
/// should compare equal to "absent" in change tracking (zero counters,
/// `false` flags) are best marked `#[serde(default, skip_serializing_if = ..)]`
/// so the document stays stable across readers.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    type Key: Key;

    /// Discriminator stored next to the document.
    const TYPE_NAME: &'static str;

    fn key(&self) -> Self::Key;
}

/// Shared handle to an entity. Sessions hand out clones of the same handle
/// for the same document, so pointer equality is identity.
pub type EntityRef<T> = Arc<RwLock<T>>;

/// Wrap an entity in a shared handle.
pub fn entity_ref<T: Entity>(entity: T) -> EntityRef<T> {
    Arc::new(RwLock::new(entity))
}

/// Reference identity of a tracked entity, stable across views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityId(usize);

impl EntityId {
    /// Identity of any handle, including one viewed through a trait object.
    pub fn of<T: ?Sized>(entity: &Arc<RwLock<T>>) -> Self {
        Self(Arc::as_ptr(entity).cast::<()>() as usize)
    }
}

fn poisoned(type_name: &'static str) -> Error {
    Error::Custom(format!("lock on {} entity is poisoned", type_name))
}

/// Object-safe view of an entity of unknown concrete type.
pub trait ErasedEntity: Send + Sync {
    fn concrete_type(&self) -> TypeId;

    fn rust_type_name(&self) -> &'static str;

    /// Discriminator of the concrete type.
    fn discriminator(&self) -> &'static str;

    fn key_value(&self) -> Result<KeyValue>;

    fn to_document(&self) -> Result<serde_json::Value>;

    /// Replace the entity's state in place, keeping the handle.
    fn replace_document(&self, document: serde_json::Value) -> Result<()>;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Entity> ErasedEntity for RwLock<T> {
    fn concrete_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn rust_type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn discriminator(&self) -> &'static str {
        T::TYPE_NAME
    }

    fn key_value(&self) -> Result<KeyValue> {
        let guard = self.read().map_err(|_| poisoned(T::TYPE_NAME))?;
        Ok(guard.key().to_key_value())
    }

    fn to_document(&self) -> Result<serde_json::Value> {
        let guard = self.read().map_err(|_| poisoned(T::TYPE_NAME))?;
        Ok(serde_json::to_value(&*guard)?)
    }

    fn replace_document(&self, document: serde_json::Value) -> Result<()> {
        let fresh: T = serde_json::from_value(document)?;
        let mut guard = self.write().map_err(|_| poisoned(T::TYPE_NAME))?;
        *guard = fresh;
        Ok(())
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A tracked entity whose concrete type is only known at runtime.
#[derive(Clone)]
pub struct AnyEntity(Arc<dyn ErasedEntity>);

impl AnyEntity {
    pub fn new<T: Entity>(entity: EntityRef<T>) -> Self {
        Self(entity)
    }

    /// Deserialize a document into a fresh entity of type `T`.
    pub fn materialize<T: Entity>(document: serde_json::Value) -> Result<Self> {
        let entity: T = serde_json::from_value(document)?;
        Ok(Self::new(entity_ref(entity)))
    }

    pub fn id(&self) -> EntityId {
        EntityId(Arc::as_ptr(&self.0).cast::<()>() as usize)
    }

    pub fn is<T: Entity>(&self) -> bool {
        self.0.concrete_type() == TypeId::of::<T>()
    }

    /// Recover the typed handle if `T` is the concrete type.
    pub fn downcast<T: Entity>(&self) -> Option<EntityRef<T>> {
        Arc::clone(&self.0).into_any().downcast::<RwLock<T>>().ok()
    }

    pub fn same_instance(&self, other: &AnyEntity) -> bool {
        self.id() == other.id()
    }
}

impl std::ops::Deref for AnyEntity {
    type Target = dyn ErasedEntity;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl std::fmt::Debug for AnyEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnyEntity")
            .field("type", &self.0.rust_type_name())
            .field("id", &self.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: i64,
        text: String,
    }

    impl Entity for Note {
        type Key = i64;
        const TYPE_NAME: &'static str = "Note";
        fn key(&self) -> i64 {
            self.id
        }
    }

    trait Titled: Send + Sync {
        fn title(&self) -> String;
    }

    impl Titled for Note {
        fn title(&self) -> String {
            self.text.clone()
        }
    }

    #[test]
    fn identity_survives_erasure_and_views() {
        let note = entity_ref(Note {
            id: 1,
            text: "hi".into(),
        });
        let view: EntityRef<dyn Titled> = note.clone();
        let erased = AnyEntity::new(Arc::clone(&note));
        assert_eq!(EntityId::of(&note), EntityId::of(&view));
        assert_eq!(EntityId::of(&note), erased.id());
        assert_eq!(view.read().unwrap().title(), "hi");
    }

    #[test]
    fn downcast_returns_same_handle() {
        let note = entity_ref(Note {
            id: 2,
            text: "x".into(),
        });
        let erased = AnyEntity::new(Arc::clone(&note));
        let back = erased.downcast::<Note>().unwrap();
        assert!(Arc::ptr_eq(&back, &note));
        assert!(erased.is::<Note>());
    }

    #[test]
    fn replace_document_keeps_handle() {
        let note = entity_ref(Note {
            id: 3,
            text: "old".into(),
        });
        let erased = AnyEntity::new(Arc::clone(&note));
        erased
            .replace_document(serde_json::json!({"id": 3, "text": "new"}))
            .unwrap();
        assert_eq!(note.read().unwrap().text, "new");
        assert_eq!(erased.key_value().unwrap(), 3i64.to_key_value());
        assert_eq!(erased.discriminator(), "Note");
    }
}
