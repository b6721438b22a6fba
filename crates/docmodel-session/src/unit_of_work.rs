//! Unit of Work: the set of documents a session is responsible for.
//!
//! Every attached entity has exactly one [`Document`] per collection, found
//! by reference identity rather than by value. A document moves through
//!
//! ```text
//! New --save--> Persisted --delete--> Deleted
//! New --delete--> (forgotten, nothing is written)
//! ```
//!
//! and [`UnitOfWork::operations`] derives the writes a save needs: an add for
//! every new document, a delete for every deleted one, and an update for a
//! persisted document only when the change tracker sees a difference between
//! its stored row and the live entity.

use crate::change_tracker::ChangeTracker;
use docmodel_core::error::NotAttachedError;
use docmodel_core::{
    AnyEntity, Collection, DatabaseRow, EntityId, Error, Result, RowFactory,
};
use docmodel_query::{AddOperation, DeleteOperation, Operation, UpdateOperation};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Lifecycle state of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentState {
    /// Stored in the session, not yet in the database.
    New,
    /// In the database as of the document's row.
    Persisted,
    /// Scheduled for removal.
    Deleted,
    /// Not tracked. Never stored on a document.
    NotAttached,
}

/// Anything that identifies a tracked entity: the erased handle or a typed
/// (possibly viewed) one.
pub trait EntityHandle {
    fn entity_id(&self) -> EntityId;

    fn type_name(&self) -> &'static str;
}

impl EntityHandle for AnyEntity {
    fn entity_id(&self) -> EntityId {
        self.id()
    }

    fn type_name(&self) -> &'static str {
        self.rust_type_name()
    }
}

impl<T: ?Sized + 'static> EntityHandle for Arc<RwLock<T>> {
    fn entity_id(&self) -> EntityId {
        EntityId::of(self)
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Tracking record for one entity instance.
#[derive(Debug, Clone)]
pub struct Document {
    pub entity: AnyEntity,
    pub collection: Arc<Collection>,
    /// Last row read from or written to the database, or the pending row of
    /// a new document.
    pub row: DatabaseRow,
    pub state: DocumentState,
}

impl Document {
    fn operation(&self, tracker: &ChangeTracker, rows: &RowFactory) -> Result<Option<Operation>> {
        let op = match self.state {
            DocumentState::New => Operation::Add(AddOperation {
                entity: self.entity.clone(),
                collection: Arc::clone(&self.collection),
                row: rows.create_row(&self.collection, &self.entity, RowFactory::new_etag())?,
            }),
            DocumentState::Persisted => {
                let current = self.entity.to_document()?;
                if !tracker.document_changed(self.row.document()?, &current)? {
                    return Ok(None);
                }
                Operation::Update(UpdateOperation {
                    entity: self.entity.clone(),
                    collection: Arc::clone(&self.collection),
                    stored: self.row.clone(),
                    row: rows.create_row_from_document(
                        &self.collection,
                        &self.entity,
                        &current,
                        RowFactory::new_etag(),
                    )?,
                })
            }
            DocumentState::Deleted => Operation::Delete(DeleteOperation {
                entity: self.entity.clone(),
                collection: Arc::clone(&self.collection),
                stored: self.row.clone(),
            }),
            DocumentState::NotAttached => return Ok(None),
        };
        Ok(Some(op))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DocumentKey {
    collection: String,
    entity: EntityId,
}

impl DocumentKey {
    fn new(collection: &Collection, entity: EntityId) -> Self {
        Self {
            collection: collection.name().to_string(),
            entity,
        }
    }
}

/// Attached documents in attachment order.
#[derive(Debug, Default)]
pub struct UnitOfWork {
    documents: HashMap<DocumentKey, Document>,
    order: Vec<DocumentKey>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    fn not_attached(collection: &Collection, entity: &impl EntityHandle) -> Error {
        Error::NotAttached(NotAttachedError {
            collection: collection.name().to_string(),
            type_name: entity.type_name(),
        })
    }

    fn document_mut(&mut self, collection: &Collection, entity: &impl EntityHandle) -> Result<&mut Document> {
        self.documents
            .get_mut(&DocumentKey::new(collection, entity.entity_id()))
            .ok_or_else(|| Self::not_attached(collection, entity))
    }

    /// Attach an entity, or refresh the row and state of its document.
    #[tracing::instrument(level = "trace", skip(self, collection, entity, row), fields(collection = collection.name()))]
    pub fn add_or_update(
        &mut self,
        collection: &Arc<Collection>,
        entity: AnyEntity,
        row: DatabaseRow,
        state: DocumentState,
    ) {
        let key = DocumentKey::new(collection, entity.id());
        match self.documents.get_mut(&key) {
            Some(document) => {
                document.row = row;
                document.state = state;
            }
            None => {
                tracing::trace!(entity = entity.rust_type_name(), "Attaching document");
                self.order.push(key.clone());
                self.documents.insert(
                    key,
                    Document {
                        entity,
                        collection: Arc::clone(collection),
                        row,
                        state,
                    },
                );
            }
        }
    }

    pub fn update_state(
        &mut self,
        collection: &Collection,
        entity: &impl EntityHandle,
        state: DocumentState,
    ) -> Result<()> {
        self.document_mut(collection, entity)?.state = state;
        Ok(())
    }

    pub fn update_row(&mut self, collection: &Collection, entity: &impl EntityHandle, row: DatabaseRow) -> Result<()> {
        self.document_mut(collection, entity)?.row = row;
        Ok(())
    }

    /// State of an entity's document, `NotAttached` when there is none.
    pub fn get_state(&self, collection: &Collection, entity: &impl EntityHandle) -> DocumentState {
        self.get(collection, entity)
            .map_or(DocumentState::NotAttached, |d| d.state)
    }

    pub fn get_row(&self, collection: &Collection, entity: &impl EntityHandle) -> Option<&DatabaseRow> {
        self.get(collection, entity).map(|d| &d.row)
    }

    pub fn get(&self, collection: &Collection, entity: &impl EntityHandle) -> Option<&Document> {
        self.documents
            .get(&DocumentKey::new(collection, entity.entity_id()))
    }

    /// Find the document of an entity in whichever collection holds it.
    pub fn find(&self, entity: &impl EntityHandle) -> Option<&Document> {
        let id = entity.entity_id();
        self.order
            .iter()
            .find(|k| k.entity == id)
            .and_then(|k| self.documents.get(k))
    }

    pub fn remove(&mut self, collection: &Collection, entity: &impl EntityHandle) -> Option<Document> {
        let key = DocumentKey::new(collection, entity.entity_id());
        let removed = self.documents.remove(&key)?;
        self.order.retain(|k| k != &key);
        Some(removed)
    }

    /// Schedule an entity for deletion.
    ///
    /// A new document is simply forgotten, a persisted one becomes
    /// `Deleted`. Deleting twice is harmless.
    pub fn delete(&mut self, collection: &Collection, entity: &impl EntityHandle) -> Result<DocumentState> {
        if self.document_mut(collection, entity)?.state == DocumentState::New {
            self.remove(collection, entity);
            tracing::trace!("Dropped unsaved document");
            return Ok(DocumentState::NotAttached);
        }
        self.update_state(collection, entity, DocumentState::Deleted)?;
        Ok(DocumentState::Deleted)
    }

    /// Mark every new document persisted after a successful save.
    pub fn set_persisted(&mut self) {
        // TODO: deleted documents stay tracked here; decide whether a save
        // should purge them or keep them around for undo.
        let mut promoted = 0usize;
        for document in self.documents.values_mut() {
            if document.state == DocumentState::New {
                document.state = DocumentState::Persisted;
                promoted += 1;
            }
        }
        tracing::debug!(promoted, "Marked new documents persisted");
    }

    /// The writes needed to bring the database in line with the session.
    ///
    /// Lazy: dirty checks and row snapshots happen as the iterator advances.
    pub fn operations<'a>(
        &'a self,
        tracker: &'a ChangeTracker,
        rows: &'a RowFactory,
    ) -> impl Iterator<Item = Result<Operation>> + 'a {
        self.order.iter().filter_map(move |key| {
            self.documents
                .get(key)
                .and_then(|d| d.operation(tracker, rows).transpose())
        })
    }

    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.order.iter().filter_map(|k| self.documents.get(k))
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn clear(&mut self) {
        self.documents.clear();
        self.order.clear();
    }
}
