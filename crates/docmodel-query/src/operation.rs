//! Write operations derived from the unit of work.

use docmodel_core::{AnyEntity, Collection, DatabaseRow, WriteKind, render_key};
use std::sync::Arc;

/// Insert a new document.
#[derive(Debug, Clone)]
pub struct AddOperation {
    pub entity: AnyEntity,
    pub collection: Arc<Collection>,
    pub row: DatabaseRow,
}

/// Replace a stored document.
#[derive(Debug, Clone)]
pub struct UpdateOperation {
    pub entity: AnyEntity,
    pub collection: Arc<Collection>,
    /// The row as last read or written; its etag guards the update.
    pub stored: DatabaseRow,
    pub row: DatabaseRow,
}

/// Remove a stored document.
#[derive(Debug, Clone)]
pub struct DeleteOperation {
    pub entity: AnyEntity,
    pub collection: Arc<Collection>,
    pub stored: DatabaseRow,
}

/// Visitor over the operation variants.
pub trait OperationVisitor {
    type Output;

    fn visit_add(&mut self, op: &AddOperation) -> Self::Output;

    fn visit_update(&mut self, op: &UpdateOperation) -> Self::Output;

    fn visit_delete(&mut self, op: &DeleteOperation) -> Self::Output;
}

/// A pending write for one entity.
#[derive(Debug, Clone)]
pub enum Operation {
    Add(AddOperation),
    Update(UpdateOperation),
    Delete(DeleteOperation),
}

impl Operation {
    pub fn accept<V: OperationVisitor>(&self, visitor: &mut V) -> V::Output {
        match self {
            Operation::Add(op) => visitor.visit_add(op),
            Operation::Update(op) => visitor.visit_update(op),
            Operation::Delete(op) => visitor.visit_delete(op),
        }
    }

    pub fn entity(&self) -> &AnyEntity {
        match self {
            Operation::Add(op) => &op.entity,
            Operation::Update(op) => &op.entity,
            Operation::Delete(op) => &op.entity,
        }
    }

    pub fn collection(&self) -> &Arc<Collection> {
        match self {
            Operation::Add(op) => &op.collection,
            Operation::Update(op) => &op.collection,
            Operation::Delete(op) => &op.collection,
        }
    }

    pub fn kind(&self) -> WriteKind {
        match self {
            Operation::Add(_) => WriteKind::Insert,
            Operation::Update(_) => WriteKind::Update,
            Operation::Delete(_) => WriteKind::Delete,
        }
    }

    /// The row this operation leaves in the database (the deleted row for
    /// deletes).
    pub fn row(&self) -> &DatabaseRow {
        match self {
            Operation::Add(op) => &op.row,
            Operation::Update(op) => &op.row,
            Operation::Delete(op) => &op.stored,
        }
    }

    /// Key column values rendered for logs and errors.
    pub fn rendered_key(&self) -> String {
        render_key(&self.row().key_values())
    }
}
