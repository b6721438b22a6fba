//! Core types and traits for DocModel Rust.
//!
//! This crate provides the building blocks of a document store on top of a
//! relational database:
//!
//! - `Entity` trait for types stored as JSON documents
//! - `Key` and `KeyFactory` for scalar, value-object and tuple keys
//! - `Collection` and `Schema` for table layout and type mapping
//! - `DatabaseRow` and `RowFactory` for column snapshots of documents
//! - `Connection` trait for batch execution
//! - `Outcome` re-export from asupersync for cancel-correct operations
//! - `Cx` context for structured concurrency

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Budget, Cx, Outcome, RegionId, TaskId};

pub mod collection;
pub mod column;
pub mod connection;
pub mod document_row;
pub mod entity;
pub mod error;
pub mod key;
pub mod key_factory;
pub mod row;
pub mod schema;
pub mod serializer;
pub mod value;

pub use collection::{Collection, CollectionBuilder, ComputedKey, EntityType};
pub use column::{Column, ColumnKind, Projection};
pub use connection::{
    CommandBatch, Connection, ConnectionFactory, ConnectionMode, Statement, StatementResult,
};
pub use document_row::{DatabaseRow, RowFactory};
pub use entity::{AnyEntity, Entity, EntityId, EntityRef, ErasedEntity, entity_ref};
pub use error::{Error, Result, WriteKind};
pub use key::{Key, KeyMembers, KeyShape, KeyValue, render_key};
pub use key_factory::{KeyColumn, KeyFactory};
pub use row::{Row, RowSet, RowShape};
pub use schema::{Schema, SchemaBuilder};
pub use serializer::{JsonSerializer, Serializer};
pub use value::{Value, ValueKind};

/// Unwrap an [`Outcome`], returning early on anything but `Ok`.
#[macro_export]
macro_rules! try_outcome {
    ($e:expr) => {
        match $e {
            $crate::Outcome::Ok(v) => v,
            $crate::Outcome::Err(e) => return $crate::Outcome::Err(e),
            $crate::Outcome::Cancelled(r) => return $crate::Outcome::Cancelled(r),
            $crate::Outcome::Panicked(p) => return $crate::Outcome::Panicked(p),
        }
    };
}

/// Unwrap a [`Result`] inside a function returning [`Outcome`].
#[macro_export]
macro_rules! try_result {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(e) => return $crate::Outcome::Err(e),
        }
    };
}
