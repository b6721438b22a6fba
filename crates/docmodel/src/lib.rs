//! DocModel Rust - JSON documents stored in SQL tables.
//!
//! DocModel maps plain serde types to rows of a document table: a key, the
//! serialized JSON document, a type discriminator and an optional
//! concurrency token. On top of that it provides:
//!
//! - An identity map: one instance per stored document per session
//! - A unit of work with JSON-level change tracking
//! - Deferred queries that run together in one round trip
//! - Optimistic concurrency on updates and deletes
//! - Inheritance: subtypes stored in their base type's table
//! - Database-assigned keys written back into documents
//! - A second-level cache for key lookups
//! - Migration generation from model snapshots
//!
//! # Quick Start
//!
//! ```ignore
//! use docmodel::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Hero {
//!     id: i64,
//!     name: String,
//! }
//!
//! impl Entity for Hero {
//!     type Key = i64;
//!     const TYPE_NAME: &'static str = "Hero";
//!     fn key(&self) -> i64 {
//!         self.id
//!     }
//! }
//!
//! fn schema() -> Result<Schema> {
//!     Schema::builder()
//!         .collection(Collection::builder::<Hero>("Heroes").key("Id", ValueKind::BigInt).etag().build()?)
//!         .build()
//! }
//!
//! async fn example(cx: &Cx, connections: impl ConnectionFactory) -> Outcome<SaveResult, Error> {
//!     let factory = SessionFactory::new(try_result!(schema()), connections);
//!
//!     let mut session = factory.open_session();
//!     try_result!(session.store(entity_ref(Hero { id: 1, name: "Spider-Man".into() })));
//!     try_outcome!(session.save_changes(cx).await);
//!
//!     let mut session = factory.open_session();
//!     if let Some(hero) = try_outcome!(session.load::<Hero, i64>(cx, &1).await) {
//!         hero.write().unwrap().name = "Peter Parker".into();
//!     }
//!     session.save_changes(cx).await
//! }
//! ```
//!
//! # Crates
//!
//! - `docmodel-core`: values, rows, errors, entities, keys and collections
//! - `docmodel-query`: query and write operations, SQL writers and dialects
//! - `docmodel-session`: the session and everything it tracks
//! - `docmodel-schema`: model snapshots and migrations

pub use docmodel_core::{
    AnyEntity,
    // asupersync re-exports
    Budget,
    Collection,
    CollectionBuilder,
    CommandBatch,
    Connection,
    ConnectionFactory,
    ConnectionMode,
    Cx,
    Entity,
    EntityId,
    EntityRef,
    Error,
    JsonSerializer,
    Key,
    KeyValue,
    Outcome,
    Projection,
    RegionId,
    Result,
    Row,
    Schema,
    Serializer,
    Statement,
    StatementResult,
    TaskId,
    Value,
    ValueKind,
    entity_ref,
    render_key,
    try_outcome,
    try_result,
};

pub use docmodel_query::{
    Dialect, EntityQuery, KeyQuery, MultipleKeyQuery, Operation, Query, QueryId,
};

pub use docmodel_session::{
    Cache, CacheOptions, CallbackPublisher, DocumentState, EventLog, EventPublisher,
    MemoryCache, MemoryCacheConfig, NoopPublisher, QueryFuture, SaveResult, Session,
    SessionConfig, SessionEvent,
};

pub use docmodel_schema::{
    ColumnSnapshot, Difference, Migration, MigrationWriter, ModelSnapshot, TableSnapshot,
};

pub mod factory;
pub use factory::SessionFactory;

/// Everything an application usually needs.
pub mod prelude {
    pub use crate::{
        // asupersync
        Budget,
        Cache,
        CacheOptions,
        Collection,
        ConnectionFactory,
        ConnectionMode,
        Cx,
        Dialect,
        DocumentState,
        Entity,
        EntityQuery,
        EntityRef,
        Error,
        MemoryCache,
        Migration,
        ModelSnapshot,
        Outcome,
        QueryFuture,
        RegionId,
        Result,
        SaveResult,
        Schema,
        Session,
        SessionConfig,
        SessionEvent,
        SessionFactory,
        TaskId,
        Value,
        ValueKind,
        entity_ref,
        try_outcome,
        try_result,
    };
}
