//! Session, identity map and unit of work for DocModel Rust.
//!
//! `docmodel-session` is the **unit-of-work layer**. A [`Session`] loads
//! documents into entities, guarantees one instance per stored document,
//! tracks what changed, and writes everything back in one batch.
//!
//! # Role In The Architecture
//!
//! - **Identity map**: one in-memory instance per collection and key.
//! - **Change tracking**: JSON value comparison between the stored document
//!   and the entity's current serialization.
//! - **Unit of work**: derives adds, updates and deletes on save.
//! - **Deferred queries**: queries queue up and run together, in one round
//!   trip, the first time any of them is resolved.
//!
//! # Design Philosophy
//!
//! - **Batching first**: a session never sends a query on its own if others
//!   are waiting; a save never sends more than one write batch.
//! - **Reference identity**: entities are `Arc<RwLock<T>>`; a document is
//!   found by the `Arc`, whatever view it is held through.
//! - **Explicit collaborators**: connection factory, cache and event
//!   publisher are handed in, never looked up globally.
//! - **Cancel-correct**: every I/O path takes `Cx` and returns `Outcome`.
//!
//! # Example
//!
//! ```ignore
//! let mut session = Session::new(schema, factory, SessionConfig::default());
//!
//! // Queue two lookups; nothing has run yet
//! let rex = session.defer_load::<Dog, i64>(&1)?;
//! let pets = session.defer::<dyn Animal>(session.query::<dyn Animal>()?.take(10))?;
//!
//! // First resolve runs both queries in one batch
//! let rex = session.resolve(&cx, &rex).await;
//!
//! session.store(entity_ref(Dog { id: 2, name: "Max".into(), tricks: vec![] }))?;
//! session.save_changes(&cx).await;
//! ```

pub mod cache;
pub mod change_tracker;
pub mod connection_manager;
pub mod engine;
pub mod events;
pub mod executor;
pub mod identity_map;
pub mod unit_of_work;

#[cfg(test)]
pub(crate) mod test_support;

pub use cache::{Cache, CacheFuture, CacheOptions, MemoryCache, MemoryCacheConfig};
pub use change_tracker::{ChangeTracker, json_equals};
pub use connection_manager::ConnectionManager;
pub use engine::{QueryEngine, QueryFuture};
pub use events::{
    CallbackPublisher, EventLog, EventPublisher, NoopPublisher, SaveResult, SessionEvent,
};
pub use executor::{
    CachingQueryExecutor, QueryExecutor, QueryResults, SqlQueryExecutor, SqlUpdateExecutor,
    UpdateExecutor, WriteOutcome,
};
pub use identity_map::{IdentityKey, IdentityMap};
pub use unit_of_work::{Document, DocumentState, EntityHandle, UnitOfWork};

use docmodel_core::error::{NotAttachedError, NotExecutedError, SchemaErrorKind, TypeMismatchError};
use docmodel_core::{
    AnyEntity, Collection, ConnectionFactory, ConnectionMode, Cx, DatabaseRow, Entity, EntityRef,
    Error, JsonSerializer, Key, Outcome, Result, Row, RowFactory, Schema, Serializer, Value,
    try_outcome, try_result,
};
use docmodel_query::{
    AddOperation, Dialect, EntityQuery, KeyQuery, MultipleKeyQuery, Operation, Query, QueryId,
};
use std::any::TypeId;
use std::sync::Arc;

// ============================================================================
// Session Configuration
// ============================================================================

/// Configuration for Session behavior.
#[derive(Clone)]
pub struct SessionConfig {
    /// SQL dialect statements are rendered for.
    pub dialect: Dialect,
    /// Whether batches share one connection or open their own.
    pub connection_mode: ConnectionMode,
    /// Encoding of the document column.
    pub serializer: Arc<dyn Serializer>,
    /// Document members left out of change detection.
    pub ignored_fields: Vec<String>,
    /// Second-level cache addressing.
    pub cache: CacheOptions,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dialect: Dialect::default(),
            connection_mode: ConnectionMode::default(),
            serializer: Arc::new(JsonSerializer::new()),
            ignored_fields: Vec::new(),
            cache: CacheOptions::default(),
        }
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("dialect", &self.dialect)
            .field("connection_mode", &self.connection_mode)
            .field("ignored_fields", &self.ignored_fields)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    #[must_use]
    pub fn connection_mode(mut self, mode: ConnectionMode) -> Self {
        self.connection_mode = mode;
        self
    }

    #[must_use]
    pub fn serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Ignore a document member when deciding whether an entity changed.
    #[must_use]
    pub fn ignore_field(mut self, name: impl Into<String>) -> Self {
        self.ignored_fields.push(name.into());
        self
    }

    #[must_use]
    pub fn cache(mut self, options: CacheOptions) -> Self {
        self.cache = options;
        self
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Write `value` at a member path, creating intermediate objects.
fn set_json_path(document: &mut serde_json::Value, path: &[String], value: serde_json::Value) -> Result<()> {
    let not_object = || Error::type_error("JSON object", "another JSON value");
    let Some((last, parents)) = path.split_last() else {
        *document = value;
        return Ok(());
    };
    let mut node = document;
    for segment in parents {
        node = node
            .as_object_mut()
            .ok_or_else(not_object)?
            .entry(segment.clone())
            .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
    }
    node.as_object_mut()
        .ok_or_else(not_object)?
        .insert(last.clone(), value);
    Ok(())
}

fn requested_mismatch<T: ?Sized>(query: &Query) -> Error {
    Error::TypeMismatch(TypeMismatchError {
        collection: query.collection().name().to_string(),
        actual: query.requested().name,
        requested: std::any::type_name::<T>(),
    })
}

// ============================================================================
// Session
// ============================================================================

/// A unit of work over a schema: identity map, change tracking and batched
/// database access.
///
/// A session is used by one logical caller at a time.
pub struct Session<F: ConnectionFactory> {
    schema: Arc<Schema>,
    config: SessionConfig,
    connections: Arc<ConnectionManager<F>>,
    queries: CachingQueryExecutor<SqlQueryExecutor<F>>,
    updates: SqlUpdateExecutor<F>,
    identity_map: IdentityMap,
    unit_of_work: UnitOfWork,
    engine: QueryEngine,
    tracker: ChangeTracker,
    rows: RowFactory,
    publisher: Arc<dyn EventPublisher>,
}

impl<F: ConnectionFactory> Session<F> {
    /// Open a session. No connection is made until the first batch.
    pub fn new(schema: Arc<Schema>, factory: Arc<F>, config: SessionConfig) -> Self {
        let connections = Arc::new(ConnectionManager::new(factory, config.connection_mode));
        let queries = CachingQueryExecutor::new(
            SqlQueryExecutor::new(Arc::clone(&connections), config.dialect),
            None,
            config.cache.clone(),
        );
        let updates = SqlUpdateExecutor::new(Arc::clone(&connections), config.dialect);
        let tracker = ChangeTracker::new(Arc::clone(&config.serializer))
            .ignore(config.ignored_fields.iter().cloned());
        let rows = RowFactory::new(Arc::clone(&config.serializer));
        tracing::debug!(
            dialect = ?config.dialect,
            mode = ?config.connection_mode,
            collections = schema.collections().len(),
            "Opened session"
        );
        Self {
            schema,
            config,
            connections,
            queries,
            updates,
            identity_map: IdentityMap::new(),
            unit_of_work: UnitOfWork::new(),
            engine: QueryEngine::new(),
            tracker,
            rows,
            publisher: Arc::new(NoopPublisher),
        }
    }

    /// Serve key lookups through a second-level cache.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.queries = CachingQueryExecutor::new(
            SqlQueryExecutor::new(Arc::clone(&self.connections), self.config.dialect),
            Some(cache),
            self.config.cache.clone(),
        );
        self
    }

    /// Deliver session events to `publisher`.
    #[must_use]
    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn identity_map(&self) -> &IdentityMap {
        &self.identity_map
    }

    pub fn unit_of_work(&self) -> &UnitOfWork {
        &self.unit_of_work
    }

    pub fn connections(&self) -> &ConnectionManager<F> {
        &self.connections
    }

    fn collection_for<T: ?Sized + 'static>(&self) -> Result<Arc<Collection>> {
        self.schema.collection_for::<T>().map(Arc::clone)
    }

    fn publish(&self, event: SessionEvent) -> Result<()> {
        self.publisher.publish(&event)
    }

    // ========================================================================
    // Writing
    // ========================================================================

    /// Attach a new entity; it is inserted on the next save.
    ///
    /// Storing an entity that is already attached is a no-op, and storing a
    /// deleted one cancels the deletion.
    #[tracing::instrument(level = "debug", skip(self, entity), fields(entity = T::TYPE_NAME))]
    pub fn store<T: Entity>(&mut self, entity: EntityRef<T>) -> Result<()> {
        let collection = self.collection_for::<T>()?;
        let entity = AnyEntity::new(entity);
        match self.unit_of_work.get_state(&collection, &entity) {
            DocumentState::NotAttached => {}
            DocumentState::Deleted => {
                tracing::debug!("Restoring deleted entity");
                return self
                    .unit_of_work
                    .update_state(&collection, &entity, DocumentState::Persisted);
            }
            _ => return Ok(()),
        }

        let row = self.rows.create_row(&collection, &entity, Value::Null)?;
        if collection.computed_key().is_none() {
            self.identity_map
                .add(&collection, row.key_values(), entity.clone())?;
        }
        self.unit_of_work
            .add_or_update(&collection, entity, row, DocumentState::New);
        self.publish(SessionEvent::Stored {
            collection: collection.name().to_string(),
            type_name: std::any::type_name::<T>(),
        })
    }

    /// Schedule an attached entity for deletion on the next save.
    ///
    /// An entity that was never saved is simply forgotten.
    #[tracing::instrument(level = "debug", skip(self, entity))]
    pub fn delete<T: ?Sized + 'static>(&mut self, entity: &EntityRef<T>) -> Result<()> {
        let Some(document) = self.unit_of_work.find(entity) else {
            return Err(Error::NotAttached(NotAttachedError {
                collection: self
                    .schema
                    .collection_for::<T>()
                    .map(|c| c.name().to_string())
                    .unwrap_or_default(),
                type_name: std::any::type_name::<T>(),
            }));
        };
        let collection = Arc::clone(&document.collection);
        let key = docmodel_core::render_key(&document.row.key_values());
        let erased = document.entity.clone();
        if self.unit_of_work.delete(&collection, entity)? == DocumentState::NotAttached {
            self.identity_map.remove_instance(&erased);
        }
        self.publish(SessionEvent::Deleted {
            collection: collection.name().to_string(),
            key,
        })
    }

    /// Stop tracking an entity without writing anything.
    pub fn evict<T: ?Sized + 'static>(&mut self, entity: &EntityRef<T>) -> bool {
        let Some(document) = self.unit_of_work.find(entity) else {
            return false;
        };
        let collection = Arc::clone(&document.collection);
        if let Some(removed) = self.unit_of_work.remove(&collection, entity) {
            self.identity_map.remove_instance(&removed.entity);
        }
        true
    }

    /// Lifecycle state of an entity in this session.
    pub fn state_of<T: ?Sized + 'static>(&self, entity: &EntityRef<T>) -> DocumentState {
        self.unit_of_work
            .find(entity)
            .map_or(DocumentState::NotAttached, |d| d.state)
    }

    /// Concurrency token of the row an entity was last read from or written to.
    pub fn etag_of<T: ?Sized + 'static>(&self, entity: &EntityRef<T>) -> Option<Value> {
        self.unit_of_work
            .find(entity)
            .and_then(|d| d.row.etag())
            .filter(|v| !v.is_null())
            .cloned()
    }

    /// The writes the next save would send.
    pub fn pending_operations(&self) -> Result<Vec<Operation>> {
        self.unit_of_work
            .operations(&self.tracker, &self.rows)
            .collect()
    }

    /// Embed a database-assigned key into an inserted document and entity.
    fn apply_generated_key(&self, op: &AddOperation, key: Value) -> Result<DatabaseRow> {
        let collection = &op.collection;
        let computed = collection.computed_key().ok_or_else(|| {
            Error::schema(
                SchemaErrorKind::Invalid,
                format!("collection '{}' has no computed key", collection.name()),
            )
        })?;
        let kind = collection.columns()[computed.column].value_kind;
        let key = kind.coerce(key)?;
        let mut document = self.rows.serializer().deserialize(op.row.document()?)?;
        set_json_path(&mut document, &computed.document_path, key.to_json())?;
        op.entity.replace_document(document.clone())?;
        let etag = op.row.etag().cloned().unwrap_or(Value::Null);
        self.rows
            .create_row_from_document(collection, &op.entity, &document, etag)
    }

    /// Write every pending change in one batch.
    ///
    /// On success new documents become persisted, computed keys are written
    /// back into their entities, and cached copies of changed documents are
    /// dropped. On failure nothing in the session changes; a concurrency
    /// conflict is the caller's to resolve, usually by reloading.
    pub async fn save_changes(&mut self, cx: &Cx) -> Outcome<SaveResult, Error> {
        let operations = try_result!(self.pending_operations());
        if operations.is_empty() {
            tracing::debug!("Nothing to save");
            return Outcome::Ok(SaveResult::default());
        }
        try_result!(self.publish(SessionEvent::Saving {
            operations: operations.len(),
        }));

        let outcomes = try_outcome!(self.updates.execute(cx, &operations).await);

        let mut result = SaveResult::default();
        for (op, outcome) in operations.iter().zip(outcomes) {
            let collection = op.collection();
            match op {
                Operation::Add(add) => {
                    let row = match outcome.generated_key {
                        Some(key) => try_result!(self.apply_generated_key(add, key)),
                        None => add.row.clone(),
                    };
                    try_result!(self.identity_map.add(
                        collection,
                        row.key_values(),
                        add.entity.clone()
                    ));
                    try_result!(self.unit_of_work.update_row(collection, &add.entity, row));
                }
                Operation::Update(update) => {
                    try_outcome!(
                        self.queries
                            .invalidate(cx, collection.name(), &update.stored.key_values())
                            .await
                    );
                    try_result!(self.unit_of_work.update_row(
                        collection,
                        &update.entity,
                        update.row.clone()
                    ));
                }
                Operation::Delete(delete) => {
                    try_outcome!(
                        self.queries
                            .invalidate(cx, collection.name(), &delete.stored.key_values())
                            .await
                    );
                    self.identity_map.remove_instance(&delete.entity);
                }
            }
            result.record(op.kind());
        }
        self.unit_of_work.set_persisted();
        tracing::info!(
            inserted = result.inserted,
            updated = result.updated,
            deleted = result.deleted,
            "Saved changes"
        );
        try_result!(self.publish(SessionEvent::Saved(result)));
        Outcome::Ok(result)
    }

    // ========================================================================
    // Reading
    // ========================================================================

    /// Start an entity query over the collection that stores `T`.
    pub fn query<T: ?Sized + 'static>(&self) -> Result<EntityQuery> {
        EntityQuery::new::<T>(self.collection_for::<T>()?)
    }

    /// Queue a query whose results are viewed as `T`.
    pub fn defer<T: ?Sized + 'static>(&mut self, query: impl Into<Query>) -> Result<QueryFuture<T>> {
        let query = query.into();
        if query.requested().type_id != TypeId::of::<T>() {
            return Err(requested_mismatch::<T>(&query));
        }
        Ok(QueryFuture::new(self.engine.add(query)))
    }

    /// Queue a lookup by key.
    pub fn defer_load<T: ?Sized + 'static, K: Key>(&mut self, key: &K) -> Result<QueryFuture<T>> {
        let query = KeyQuery::new::<T, K>(self.collection_for::<T>()?, key)?;
        self.defer(query)
    }

    /// Queue a lookup by key that may be served from the second-level cache.
    pub fn defer_load_cached<T: ?Sized + 'static, K: Key>(
        &mut self,
        key: &K,
        ttl: std::time::Duration,
    ) -> Result<QueryFuture<T>> {
        let query = KeyQuery::new::<T, K>(self.collection_for::<T>()?, key)?.cached(ttl);
        self.defer(query)
    }

    /// Queue a lookup of several keys.
    pub fn defer_load_many<T: ?Sized + 'static, K: Key>(&mut self, keys: &[K]) -> Result<QueryFuture<T>> {
        let query = MultipleKeyQuery::new::<T, K>(self.collection_for::<T>()?, keys)?;
        self.defer(query)
    }

    /// Run every queued query in one batch.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn execute_pending(&mut self, cx: &Cx) -> Outcome<(), Error> {
        let pending = self.engine.pending_queries();
        if pending.is_empty() {
            return Outcome::Ok(());
        }
        let results = try_outcome!(self.queries.execute(cx, &pending).await);
        try_result!(self.engine.complete(results));
        Outcome::Ok(())
    }

    /// Turn a driver row into the session's entity for that document.
    fn attach_row(&mut self, collection: &Arc<Collection>, row: &Row) -> Result<AnyEntity> {
        let row = DatabaseRow::from_row(collection, row)?;
        let key = row.key_values();
        if let Some(existing) = self.identity_map.get_any(collection, &key) {
            return Ok(existing.clone());
        }
        let entity_type = collection.entity_type_by_discriminator(row.discriminator()?)?;
        let document = self.rows.serializer().deserialize(row.document()?)?;
        let entity = entity_type.materialize(document)?;
        self.identity_map.add(collection, key, entity.clone())?;
        self.unit_of_work
            .add_or_update(collection, entity.clone(), row, DocumentState::Persisted);
        Ok(entity)
    }

    fn materialize(&mut self, id: QueryId) -> Result<Vec<AnyEntity>> {
        if let Some(done) = self.engine.entities(id)? {
            return Ok(done.to_vec());
        }
        let collection = self
            .engine
            .query(id)
            .map(|q| Arc::clone(q.collection()))
            .ok_or(Error::NotExecuted(NotExecutedError { query_id: id.get() }))?;
        let rows = self.engine.rows(id)?.to_vec();
        let entities = rows
            .iter()
            .map(|row| self.attach_row(&collection, row))
            .collect::<Result<Vec<_>>>()?;
        tracing::trace!(query_id = id.get(), entities = entities.len(), "Materialized results");
        self.engine.set_entities(id, entities.clone())?;
        Ok(entities)
    }

    /// Results of a deferred query, executing the pending batch if the query
    /// has not run yet. Resolving again replays the same instances.
    pub async fn resolve<T: ?Sized + 'static>(
        &mut self,
        cx: &Cx,
        future: &QueryFuture<T>,
    ) -> Outcome<Vec<EntityRef<T>>, Error> {
        let id = future.id();
        if self.engine.is_pending(id) {
            try_outcome!(self.execute_pending(cx).await);
        }
        Outcome::Ok(try_result!(self.results(id)))
    }

    fn results<T: ?Sized + 'static>(&mut self, id: QueryId) -> Result<Vec<EntityRef<T>>> {
        let entities = self.materialize(id)?;
        let collection = self
            .engine
            .query(id)
            .map(|q| Arc::clone(q.collection()))
            .ok_or(Error::NotExecuted(NotExecutedError { query_id: id.get() }))?;
        entities
            .iter()
            .filter(|e| self.unit_of_work.get_state(&collection, *e) != DocumentState::Deleted)
            .map(|e| collection.cast::<T>(e))
            .collect()
    }

    /// Results of a query that must already have run.
    pub fn results_of<T: ?Sized + 'static>(&mut self, future: &QueryFuture<T>) -> Result<Vec<EntityRef<T>>> {
        self.results(future.id())
    }

    /// Load one document by key, from the identity map when it is there.
    pub async fn load<T: ?Sized + 'static, K: Key>(
        &mut self,
        cx: &Cx,
        key: &K,
    ) -> Outcome<Option<EntityRef<T>>, Error> {
        let collection = try_result!(self.collection_for::<T>());
        let values = try_result!(collection.key_values(key));
        if let Some(found) = try_result!(self.identity_map.try_get::<T>(&collection, &values)) {
            if self.unit_of_work.get_state(&collection, &found) == DocumentState::Deleted {
                return Outcome::Ok(None);
            }
            tracing::trace!(collection = collection.name(), "Identity map hit");
            return Outcome::Ok(Some(found));
        }
        let future = try_result!(self.defer_load::<T, K>(key));
        let found = try_outcome!(self.resolve(cx, &future).await);
        Outcome::Ok(found.into_iter().next())
    }

    /// Load several documents by key in one query.
    pub async fn load_many<T: ?Sized + 'static, K: Key>(
        &mut self,
        cx: &Cx,
        keys: &[K],
    ) -> Outcome<Vec<EntityRef<T>>, Error> {
        let future = try_result!(self.defer_load_many::<T, K>(keys));
        self.resolve(cx, &future).await
    }

    /// Queue a query and resolve it right away.
    pub async fn fetch<T: ?Sized + 'static>(
        &mut self,
        cx: &Cx,
        query: impl Into<Query>,
    ) -> Outcome<Vec<EntityRef<T>>, Error> {
        let future = try_result!(self.defer::<T>(query));
        self.resolve(cx, &future).await
    }

    /// Close the session's shared connection.
    pub async fn close(self, cx: &Cx) -> Outcome<(), Error> {
        tracing::debug!(
            tracked = self.unit_of_work.len(),
            "Closing session"
        );
        self.connections.close(cx).await
    }
}

impl<F: ConnectionFactory> std::fmt::Debug for Session<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("tracked", &self.unit_of_work.len())
            .field("identities", &self.identity_map.len())
            .field("queries", &self.engine.len())
            .finish_non_exhaustive()
    }
}
