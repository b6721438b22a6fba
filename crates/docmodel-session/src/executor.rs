//! Batch execution of queries and writes.
//!
//! [`SqlQueryExecutor`] sends every pending query as one read batch.
//! [`CachingQueryExecutor`] answers cached key lookups first and forwards
//! the rest. [`SqlUpdateExecutor`] sends all writes of a save as one write
//! batch and turns guarded statements that touched no row into concurrency
//! conflicts.

use crate::cache::{Cache, CacheOptions};
use crate::connection_manager::ConnectionManager;
use docmodel_core::error::{ConcurrencyError, QueryError, QueryErrorKind};
use docmodel_core::{
    ConnectionFactory, Cx, Error, Outcome, Row, RowSet, Value, try_outcome, try_result,
};
use docmodel_query::{Dialect, Operation, ParameterCounter, Query, QueryId, QueryWriter, UpdateWriter};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Rows returned for each query of a batch.
pub type QueryResults = HashMap<QueryId, Vec<Row>>;

fn result_mismatch(expected: usize, actual: usize) -> Error {
    Error::Query(QueryError {
        kind: QueryErrorKind::ResultMismatch,
        sql: None,
        message: format!("sent {} statements but received {} results", expected, actual),
        source: None,
    })
}

/// Runs read queries.
pub trait QueryExecutor: Send + Sync {
    fn execute<'a>(
        &'a self,
        cx: &'a Cx,
        queries: &'a [Query],
    ) -> impl Future<Output = Outcome<QueryResults, Error>> + Send + 'a;
}

/// Renders queries with a dialect and runs them in one round trip.
pub struct SqlQueryExecutor<F: ConnectionFactory> {
    connections: Arc<ConnectionManager<F>>,
    dialect: Dialect,
}

impl<F: ConnectionFactory> SqlQueryExecutor<F> {
    pub fn new(connections: Arc<ConnectionManager<F>>, dialect: Dialect) -> Self {
        Self {
            connections,
            dialect,
        }
    }
}

impl<F: ConnectionFactory> QueryExecutor for SqlQueryExecutor<F> {
    fn execute<'a>(
        &'a self,
        cx: &'a Cx,
        queries: &'a [Query],
    ) -> impl Future<Output = Outcome<QueryResults, Error>> + Send + 'a {
        async move {
            if queries.is_empty() {
                return Outcome::Ok(QueryResults::new());
            }
            let mut counter = ParameterCounter::new(self.dialect);
            let batch = try_result!(QueryWriter::write_batch(&mut counter, queries));
            tracing::debug!(
                queries = queries.len(),
                params = counter.count(),
                "Executing query batch"
            );
            let results = try_outcome!(self.connections.query_batch(cx, &batch).await);
            if results.len() != queries.len() {
                return Outcome::Err(result_mismatch(queries.len(), results.len()));
            }
            Outcome::Ok(queries.iter().map(Query::id).zip(results).collect())
        }
    }
}

fn discriminator_allowed(query: &docmodel_query::KeyQuery, row: &Row) -> bool {
    let Some(allowed) = query.discriminators() else {
        return true;
    };
    let collection = query.collection();
    let column = &collection.columns()[collection.discriminator_index()].name;
    match row.get_by_name(column) {
        Some(Value::Text(d)) => allowed.contains(&d.as_str()),
        _ => false,
    }
}

/// Whether a cached row belongs to the document the lookup asked for.
fn key_matches(query: &docmodel_query::KeyQuery, row: &Row) -> bool {
    let collection = query.collection();
    collection
        .key_columns()
        .iter()
        .zip(query.key())
        .all(|(column, wanted)| {
            let name = &collection.columns()[column.column].name;
            row.get_by_name(name).is_some_and(|v| v.same_as(wanted))
        })
}

/// Serves key lookups from a [`Cache`] and forwards everything else.
///
/// Without a cache every batch goes straight to the inner executor.
pub struct CachingQueryExecutor<E> {
    inner: E,
    cache: Option<Arc<dyn Cache>>,
    options: CacheOptions,
}

impl<E: QueryExecutor> CachingQueryExecutor<E> {
    pub fn new(inner: E, cache: Option<Arc<dyn Cache>>, options: CacheOptions) -> Self {
        Self {
            inner,
            cache,
            options,
        }
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    pub fn cache(&self) -> Option<&Arc<dyn Cache>> {
        self.cache.as_ref()
    }

    fn ttl_for(&self, query: &Query) -> Option<Duration> {
        match query {
            Query::Key(k) => k
                .cache_hint()
                .map(|hint| hint.ttl)
                .or(self.options.default_ttl),
            _ => None,
        }
    }

    fn cache_key(&self, query: &Query) -> Option<String> {
        match query {
            Query::Key(k) => Some(self.options.key_for(k.collection().name(), k.key())),
            _ => None,
        }
    }

    /// Drop the cached rows of one document.
    pub async fn invalidate(&self, cx: &Cx, collection: &str, key: &[Value]) -> Outcome<(), Error> {
        match &self.cache {
            Some(cache) => cache.remove(cx, &self.options.key_for(collection, key)).await,
            None => Outcome::Ok(()),
        }
    }
}

impl<E: QueryExecutor> QueryExecutor for CachingQueryExecutor<E> {
    fn execute<'a>(
        &'a self,
        cx: &'a Cx,
        queries: &'a [Query],
    ) -> impl Future<Output = Outcome<QueryResults, Error>> + Send + 'a {
        async move {
            let Some(cache) = &self.cache else {
                return self.inner.execute(cx, queries).await;
            };

            let mut results = QueryResults::new();
            let mut misses = Vec::new();
            let mut to_store = Vec::new();
            for query in queries {
                let (Some(ttl), Some(key), Query::Key(key_query)) =
                    (self.ttl_for(query), self.cache_key(query), query)
                else {
                    misses.push(query.clone());
                    continue;
                };
                let cached = match try_outcome!(cache.get(cx, &key).await) {
                    Some(text) => {
                        let set: RowSet = try_result!(serde_json::from_str(&text).map_err(Error::from));
                        set.into_rows()
                            .into_iter()
                            .filter(|r| key_matches(key_query, r) && discriminator_allowed(key_query, r))
                            .collect()
                    }
                    None => Vec::new(),
                };
                if cached.is_empty() {
                    tracing::trace!(key = %key, "Cache miss");
                    to_store.push((query.id(), key, ttl));
                    misses.push(query.clone());
                } else {
                    tracing::trace!(key = %key, rows = cached.len(), "Cache hit");
                    results.insert(query.id(), cached);
                }
            }
            tracing::debug!(
                hits = results.len(),
                misses = misses.len(),
                "Resolved cached lookups"
            );

            let fetched = try_outcome!(self.inner.execute(cx, &misses).await);
            for (id, key, ttl) in to_store {
                let Some(rows) = fetched.get(&id) else {
                    continue;
                };
                if rows.is_empty() {
                    continue;
                }
                let text = try_result!(serde_json::to_string(&RowSet::from_rows(rows)).map_err(Error::from));
                try_outcome!(cache.set(cx, &key, text, ttl).await);
            }
            results.extend(fetched);
            Outcome::Ok(results)
        }
    }
}

/// Per-operation result of a write batch.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome {
    pub rows_affected: u64,
    /// Key assigned by the database, for inserts into computed-key collections.
    pub generated_key: Option<Value>,
}

/// Runs the writes of a save.
pub trait UpdateExecutor: Send + Sync {
    fn execute<'a>(
        &'a self,
        cx: &'a Cx,
        operations: &'a [Operation],
    ) -> impl Future<Output = Outcome<Vec<WriteOutcome>, Error>> + Send + 'a;
}

/// Renders operations with a dialect and runs them as one write batch.
pub struct SqlUpdateExecutor<F: ConnectionFactory> {
    connections: Arc<ConnectionManager<F>>,
    dialect: Dialect,
}

impl<F: ConnectionFactory> SqlUpdateExecutor<F> {
    pub fn new(connections: Arc<ConnectionManager<F>>, dialect: Dialect) -> Self {
        Self {
            connections,
            dialect,
        }
    }
}

impl<F: ConnectionFactory> UpdateExecutor for SqlUpdateExecutor<F> {
    fn execute<'a>(
        &'a self,
        cx: &'a Cx,
        operations: &'a [Operation],
    ) -> impl Future<Output = Outcome<Vec<WriteOutcome>, Error>> + Send + 'a {
        async move {
            if operations.is_empty() {
                return Outcome::Ok(Vec::new());
            }
            let mut counter = ParameterCounter::new(self.dialect);
            let written = try_result!(UpdateWriter::write_all(&mut counter, operations));
            let mut batch = docmodel_core::CommandBatch::new();
            for w in &written {
                batch.push(w.statement.clone());
            }
            tracing::debug!(
                operations = operations.len(),
                params = counter.count(),
                "Executing write batch"
            );
            let results = try_outcome!(self.connections.execute_batch(cx, &batch).await);
            if results.len() != written.len() {
                return Outcome::Err(result_mismatch(written.len(), results.len()));
            }

            let mut outcomes = Vec::with_capacity(results.len());
            for ((op, w), result) in operations.iter().zip(&written).zip(results) {
                if w.guarded && result.rows_affected == 0 {
                    tracing::warn!(
                        collection = op.collection().name(),
                        key = %op.rendered_key(),
                        write = ?op.kind(),
                        "Optimistic concurrency check failed"
                    );
                    return Outcome::Err(Error::OptimisticConcurrency(ConcurrencyError {
                        collection: op.collection().name().to_string(),
                        key: op.rendered_key(),
                        write: op.kind(),
                    }));
                }
                let generated_key = if w.returns_key {
                    let key = result
                        .rows
                        .last()
                        .and_then(|row| row.get(0))
                        .filter(|v| !v.is_null())
                        .cloned();
                    match key {
                        Some(key) => Some(key),
                        None => {
                            return Outcome::Err(Error::Query(QueryError {
                                kind: QueryErrorKind::ResultMismatch,
                                sql: Some(w.statement.sql.clone()),
                                message: "insert did not return the generated key".to_string(),
                                source: None,
                            }));
                        }
                    }
                } else {
                    None
                };
                outcomes.push(WriteOutcome {
                    rows_affected: result.rows_affected,
                    generated_key,
                });
            }
            Outcome::Ok(outcomes)
        }
    }
}
