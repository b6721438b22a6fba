//! Deferred queries and their results.
//!
//! Queries are queued with [`QueryEngine::add`] and stay pending until the
//! session executes them, all together, the first time any of them is
//! resolved. Results are kept per query: rows as returned by the executor
//! and, once materialized, the entities built from them, so resolving the
//! same [`QueryFuture`] again replays the same instances.

use crate::executor::QueryResults;
use docmodel_core::error::NotExecutedError;
use docmodel_core::{AnyEntity, Error, Result, Row};
use docmodel_query::{Query, QueryId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

/// Handle to the results of a deferred query, viewed as `T`.
pub struct QueryFuture<T: ?Sized> {
    id: QueryId,
    _marker: PhantomData<fn() -> Box<T>>,
}

impl<T: ?Sized> QueryFuture<T> {
    pub(crate) fn new(id: QueryId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> QueryId {
        self.id
    }
}

impl<T: ?Sized> Clone for QueryFuture<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for QueryFuture<T> {}

impl<T: ?Sized> fmt::Debug for QueryFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryFuture")
            .field("id", &self.id)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

#[derive(Debug)]
enum Slot {
    Pending,
    Executed {
        rows: Vec<Row>,
        entities: Option<Vec<AnyEntity>>,
    },
}

#[derive(Debug)]
struct Entry {
    query: Query,
    slot: Slot,
}

/// Pending and executed queries of one session.
#[derive(Debug, Default)]
pub struct QueryEngine {
    entries: HashMap<QueryId, Entry>,
    pending: Vec<QueryId>,
}

impl QueryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a query. Nothing runs until the next batch. A query already
    /// known to the engine, pending or executed, keeps its slot.
    pub fn add(&mut self, query: Query) -> QueryId {
        let id = query.id();
        if self.entries.contains_key(&id) {
            tracing::trace!(query_id = id.get(), "Query already queued");
            return id;
        }
        tracing::trace!(query_id = id.get(), collection = query.collection().name(), "Queued query");
        self.entries.insert(
            id,
            Entry {
                query,
                slot: Slot::Pending,
            },
        );
        self.pending.push(id);
        id
    }

    pub fn is_pending(&self, id: QueryId) -> bool {
        matches!(
            self.entries.get(&id),
            Some(Entry {
                slot: Slot::Pending,
                ..
            })
        )
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Queries waiting for the next batch, in queue order.
    pub fn pending_queries(&self) -> Vec<Query> {
        self.pending
            .iter()
            .filter_map(|id| self.entries.get(id))
            .map(|e| e.query.clone())
            .collect()
    }

    pub fn query(&self, id: QueryId) -> Option<&Query> {
        self.entries.get(&id).map(|e| &e.query)
    }

    /// Store the rows of an executed batch. Every pending query must have a
    /// result.
    pub fn complete(&mut self, mut results: QueryResults) -> Result<()> {
        if let Some(missing) = self.pending.iter().find(|id| !results.contains_key(id)) {
            return Err(Error::Custom(format!(
                "batch returned no result for query {}",
                missing.get()
            )));
        }
        for id in self.pending.drain(..) {
            if let (Some(entry), Some(rows)) = (self.entries.get_mut(&id), results.remove(&id)) {
                entry.slot = Slot::Executed {
                    rows,
                    entities: None,
                };
            }
        }
        Ok(())
    }

    fn executed(&self, id: QueryId) -> Result<(&[Row], Option<&[AnyEntity]>)> {
        match self.entries.get(&id) {
            Some(Entry {
                slot: Slot::Executed { rows, entities },
                ..
            }) => Ok((rows, entities.as_deref())),
            _ => Err(Error::NotExecuted(NotExecutedError {
                query_id: id.get(),
            })),
        }
    }

    /// Raw rows of an executed query.
    pub fn rows(&self, id: QueryId) -> Result<&[Row]> {
        self.executed(id).map(|(rows, _)| rows)
    }

    /// Entities materialized earlier for this query, if any.
    pub fn entities(&self, id: QueryId) -> Result<Option<&[AnyEntity]>> {
        self.executed(id).map(|(_, entities)| entities)
    }

    pub fn set_entities(&mut self, id: QueryId, materialized: Vec<AnyEntity>) -> Result<()> {
        match self.entries.get_mut(&id) {
            Some(Entry {
                slot: Slot::Executed { entities, .. },
                ..
            }) => {
                *entities = Some(materialized);
                Ok(())
            }
            _ => Err(Error::NotExecuted(NotExecutedError {
                query_id: id.get(),
            })),
        }
    }

    /// Drop a query and its results.
    pub fn forget(&mut self, id: QueryId) {
        self.entries.remove(&id);
        self.pending.retain(|p| *p != id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Dog, animals, dog_row};
    use docmodel_query::KeyQuery;

    fn key_query(id: i64) -> Query {
        KeyQuery::new::<Dog, i64>(animals(), &id).unwrap().into()
    }

    #[test]
    fn results_before_execution_are_an_error() {
        let mut engine = QueryEngine::new();
        let id = engine.add(key_query(1));
        assert!(engine.is_pending(id));
        let err = engine.rows(id).unwrap_err();
        assert!(matches!(err, Error::NotExecuted(e) if e.query_id == id.get()));
    }

    #[test]
    fn complete_moves_every_pending_query() {
        let mut engine = QueryEngine::new();
        let a = engine.add(key_query(1));
        let b = engine.add(key_query(2));
        assert_eq!(engine.pending_queries().len(), 2);

        let mut results = QueryResults::new();
        results.insert(a, vec![]);
        results.insert(b, vec![dog_row(2, "Max")]);
        engine.complete(results).unwrap();

        assert!(!engine.has_pending());
        assert!(engine.rows(a).unwrap().is_empty());
        assert_eq!(engine.rows(b).unwrap().len(), 1);
        assert!(engine.entities(b).unwrap().is_none());
    }

    #[test]
    fn incomplete_batch_leaves_queries_pending() {
        let mut engine = QueryEngine::new();
        let a = engine.add(key_query(1));
        assert!(engine.complete(QueryResults::new()).is_err());
        assert!(engine.is_pending(a));
    }

    #[test]
    fn adding_a_known_query_keeps_its_results() {
        let mut engine = QueryEngine::new();
        let query = key_query(4);
        let id = engine.add(query.clone());
        assert_eq!(engine.add(query.clone()), id);
        assert_eq!(engine.pending_queries().len(), 1);

        let mut results = QueryResults::new();
        results.insert(id, vec![dog_row(4, "Rex")]);
        engine.complete(results).unwrap();

        engine.add(query);
        assert!(!engine.is_pending(id));
        assert!(!engine.has_pending());
        assert_eq!(engine.rows(id).unwrap().len(), 1);
    }

    #[test]
    fn future_handles_are_copyable() {
        let mut engine = QueryEngine::new();
        let future: QueryFuture<Dog> = QueryFuture::new(engine.add(key_query(3)));
        let copy = future;
        assert_eq!(copy.id(), future.id());
        engine.forget(future.id());
        assert!(engine.is_empty());
    }
}
