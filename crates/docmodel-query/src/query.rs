//! Read queries against a collection.
//!
//! Every query gets a process-unique [`QueryId`]; results are looked up by
//! that id after the batch containing the query has run.

use docmodel_core::error::SchemaErrorKind;
use docmodel_core::{Collection, Error, Key, Result, Value};
use std::any::TypeId;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

static NEXT_QUERY_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a query instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryId(u64);

impl QueryId {
    fn next() -> Self {
        Self(NEXT_QUERY_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// Second-level cache hint for a key lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheHint {
    pub ttl: Duration,
}

/// The type a query's results are viewed as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requested {
    pub type_id: TypeId,
    pub name: &'static str,
}

impl Requested {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }
}

/// A SQL condition with `?` markers for its parameters. Write `??` for a literal `?`.
///
/// ```ignore
/// Predicate::new("\"Name\" = ? AND \"Age\" > ?", vec!["Rex".into(), 3i64.into()])
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Predicate {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

fn discriminators(collection: &Collection, requested: Requested) -> Result<Option<Vec<&'static str>>> {
    match collection.discriminators_for(requested.type_id) {
        Some(list) if list.is_empty() => Err(Error::schema(
            SchemaErrorKind::UnknownType,
            format!(
                "collection '{}' stores nothing viewable as {}",
                collection.name(),
                requested.name
            ),
        )),
        other => Ok(other),
    }
}

/// Select documents matching a predicate.
#[derive(Debug, Clone)]
pub struct EntityQuery {
    id: QueryId,
    collection: Arc<Collection>,
    requested: Requested,
    discriminators: Option<Vec<&'static str>>,
    predicate: Option<Predicate>,
    order_by: Option<String>,
    skip: Option<u64>,
    take: Option<u64>,
}

impl EntityQuery {
    pub fn new<T: ?Sized + 'static>(collection: Arc<Collection>) -> Result<Self> {
        let requested = Requested::of::<T>();
        let discriminators = discriminators(&collection, requested)?;
        Ok(Self {
            id: QueryId::next(),
            collection,
            requested,
            discriminators,
            predicate: None,
            order_by: None,
            skip: None,
            take: None,
        })
    }

    /// Add a condition; several calls are combined with AND.
    pub fn filter(mut self, sql: impl Into<String>, params: Vec<Value>) -> Self {
        let sql = sql.into();
        self.predicate = Some(match self.predicate.take() {
            None => Predicate::new(sql, params),
            Some(mut p) => {
                p.sql = format!("({}) AND ({})", p.sql, sql);
                p.params.extend(params);
                p
            }
        });
        self
    }

    /// Raw ORDER BY expression, e.g. `"\"Name\" DESC"`.
    pub fn order_by(mut self, expr: impl Into<String>) -> Self {
        self.order_by = Some(expr.into());
        self
    }

    pub fn skip(mut self, n: u64) -> Self {
        self.skip = Some(n);
        self
    }

    pub fn take(mut self, n: u64) -> Self {
        self.take = Some(n);
        self
    }

    pub fn id(&self) -> QueryId {
        self.id
    }

    pub fn collection(&self) -> &Arc<Collection> {
        &self.collection
    }

    pub fn requested(&self) -> Requested {
        self.requested
    }

    pub fn discriminators(&self) -> Option<&[&'static str]> {
        self.discriminators.as_deref()
    }

    pub fn predicate(&self) -> Option<&Predicate> {
        self.predicate.as_ref()
    }

    pub fn order(&self) -> Option<&str> {
        self.order_by.as_deref()
    }

    pub fn paging(&self) -> (Option<u64>, Option<u64>) {
        (self.skip, self.take)
    }
}

/// Select one document by key.
#[derive(Debug, Clone)]
pub struct KeyQuery {
    id: QueryId,
    collection: Arc<Collection>,
    requested: Requested,
    discriminators: Option<Vec<&'static str>>,
    key: Vec<Value>,
    cache: Option<CacheHint>,
}

impl KeyQuery {
    pub fn new<T: ?Sized + 'static, K: Key>(collection: Arc<Collection>, key: &K) -> Result<Self> {
        let requested = Requested::of::<T>();
        let discriminators = discriminators(&collection, requested)?;
        let key = collection.key_values(key)?;
        Ok(Self {
            id: QueryId::next(),
            collection,
            requested,
            discriminators,
            key,
            cache: None,
        })
    }

    /// Serve this lookup from the second-level cache when possible.
    pub fn cached(mut self, ttl: Duration) -> Self {
        self.cache = Some(CacheHint { ttl });
        self
    }

    pub fn id(&self) -> QueryId {
        self.id
    }

    pub fn collection(&self) -> &Arc<Collection> {
        &self.collection
    }

    pub fn requested(&self) -> Requested {
        self.requested
    }

    pub fn discriminators(&self) -> Option<&[&'static str]> {
        self.discriminators.as_deref()
    }

    pub fn key(&self) -> &[Value] {
        &self.key
    }

    pub fn cache_hint(&self) -> Option<CacheHint> {
        self.cache
    }
}

/// Select several documents by key.
#[derive(Debug, Clone)]
pub struct MultipleKeyQuery {
    id: QueryId,
    collection: Arc<Collection>,
    requested: Requested,
    discriminators: Option<Vec<&'static str>>,
    keys: Vec<Vec<Value>>,
}

impl MultipleKeyQuery {
    pub fn new<T: ?Sized + 'static, K: Key>(collection: Arc<Collection>, keys: &[K]) -> Result<Self> {
        let requested = Requested::of::<T>();
        let discriminators = discriminators(&collection, requested)?;
        let keys = keys
            .iter()
            .map(|k| collection.key_values(k))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            id: QueryId::next(),
            collection,
            requested,
            discriminators,
            keys,
        })
    }

    pub fn id(&self) -> QueryId {
        self.id
    }

    pub fn collection(&self) -> &Arc<Collection> {
        &self.collection
    }

    pub fn requested(&self) -> Requested {
        self.requested
    }

    pub fn discriminators(&self) -> Option<&[&'static str]> {
        self.discriminators.as_deref()
    }

    pub fn keys(&self) -> &[Vec<Value>] {
        &self.keys
    }
}

/// Visitor over the query variants.
pub trait QueryVisitor {
    type Output;

    fn visit_entity(&mut self, query: &EntityQuery) -> Self::Output;

    fn visit_key(&mut self, query: &KeyQuery) -> Self::Output;

    fn visit_multiple_key(&mut self, query: &MultipleKeyQuery) -> Self::Output;
}

/// Any read query.
#[derive(Debug, Clone)]
pub enum Query {
    Entity(EntityQuery),
    Key(KeyQuery),
    MultipleKey(MultipleKeyQuery),
}

impl Query {
    pub fn accept<V: QueryVisitor>(&self, visitor: &mut V) -> V::Output {
        match self {
            Query::Entity(q) => visitor.visit_entity(q),
            Query::Key(q) => visitor.visit_key(q),
            Query::MultipleKey(q) => visitor.visit_multiple_key(q),
        }
    }

    pub fn id(&self) -> QueryId {
        match self {
            Query::Entity(q) => q.id(),
            Query::Key(q) => q.id(),
            Query::MultipleKey(q) => q.id(),
        }
    }

    pub fn collection(&self) -> &Arc<Collection> {
        match self {
            Query::Entity(q) => q.collection(),
            Query::Key(q) => q.collection(),
            Query::MultipleKey(q) => q.collection(),
        }
    }

    pub fn requested(&self) -> Requested {
        match self {
            Query::Entity(q) => q.requested(),
            Query::Key(q) => q.requested(),
            Query::MultipleKey(q) => q.requested(),
        }
    }
}

impl From<EntityQuery> for Query {
    fn from(q: EntityQuery) -> Self {
        Query::Entity(q)
    }
}

impl From<KeyQuery> for Query {
    fn from(q: KeyQuery) -> Self {
        Query::Key(q)
    }
}

impl From<MultipleKeyQuery> for Query {
    fn from(q: MultipleKeyQuery) -> Self {
        Query::MultipleKey(q)
    }
}
