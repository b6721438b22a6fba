//! Session factory.
//!
//! A [`SessionFactory`] holds what every session of an application shares:
//! the schema, the connection factory, the second-level cache and the event
//! publisher. Sessions themselves are cheap and short-lived.

use docmodel_core::{ConnectionFactory, Result, Schema};
use docmodel_schema::{Migration, MigrationWriter, ModelSnapshot};
use docmodel_session::{Cache, EventPublisher, Session, SessionConfig};
use std::sync::Arc;

/// Opens sessions over one schema and one database.
pub struct SessionFactory<F: ConnectionFactory> {
    schema: Arc<Schema>,
    connections: Arc<F>,
    config: SessionConfig,
    cache: Option<Arc<dyn Cache>>,
    publisher: Option<Arc<dyn EventPublisher>>,
}

impl<F: ConnectionFactory> SessionFactory<F> {
    /// Create a factory with the default session configuration.
    pub fn new(schema: impl Into<Arc<Schema>>, connections: F) -> Self {
        Self {
            schema: schema.into(),
            connections: Arc::new(connections),
            config: SessionConfig::default(),
            cache: None,
            publisher: None,
        }
    }

    /// Replace the configuration new sessions start with.
    #[must_use]
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a second-level cache between every session.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn session_config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn connections(&self) -> &Arc<F> {
        &self.connections
    }

    /// Open a new session. No connection is made until its first batch.
    pub fn open_session(&self) -> Session<F> {
        let mut session = Session::new(
            Arc::clone(&self.schema),
            Arc::clone(&self.connections),
            self.config.clone(),
        );
        if let Some(cache) = &self.cache {
            session = session.with_cache(Arc::clone(cache));
        }
        if let Some(publisher) = &self.publisher {
            session = session.with_publisher(Arc::clone(publisher));
        }
        tracing::trace!(schema_tables = self.schema.collections().len(), "Opened session from factory");
        session
    }

    /// Snapshot of the tables this factory's schema maps to.
    pub fn snapshot(&self) -> ModelSnapshot {
        ModelSnapshot::from_schema(&self.schema)
    }

    /// Migration from `previous` to this factory's schema, in the configured
    /// dialect.
    pub fn migration(&self, id: &str, previous: &ModelSnapshot) -> Option<Migration> {
        MigrationWriter::new(self.config.dialect).write_for_schema(id, previous, &self.schema)
    }

    /// Like [`migration`](Self::migration), reading a stored JSON snapshot.
    pub fn migration_from_json(&self, id: &str, previous: &str) -> Result<Option<Migration>> {
        MigrationWriter::new(self.config.dialect).write_from_json(id, previous, &self.schema)
    }
}

impl<F: ConnectionFactory> std::fmt::Debug for SessionFactory<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionFactory")
            .field("collections", &self.schema.collections().len())
            .field("config", &self.config)
            .field("cache", &self.cache.is_some())
            .field("publisher", &self.publisher.is_some())
            .finish_non_exhaustive()
    }
}
