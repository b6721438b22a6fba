//! Connection lifecycle for a session.
//!
//! In [`ConnectionMode::PerSession`] the first batch opens a connection that
//! is reused until [`ConnectionManager::close`]. The slot sits behind an
//! async mutex, so concurrent first use still opens exactly one connection.
//! In [`ConnectionMode::PerCommand`] every batch opens and closes its own.

use asupersync::sync::Mutex;
use docmodel_core::error::{ConnectionError, ConnectionErrorKind};
use docmodel_core::{
    CommandBatch, Connection, ConnectionFactory, ConnectionMode, Cx, Error, Outcome, Row,
    StatementResult, try_outcome,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

fn lock_error() -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Connect,
        message: "Failed to acquire connection slot".to_string(),
        source: None,
    })
}

/// Hands out connections according to a [`ConnectionMode`].
pub struct ConnectionManager<F: ConnectionFactory> {
    factory: Arc<F>,
    mode: ConnectionMode,
    shared: Mutex<Option<Arc<F::Connection>>>,
    opened: AtomicU64,
}

impl<F: ConnectionFactory> ConnectionManager<F> {
    pub fn new(factory: Arc<F>, mode: ConnectionMode) -> Self {
        Self {
            factory,
            mode,
            shared: Mutex::new(None),
            opened: AtomicU64::new(0),
        }
    }

    pub fn mode(&self) -> ConnectionMode {
        self.mode
    }

    /// Connections opened so far.
    pub fn opened(&self) -> u64 {
        self.opened.load(Ordering::Relaxed)
    }

    async fn open(&self, cx: &Cx) -> Outcome<Arc<F::Connection>, Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        let conn = try_outcome!(self.factory.connect(cx).await);
        let total = self.opened.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(mode = ?self.mode, opened = total, "Opened connection");
        Outcome::Ok(Arc::new(conn))
    }

    /// Get a connection for one batch.
    pub async fn acquire(&self, cx: &Cx) -> Outcome<Arc<F::Connection>, Error> {
        match self.mode {
            ConnectionMode::PerCommand => self.open(cx).await,
            ConnectionMode::PerSession => {
                let Ok(mut guard) = self.shared.lock(cx).await else {
                    return Outcome::Err(lock_error());
                };
                if let Some(conn) = guard.as_ref() {
                    return Outcome::Ok(Arc::clone(conn));
                }
                let conn = try_outcome!(self.open(cx).await);
                *guard = Some(Arc::clone(&conn));
                Outcome::Ok(conn)
            }
        }
    }

    /// Give a connection back after a batch. Shared connections stay open.
    pub async fn release(&self, cx: &Cx, conn: Arc<F::Connection>) -> Outcome<(), Error> {
        match self.mode {
            ConnectionMode::PerSession => Outcome::Ok(()),
            ConnectionMode::PerCommand => conn.close(cx).await,
        }
    }

    /// Release `conn` and hand back the batch result. A failed close is
    /// logged; it never replaces the result of work already done.
    async fn finish<T>(&self, cx: &Cx, conn: Arc<F::Connection>, result: Outcome<T, Error>) -> Outcome<T, Error> {
        match self.release(cx, conn).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => tracing::warn!(error = %e, "Failed to close connection after batch"),
            Outcome::Cancelled(reason) => {
                tracing::warn!(reason = ?reason, "Connection close was cancelled");
            }
            Outcome::Panicked(payload) => {
                tracing::warn!(payload = ?payload, "Connection close panicked");
            }
        }
        result
    }

    /// Run a read batch on an acquired connection.
    pub async fn query_batch(&self, cx: &Cx, batch: &CommandBatch) -> Outcome<Vec<Vec<Row>>, Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        let conn = try_outcome!(self.acquire(cx).await);
        let result = match cx.cancel_reason() {
            Some(reason) => Outcome::Cancelled(reason),
            None => conn.query_batch(cx, batch).await,
        };
        self.finish(cx, conn, result).await
    }

    /// Run a write batch on an acquired connection.
    pub async fn execute_batch(&self, cx: &Cx, batch: &CommandBatch) -> Outcome<Vec<StatementResult>, Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        let conn = try_outcome!(self.acquire(cx).await);
        let result = match cx.cancel_reason() {
            Some(reason) => Outcome::Cancelled(reason),
            None => conn.execute_batch(cx, batch).await,
        };
        self.finish(cx, conn, result).await
    }

    /// Close the shared connection, if one was opened.
    pub async fn close(&self, cx: &Cx) -> Outcome<(), Error> {
        let Ok(mut guard) = self.shared.lock(cx).await else {
            return Outcome::Err(lock_error());
        };
        match guard.take() {
            Some(conn) => {
                tracing::debug!("Closing session connection");
                conn.close(cx).await
            }
            None => Outcome::Ok(()),
        }
    }
}

impl<F: ConnectionFactory> std::fmt::Debug for ConnectionManager<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("mode", &self.mode)
            .field("opened", &self.opened())
            .finish_non_exhaustive()
    }
}
