//! Database connection traits.
//!
//! A session talks to the database only through [`Connection`], in batches:
//! every pending read is sent as one [`CommandBatch`], and every flush of the
//! unit of work is sent as another. Drivers decide how a batch becomes a
//! round-trip (a multi-statement command, a pipeline, a transaction).
//!
//! All operations integrate with asupersync's structured concurrency via `Cx`
//! context for proper cancellation and timeout handling.

use crate::row::Row;
use crate::value::Value;
use asupersync::{Cx, Outcome};

/// One SQL statement with its parameters.
///
/// A statement may hold several commands separated by `;` (an insert followed
/// by a key patch, for example). Drivers report the rows of the last command
/// that returned any and the row count of the first.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// Statements sent to the database together.
///
/// Parameter placeholders are numbered across the whole batch, so the batch
/// can also be sent as a single command text with one parameter list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandBatch {
    statements: Vec<Statement>,
}

impl CommandBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, statement: Statement) {
        self.statements.push(statement);
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    /// All statements as one command text.
    pub fn command_text(&self) -> String {
        self.statements
            .iter()
            .map(|s| s.sql.as_str())
            .collect::<Vec<_>>()
            .join(";\n")
    }

    /// All parameters in placeholder order.
    pub fn parameters(&self) -> Vec<Value> {
        self.statements
            .iter()
            .flat_map(|s| s.params.iter().cloned())
            .collect()
    }
}

/// Outcome of one statement of a write batch.
#[derive(Debug, Clone, Default)]
pub struct StatementResult {
    pub rows_affected: u64,
    /// Rows returned by the statement (generated keys, for example).
    pub rows: Vec<Row>,
}

/// A database connection capable of executing batches.
///
/// All operations are async and take a `Cx` context for cancellation/timeout
/// support. Implementations must be `Send + Sync` for use across async
/// boundaries.
pub trait Connection: Send + Sync {
    /// Run read statements; one row list per statement, in order.
    fn query_batch(
        &self,
        cx: &Cx,
        batch: &CommandBatch,
    ) -> impl Future<Output = Outcome<Vec<Vec<Row>>, crate::Error>> + Send;

    /// Run write statements atomically; one result per statement, in order.
    fn execute_batch(
        &self,
        cx: &Cx,
        batch: &CommandBatch,
    ) -> impl Future<Output = Outcome<Vec<StatementResult>, crate::Error>> + Send;

    /// Close the connection gracefully.
    fn close(&self, cx: &Cx) -> impl Future<Output = Outcome<(), crate::Error>> + Send;
}

/// Opens connections for sessions.
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: Connection + 'static;

    fn connect(&self, cx: &Cx) -> impl Future<Output = Outcome<Self::Connection, crate::Error>> + Send;
}

/// How a session uses connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionMode {
    /// Open one connection on first use and keep it until the session closes.
    #[default]
    PerSession,
    /// Open a connection for every batch and close it afterwards.
    PerCommand,
}
