//! Error types for DocModel operations.

use std::fmt;

/// The primary error type for all DocModel operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (connect, disconnect, close)
    Connection(ConnectionError),
    /// Query or command execution errors reported by the driver
    Query(QueryError),
    /// Value conversion errors
    Type(TypeError),
    /// Collection/schema definition errors
    Schema(SchemaError),
    /// Configuration errors
    Config(ConfigError),
    /// An entity was used with a session that is not tracking it
    NotAttached(NotAttachedError),
    /// A deferred query result was read before its batch ran
    NotExecuted(NotExecutedError),
    /// A guarded update or delete matched no row
    OptimisticConcurrency(ConcurrencyError),
    /// A tracked entity cannot be viewed as the requested type
    TypeMismatch(TypeMismatchError),
    /// Two different instances were registered under one identity
    DuplicateIdentity(DuplicateIdentityError),
    /// The requested feature is not available for this configuration
    Unsupported(String),
    /// Operation was cancelled via asupersync
    Cancelled,
    /// Serialization/deserialization errors
    Serde(String),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<BoxedSource>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Connection lost during operation
    Disconnected,
    /// Connection was already closed by the session
    Closed,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub message: String,
    pub source: Option<BoxedSource>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique key, not null)
    Constraint,
    /// Table or column not found
    NotFound,
    /// The driver returned a different number of results than statements sent
    ResultMismatch,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct SchemaError {
    pub kind: SchemaErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorKind {
    /// Collection registered twice
    DuplicateCollection,
    /// A type is mapped to more than one collection
    AmbiguousType,
    /// No collection is registered for a type
    UnknownType,
    /// Column name already used in a collection
    DuplicateColumn,
    /// Column referenced but not defined
    ColumnNotFound,
    /// Invalid collection definition
    Invalid,
    /// Migration snapshot error
    Migration,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<BoxedSource>,
}

#[derive(Debug, Clone)]
pub struct NotAttachedError {
    /// Collection the entity was looked up in
    pub collection: String,
    /// Rust type name of the entity
    pub type_name: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotExecutedError {
    /// Identifier of the deferred query
    pub query_id: u64,
}

/// Kind of write that lost an optimistic concurrency check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone)]
pub struct ConcurrencyError {
    pub collection: String,
    /// Rendered key column values of the affected document
    pub key: String,
    pub write: WriteKind,
}

#[derive(Debug, Clone)]
pub struct TypeMismatchError {
    pub collection: String,
    /// Runtime type of the tracked entity
    pub actual: &'static str,
    /// Type the caller asked for
    pub requested: &'static str,
}

#[derive(Debug, Clone)]
pub struct DuplicateIdentityError {
    pub collection: String,
    pub key: String,
}

impl Error {
    /// Is this a cancellation signal rather than a database failure?
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Did a guarded write lose against a concurrent writer?
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Error::OptimisticConcurrency(_))
    }

    /// Shorthand for a schema definition error.
    pub fn schema(kind: SchemaErrorKind, message: impl Into<String>) -> Self {
        Error::Schema(SchemaError {
            kind,
            message: message.into(),
        })
    }

    /// Shorthand for a conversion error without column context.
    pub fn type_error(expected: &'static str, actual: impl Into<String>) -> Self {
        Error::Type(TypeError {
            expected,
            actual: actual.into(),
            column: None,
        })
    }

    /// Attach a column name to a conversion error.
    pub fn in_column(self, column: &str) -> Self {
        match self {
            Error::Type(mut e) if e.column.is_none() => {
                e.column = Some(column.to_string());
                Error::Type(e)
            }
            other => other,
        }
    }

    /// Get SQL that caused the error if available.
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => write!(f, "Query error: {}", e.message),
            Error::Type(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "Type error in column '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Schema(e) => write!(f, "Schema error: {}", e.message),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::NotAttached(e) => write!(
                f,
                "Entity of type {} is not attached to the session (collection '{}')",
                e.type_name, e.collection
            ),
            Error::NotExecuted(e) => write!(
                f,
                "Query {} has not been executed; resolve it through the session first",
                e.query_id
            ),
            Error::OptimisticConcurrency(e) => write!(
                f,
                "Concurrency conflict on {:?} of '{}' key [{}]: the row was changed or removed",
                e.write, e.collection, e.key
            ),
            Error::TypeMismatch(e) => write!(
                f,
                "Entity in '{}' is a {} and cannot be used as {}",
                e.collection, e.actual, e.requested
            ),
            Error::DuplicateIdentity(e) => write!(
                f,
                "Another instance is already tracked in '{}' with key [{}]",
                e.collection, e.key
            ),
            Error::Unsupported(msg) => write!(f, "Unsupported: {}", msg),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::Serde(msg) => write!(f, "Serialization error: {}", msg),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

/// Underlying driver or I/O error.
pub type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let source: &Option<BoxedSource> = match self {
            Error::Connection(e) => &e.source,
            Error::Query(e) => &e.source,
            Error::Config(e) => &e.source,
            _ => return None,
        };
        source
            .as_deref()
            .map(|err| err as &(dyn std::error::Error + 'static))
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<SchemaError> for Error {
    fn from(err: SchemaError) -> Self {
        Error::Schema(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

/// Result type alias for DocModel operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_error_picks_up_column_once() {
        let err = Error::type_error("BIGINT", "TEXT")
            .in_column("Id")
            .in_column("Other");
        assert_eq!(
            err.to_string(),
            "Type error in column 'Id': expected BIGINT, found TEXT"
        );
    }

    #[test]
    fn concurrency_error_is_flagged() {
        let err = Error::OptimisticConcurrency(ConcurrencyError {
            collection: "Orders".to_string(),
            key: "42".to_string(),
            write: WriteKind::Update,
        });
        assert!(err.is_concurrency_conflict());
        assert!(!err.is_cancelled());
        assert!(err.to_string().contains("Orders"));
    }

    #[test]
    fn serde_errors_convert() {
        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: Error = parse.into();
        assert!(matches!(err, Error::Serde(_)));
    }
}
