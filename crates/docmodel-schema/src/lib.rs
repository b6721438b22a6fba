//! Schema snapshots and migration generation for DocModel Rust.
//!
//! `docmodel-schema` turns the table layout of a [`Schema`](docmodel_core::Schema)
//! into DDL. It never talks to a database:
//!
//! - [`ModelSnapshot`] captures the tables a schema maps to, as JSON.
//! - [`diff()`] lists the [`Difference`]s between two snapshots.
//! - [`MigrationWriter`] renders them as up/down SQL for a [`Dialect`].
//!
//! # Example
//!
//! ```ignore
//! use docmodel_schema::{MigrationWriter, ModelSnapshot};
//!
//! let previous = std::fs::read_to_string("migrations/snapshot.json")?;
//! let writer = MigrationWriter::new(Dialect::Postgres);
//! if let Some(migration) = writer.write_from_json("0002_add_name", &previous, &schema)? {
//!     std::fs::write("migrations/0002_add_name.up.sql", &migration.up)?;
//!     std::fs::write("migrations/0002_add_name.down.sql", &migration.down)?;
//!     std::fs::write("migrations/snapshot.json", migration.snapshot.to_json()?)?;
//! }
//! ```

pub mod ddl;
pub mod diff;
pub mod migrate;
pub mod snapshot;

#[cfg(test)]
pub(crate) mod test_support;

pub use ddl::DdlWriter;
pub use diff::{Difference, diff};
pub use docmodel_query::Dialect;
pub use migrate::{Migration, MigrationWriter};
pub use snapshot::{ColumnSnapshot, ModelSnapshot, SNAPSHOT_VERSION, TableSnapshot};
