//! Migration generation.

use crate::ddl::DdlWriter;
use crate::diff::{Difference, diff};
use crate::snapshot::ModelSnapshot;
use docmodel_core::{Result, Schema};
use docmodel_query::Dialect;

/// A generated migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// Unique migration ID (typically timestamp-based)
    pub id: String,
    /// Human-readable description
    pub description: String,
    /// SQL to apply the migration
    pub up: String,
    /// SQL to revert the migration
    pub down: String,
    /// Snapshot the database matches after `up`; store it for the next diff.
    pub snapshot: ModelSnapshot,
}

impl Migration {
    /// Statements of `up`, without terminators.
    pub fn up_statements(&self) -> impl Iterator<Item = &str> {
        split_script(&self.up)
    }

    pub fn down_statements(&self) -> impl Iterator<Item = &str> {
        split_script(&self.down)
    }
}

fn split_script(script: &str) -> impl Iterator<Item = &str> {
    script
        .split(";\n")
        .map(|s| s.trim().trim_end_matches(';'))
        .filter(|s| !s.is_empty())
}

fn script(statements: &[String]) -> String {
    statements.iter().map(|s| format!("{s};\n")).collect()
}

/// Writes up/down migrations between two model snapshots.
#[derive(Debug, Clone, Copy)]
pub struct MigrationWriter {
    ddl: DdlWriter,
}

impl MigrationWriter {
    pub const fn new(dialect: Dialect) -> Self {
        Self {
            ddl: DdlWriter::new(dialect),
        }
    }

    pub const fn dialect(&self) -> Dialect {
        self.ddl.dialect()
    }

    /// Migration from `previous` to `current`, or `None` if nothing changed.
    #[tracing::instrument(level = "debug", skip(self, previous, current))]
    pub fn write(
        &self,
        id: &str,
        previous: &ModelSnapshot,
        current: &ModelSnapshot,
    ) -> Option<Migration> {
        let differences = diff(previous, current);
        if differences.is_empty() {
            tracing::debug!("Model unchanged; no migration written");
            return None;
        }
        Some(self.write_differences(id, &differences, previous, current))
    }

    /// Migration from a stored snapshot to the live schema.
    pub fn write_for_schema(&self, id: &str, previous: &ModelSnapshot, schema: &Schema) -> Option<Migration> {
        self.write(id, previous, &ModelSnapshot::from_schema(schema))
    }

    /// Like [`write`](Self::write), reading the previous snapshot from JSON.
    pub fn write_from_json(&self, id: &str, previous: &str, schema: &Schema) -> Result<Option<Migration>> {
        let previous = ModelSnapshot::from_json(previous)?;
        Ok(self.write_for_schema(id, &previous, schema))
    }

    /// Render a list of differences. `down` undoes them in reverse order.
    pub fn write_differences(
        &self,
        id: &str,
        differences: &[Difference],
        previous: &ModelSnapshot,
        current: &ModelSnapshot,
    ) -> Migration {
        let up: Vec<String> = differences
            .iter()
            .flat_map(|d| self.ddl.statements(d, current))
            .collect();
        let down: Vec<String> = differences
            .iter()
            .rev()
            .flat_map(|d| self.ddl.statements(&d.inverse(), previous))
            .collect();
        let description = differences
            .iter()
            .map(Difference::describe)
            .collect::<Vec<_>>()
            .join(", ");

        if differences.iter().any(Difference::is_destructive) {
            tracing::warn!(id = %id, "Migration may lose data: {}", description);
        }
        tracing::info!(
            id = %id,
            dialect = ?self.dialect(),
            up = up.len(),
            down = down.len(),
            "Generated migration"
        );

        Migration {
            id: id.to_string(),
            description,
            up: script(&up),
            down: script(&down),
            snapshot: current.clone(),
        }
    }
}
