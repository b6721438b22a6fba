//! DDL generation from [`Difference`]s.
//!
//! One writer serves every dialect; the per-dialect pieces (quoting, types,
//! identity columns) come from [`Dialect`]. Column changes SQLite cannot
//! express with `ALTER TABLE` are written as a table rebuild.

use crate::diff::Difference;
use crate::snapshot::{ColumnSnapshot, ModelSnapshot, TableSnapshot};
use docmodel_query::Dialect;

/// Renders differences as SQL statements for one dialect.
#[derive(Debug, Clone, Copy)]
pub struct DdlWriter {
    dialect: Dialect,
}

impl DdlWriter {
    pub const fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub const fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn quote(&self, name: &str) -> String {
        self.dialect.quote_identifier(name)
    }

    fn column_type(&self, column: &ColumnSnapshot, primary_key: bool) -> &'static str {
        if primary_key {
            self.dialect.key_sql_type(column.kind)
        } else {
            self.dialect.sql_type(column.kind)
        }
    }

    fn column_def(&self, table: &TableSnapshot, column: &ColumnSnapshot) -> String {
        let is_key = table.primary_key.contains(&column.name);
        let mut def = format!(
            "{} {}",
            self.quote(&column.name),
            self.column_type(column, is_key)
        );
        if !column.nullable {
            def.push_str(" NOT NULL");
        }
        if column.identity && !self.dialect.identity_clause().is_empty() {
            def.push(' ');
            def.push_str(self.dialect.identity_clause());
        }
        def
    }

    /// `CREATE TABLE` for a full table.
    pub fn create_table(&self, table: &TableSnapshot) -> String {
        let mut lines: Vec<String> = table
            .columns
            .iter()
            .map(|c| format!("  {}", self.column_def(table, c)))
            .collect();
        if !table.primary_key.is_empty() {
            let keys: Vec<String> = table.primary_key.iter().map(|k| self.quote(k)).collect();
            lines.push(format!("  PRIMARY KEY ({})", keys.join(", ")));
        }
        format!(
            "CREATE TABLE {} (\n{}\n)",
            self.quote(&table.name),
            lines.join(",\n")
        )
    }

    pub fn drop_table(&self, name: &str) -> String {
        format!("DROP TABLE {}", self.quote(name))
    }

    fn add_column(&self, table: &TableSnapshot, column: &ColumnSnapshot) -> String {
        let keyword = if self.dialect == Dialect::SqlServer {
            "ADD"
        } else {
            "ADD COLUMN"
        };
        format!(
            "ALTER TABLE {} {} {}",
            self.quote(&table.name),
            keyword,
            self.column_def(table, column)
        )
    }

    fn drop_column(&self, table: &str, column: &str) -> String {
        format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.quote(table),
            self.quote(column)
        )
    }

    fn alter_column(&self, table: &TableSnapshot, from: &ColumnSnapshot, to: &ColumnSnapshot) -> Vec<String> {
        let name = self.quote(&table.name);
        let column = self.quote(&to.name);
        let is_key = table.primary_key.contains(&to.name);
        match self.dialect {
            Dialect::Postgres => {
                let mut stmts = Vec::new();
                if from.kind != to.kind {
                    stmts.push(format!(
                        "ALTER TABLE {} ALTER COLUMN {} TYPE {}",
                        name,
                        column,
                        self.column_type(to, is_key)
                    ));
                }
                if from.nullable != to.nullable {
                    let action = if to.nullable { "DROP NOT NULL" } else { "SET NOT NULL" };
                    stmts.push(format!("ALTER TABLE {} ALTER COLUMN {} {}", name, column, action));
                }
                if from.identity != to.identity {
                    let action = if to.identity {
                        "ADD GENERATED BY DEFAULT AS IDENTITY"
                    } else {
                        "DROP IDENTITY IF EXISTS"
                    };
                    stmts.push(format!("ALTER TABLE {} ALTER COLUMN {} {}", name, column, action));
                }
                stmts
            }
            Dialect::Mysql => vec![format!(
                "ALTER TABLE {} MODIFY COLUMN {}",
                name,
                self.column_def(table, to)
            )],
            Dialect::SqlServer => {
                let null = if to.nullable { "NULL" } else { "NOT NULL" };
                vec![format!(
                    "ALTER TABLE {} ALTER COLUMN {} {} {}",
                    name,
                    column,
                    self.column_type(to, is_key),
                    null
                )]
            }
            Dialect::Sqlite => self.rebuild_table(table),
        }
    }

    /// Recreate a table in its target shape, copying every column it keeps.
    fn rebuild_table(&self, table: &TableSnapshot) -> Vec<String> {
        let old = format!("__docmodel_old_{}", temp_ident(&table.name));
        let columns: Vec<String> = table.columns.iter().map(|c| self.quote(&c.name)).collect();
        let columns = columns.join(", ");
        vec![
            "PRAGMA foreign_keys=OFF".to_string(),
            format!(
                "ALTER TABLE {} RENAME TO {}",
                self.quote(&table.name),
                self.quote(&old)
            ),
            self.create_table(table),
            format!(
                "INSERT INTO {} ({}) SELECT {} FROM {}",
                self.quote(&table.name),
                columns,
                columns,
                self.quote(&old)
            ),
            self.drop_table(&old),
            "PRAGMA foreign_keys=ON".to_string(),
        ]
    }

    /// Statements for one difference. `target` is the snapshot the database
    /// will match once the difference is applied; SQLite rebuilds read the
    /// table shape from it.
    pub fn statements(&self, difference: &Difference, target: &ModelSnapshot) -> Vec<String> {
        tracing::trace!(dialect = ?self.dialect, change = %difference.describe(), "Generating DDL");
        match difference {
            Difference::CreateTable(table) => vec![self.create_table(table)],
            Difference::DropTable(table) => vec![self.drop_table(&table.name)],
            Difference::AddColumn { table, column } => {
                let shape = target.table(table).cloned().unwrap_or_else(|| TableSnapshot {
                    name: table.clone(),
                    columns: vec![column.clone()],
                    primary_key: Vec::new(),
                });
                vec![self.add_column(&shape, column)]
            }
            Difference::DropColumn { table, column } => vec![self.drop_column(table, &column.name)],
            Difference::AlterColumn { table, from, to } => match target.table(table) {
                Some(shape) => self.alter_column(shape, from, to),
                None => {
                    tracing::warn!(table = %table, column = %to.name, "Altered column has no target table");
                    Vec::new()
                }
            },
        }
    }
}

fn temp_ident(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}
