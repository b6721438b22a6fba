//! SQL dialects.

use docmodel_core::ValueKind;

/// SQL dialect for generating dialect-specific SQL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// PostgreSQL dialect (uses $1, $2 placeholders)
    #[default]
    Postgres,
    /// SQLite dialect (uses ?1, ?2 placeholders)
    Sqlite,
    /// MySQL dialect (uses ? placeholders)
    Mysql,
    /// SQL Server dialect (uses @p1, @p2 placeholders)
    SqlServer,
}

impl Dialect {
    /// Generate a placeholder for the given parameter index (1-based).
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::Sqlite => format!("?{index}"),
            Dialect::Mysql => "?".to_string(),
            Dialect::SqlServer => format!("@p{index}"),
        }
    }

    /// Quote an identifier for this dialect, doubling embedded quotes.
    pub fn quote_identifier(self, name: &str) -> String {
        match self {
            Dialect::Postgres | Dialect::Sqlite => format!("\"{}\"", name.replace('"', "\"\"")),
            Dialect::Mysql => format!("`{}`", name.replace('`', "``")),
            Dialect::SqlServer => format!("[{}]", name.replace(']', "]]")),
        }
    }

    /// Column type used when creating tables.
    pub const fn sql_type(self, kind: ValueKind) -> &'static str {
        match (self, kind) {
            (Dialect::Postgres, ValueKind::Bool) => "BOOLEAN",
            (Dialect::Sqlite, ValueKind::Bool) => "INTEGER",
            (Dialect::Mysql, ValueKind::Bool) => "TINYINT(1)",
            (Dialect::SqlServer, ValueKind::Bool) => "BIT",
            (Dialect::Sqlite, ValueKind::Int | ValueKind::BigInt) => "INTEGER",
            (_, ValueKind::Int) => "INT",
            (_, ValueKind::BigInt) => "BIGINT",
            (Dialect::Postgres, ValueKind::Double) => "DOUBLE PRECISION",
            (Dialect::Sqlite, ValueKind::Double) => "REAL",
            (Dialect::Mysql, ValueKind::Double) => "DOUBLE",
            (Dialect::SqlServer, ValueKind::Double) => "FLOAT",
            (Dialect::Mysql, ValueKind::Text) => "LONGTEXT",
            (Dialect::SqlServer, ValueKind::Text) => "NVARCHAR(MAX)",
            (_, ValueKind::Text) => "TEXT",
            (Dialect::Postgres, ValueKind::Bytes) => "BYTEA",
            (Dialect::SqlServer, ValueKind::Bytes) => "VARBINARY(MAX)",
            (_, ValueKind::Bytes) => "BLOB",
            (Dialect::Postgres, ValueKind::Uuid) => "UUID",
            (Dialect::Sqlite, ValueKind::Uuid) => "BLOB",
            (Dialect::Mysql, ValueKind::Uuid) => "BINARY(16)",
            (Dialect::SqlServer, ValueKind::Uuid) => "UNIQUEIDENTIFIER",
        }
    }

    /// Type used for short keys, where a plain text type cannot be indexed.
    pub const fn key_sql_type(self, kind: ValueKind) -> &'static str {
        match (self, kind) {
            (Dialect::Mysql, ValueKind::Text) => "VARCHAR(255)",
            (Dialect::SqlServer, ValueKind::Text) => "NVARCHAR(255)",
            _ => self.sql_type(kind),
        }
    }

    /// Auto-increment clause for a database-assigned integer key.
    pub const fn identity_clause(self) -> &'static str {
        match self {
            Dialect::Postgres => "GENERATED BY DEFAULT AS IDENTITY",
            Dialect::Sqlite => "",
            Dialect::Mysql => "AUTO_INCREMENT",
            Dialect::SqlServer => "IDENTITY(1,1)",
        }
    }

    /// Whether OFFSET/FETCH needs an ORDER BY clause.
    pub const fn paging_requires_order(self) -> bool {
        matches!(self, Dialect::SqlServer)
    }

    /// Paging clause for a SELECT, or `None` when neither bound is set.
    pub fn paging(self, skip: Option<u64>, take: Option<u64>) -> Option<String> {
        if skip.is_none() && take.is_none() {
            return None;
        }
        let skip = skip.unwrap_or(0);
        Some(match (self, take) {
            (Dialect::SqlServer, Some(take)) => {
                format!("OFFSET {skip} ROWS FETCH NEXT {take} ROWS ONLY")
            }
            (Dialect::SqlServer, None) => format!("OFFSET {skip} ROWS"),
            (_, Some(take)) => format!("LIMIT {take} OFFSET {skip}"),
            (Dialect::Postgres, None) => format!("OFFSET {skip}"),
            (Dialect::Sqlite, None) => format!("LIMIT -1 OFFSET {skip}"),
            (Dialect::Mysql, None) => format!("LIMIT 18446744073709551615 OFFSET {skip}"),
        })
    }

    /// Path literal addressing a member of a JSON document.
    pub fn json_path(self, path: &[String]) -> String {
        match self {
            Dialect::Postgres => format!("'{{{}}}'", path.join(",")),
            _ => format!("'$.{}'", path.join(".")),
        }
    }

    /// Statement run before an insert to hold a generated key, if the dialect
    /// needs one. `slot` keeps names unique within a batch.
    pub fn generated_key_prepare(self, slot: usize, key_column: &str, kind: ValueKind) -> Option<String> {
        match self {
            Dialect::SqlServer => Some(format!(
                "DECLARE @generated{slot} TABLE ({} {})",
                self.quote_identifier(key_column),
                self.sql_type(kind)
            )),
            _ => None,
        }
    }

    /// Clause placed between the column list and VALUES of an insert to
    /// capture the generated key.
    pub fn generated_key_output(self, slot: usize, key_column: &str) -> Option<String> {
        match self {
            Dialect::SqlServer => Some(format!(
                "OUTPUT INSERTED.{} INTO @generated{slot}",
                self.quote_identifier(key_column)
            )),
            _ => None,
        }
    }

    /// Expression yielding the key generated by the preceding insert.
    fn generated_key_expr(self, slot: usize, key_column: &str) -> String {
        match self {
            Dialect::Postgres => "lastval()".to_string(),
            Dialect::Sqlite => "last_insert_rowid()".to_string(),
            Dialect::Mysql => "LAST_INSERT_ID()".to_string(),
            Dialect::SqlServer => format!(
                "(SELECT {} FROM @generated{slot})",
                self.quote_identifier(key_column)
            ),
        }
    }

    /// Commands that copy the generated key into the stored document and
    /// return it as a one-column row.
    pub fn generated_key_patch(
        self,
        slot: usize,
        table: &str,
        document_column: &str,
        key_column: &str,
        document_path: &[String],
    ) -> String {
        let table = self.quote_identifier(table);
        let doc = self.quote_identifier(document_column);
        let key = self.quote_identifier(key_column);
        let path = self.json_path(document_path);
        let generated = self.generated_key_expr(slot, key_column);
        match self {
            Dialect::Postgres => format!(
                "UPDATE {table} SET {doc} = jsonb_set({doc}::jsonb, {path}, to_jsonb({key}))::text \
                 WHERE {key} = {generated} RETURNING {key}"
            ),
            Dialect::Sqlite => format!(
                "UPDATE {table} SET {doc} = json_set({doc}, {path}, {key}) \
                 WHERE {key} = {generated} RETURNING {key}"
            ),
            Dialect::Mysql => format!(
                "UPDATE {table} SET {doc} = JSON_SET({doc}, {path}, {key}) \
                 WHERE {key} = {generated};\nSELECT {generated} AS {key}"
            ),
            Dialect::SqlServer => format!(
                "UPDATE {table} SET {doc} = JSON_MODIFY({doc}, {path}, {key}) \
                 WHERE {key} = {generated};\nSELECT {key} FROM @generated{slot}"
            ),
        }
    }
}
