//! Structural differences between two model snapshots.
//!
//! [`diff`] compares the snapshot a previous migration was generated from
//! against the current one and lists what has to change, in an order that is
//! safe to execute: new tables, then column additions and changes, then column
//! and table drops.

use crate::snapshot::{ColumnSnapshot, ModelSnapshot, TableSnapshot};

/// A single change to the database structure.
///
/// Every variant carries enough of the old shape to be inverted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Difference {
    CreateTable(TableSnapshot),
    DropTable(TableSnapshot),
    AddColumn {
        table: String,
        column: ColumnSnapshot,
    },
    DropColumn {
        table: String,
        column: ColumnSnapshot,
    },
    /// Change of type, nullability or identity of a column.
    AlterColumn {
        table: String,
        from: ColumnSnapshot,
        to: ColumnSnapshot,
    },
}

impl Difference {
    /// Whether applying this change can lose stored data.
    pub fn is_destructive(&self) -> bool {
        match self {
            Difference::DropTable(_) | Difference::DropColumn { .. } => true,
            Difference::AlterColumn { from, to, .. } => from.kind != to.kind,
            Difference::CreateTable(_) | Difference::AddColumn { .. } => false,
        }
    }

    /// The change that undoes this one.
    pub fn inverse(&self) -> Self {
        match self {
            Difference::CreateTable(t) => Difference::DropTable(t.clone()),
            Difference::DropTable(t) => Difference::CreateTable(t.clone()),
            Difference::AddColumn { table, column } => Difference::DropColumn {
                table: table.clone(),
                column: column.clone(),
            },
            Difference::DropColumn { table, column } => Difference::AddColumn {
                table: table.clone(),
                column: column.clone(),
            },
            Difference::AlterColumn { table, from, to } => Difference::AlterColumn {
                table: table.clone(),
                from: to.clone(),
                to: from.clone(),
            },
        }
    }

    pub fn table(&self) -> &str {
        match self {
            Difference::CreateTable(t) | Difference::DropTable(t) => &t.name,
            Difference::AddColumn { table, .. }
            | Difference::DropColumn { table, .. }
            | Difference::AlterColumn { table, .. } => table,
        }
    }

    /// Short human-readable summary, used for migration descriptions.
    pub fn describe(&self) -> String {
        match self {
            Difference::CreateTable(t) => format!("create {}", t.name),
            Difference::DropTable(t) => format!("drop {}", t.name),
            Difference::AddColumn { table, column } => format!("add {}.{}", table, column.name),
            Difference::DropColumn { table, column } => format!("drop {}.{}", table, column.name),
            Difference::AlterColumn { table, to, .. } => format!("alter {}.{}", table, to.name),
        }
    }

    fn priority(&self) -> u8 {
        match self {
            Difference::CreateTable(_) => 0,
            Difference::AddColumn { .. } => 1,
            Difference::AlterColumn { .. } => 2,
            Difference::DropColumn { .. } => 3,
            Difference::DropTable(_) => 4,
        }
    }
}

/// Changes that turn `previous` into `current`.
pub fn diff(previous: &ModelSnapshot, current: &ModelSnapshot) -> Vec<Difference> {
    let mut out = Vec::new();

    for table in &current.tables {
        match previous.table(&table.name) {
            None => out.push(Difference::CreateTable(table.clone())),
            Some(old) if old.primary_key != table.primary_key => {
                tracing::warn!(
                    table = %table.name,
                    from = ?old.primary_key,
                    to = ?table.primary_key,
                    "Primary key changed; table will be recreated"
                );
                out.push(Difference::DropTable(old.clone()));
                out.push(Difference::CreateTable(table.clone()));
            }
            Some(old) => diff_columns(old, table, &mut out),
        }
    }
    for old in &previous.tables {
        if current.table(&old.name).is_none() {
            out.push(Difference::DropTable(old.clone()));
        }
    }

    // Recreated tables keep their drop-before-create order.
    out.sort_by_key(|d| match d {
        Difference::DropTable(t) if current.table(&t.name).is_some() => 0,
        other => other.priority() + 1,
    });

    tracing::debug!(
        differences = out.len(),
        destructive = out.iter().filter(|d| d.is_destructive()).count(),
        "Compared model snapshots"
    );
    out
}

fn diff_columns(old: &TableSnapshot, new: &TableSnapshot, out: &mut Vec<Difference>) {
    for column in &new.columns {
        match old.column(&column.name) {
            None => out.push(Difference::AddColumn {
                table: new.name.clone(),
                column: column.clone(),
            }),
            Some(before) if before != column => out.push(Difference::AlterColumn {
                table: new.name.clone(),
                from: before.clone(),
                to: column.clone(),
            }),
            Some(_) => {}
        }
    }
    for column in &old.columns {
        if new.column(&column.name).is_none() {
            out.push(Difference::DropColumn {
                table: new.name.clone(),
                column: column.clone(),
            });
        }
    }
}
