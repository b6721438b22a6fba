//! Renders write operations to INSERT, UPDATE and DELETE statements.

use crate::operation::{AddOperation, DeleteOperation, Operation, OperationVisitor, UpdateOperation};
use crate::params::ParameterCounter;
use docmodel_core::{DatabaseRow, Result, Statement, Value};

/// A rendered operation and what the executor must check afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct WrittenOperation {
    pub statement: Statement,
    /// The statement carries an etag guard; zero affected rows is a conflict.
    pub guarded: bool,
    /// The statement returns the database-assigned key as its last result.
    pub returns_key: bool,
}

/// Writes DML for operations, numbering parameters through a shared counter.
pub struct UpdateWriter<'a> {
    counter: &'a mut ParameterCounter,
}

impl<'a> UpdateWriter<'a> {
    pub fn new(counter: &'a mut ParameterCounter) -> Self {
        Self { counter }
    }

    /// Render operations in order.
    pub fn write_all(counter: &mut ParameterCounter, operations: &[Operation]) -> Result<Vec<WrittenOperation>> {
        let mut writer = UpdateWriter::new(counter);
        operations.iter().map(|op| op.accept(&mut writer)).collect()
    }

    /// WHERE clause matching the stored row's key, and its etag when the
    /// collection has one.
    fn guard(&mut self, stored: &DatabaseRow, params: &mut Vec<Value>) -> (String, bool) {
        let collection = stored.collection();
        let dialect = self.counter.dialect();
        let quoted = |index: usize| dialect.quote_identifier(&collection.columns()[index].name);
        let mut conditions: Vec<String> = collection
            .key_columns()
            .iter()
            .map(|k| {
                let name = quoted(k.column);
                let placeholder = self.counter.bind(stored.values()[k.column].clone(), params);
                format!("{name} = {placeholder}")
            })
            .collect();
        let mut guarded = false;
        if let Some(index) = collection.etag_index() {
            guarded = true;
            let name = quoted(index);
            match &stored.values()[index] {
                Value::Null => conditions.push(format!("{name} IS NULL")),
                etag => {
                    let placeholder = self.counter.bind(etag.clone(), params);
                    conditions.push(format!("{name} = {placeholder}"));
                }
            }
        }
        (conditions.join(" AND "), guarded)
    }
}

impl OperationVisitor for UpdateWriter<'_> {
    type Output = Result<WrittenOperation>;

    fn visit_add(&mut self, op: &AddOperation) -> Result<WrittenOperation> {
        let collection = &op.collection;
        let dialect = self.counter.dialect();
        let mut params = Vec::new();
        let mut names = Vec::new();
        let mut placeholders = Vec::new();
        for (i, column) in collection.columns().iter().enumerate() {
            if column.is_written() {
                names.push(dialect.quote_identifier(&column.name));
                placeholders.push(self.counter.bind(op.row.values()[i].clone(), &mut params));
            }
        }
        let table = dialect.quote_identifier(collection.name());
        let columns = names.join(", ");
        let values = placeholders.join(", ");

        let Some(computed) = collection.computed_key() else {
            return Ok(WrittenOperation {
                statement: Statement::new(
                    format!("INSERT INTO {table} ({columns}) VALUES ({values})"),
                    params,
                ),
                guarded: false,
                returns_key: false,
            });
        };

        let slot = self.counter.next_slot();
        let key = &collection.columns()[computed.column];
        let document = &collection.columns()[collection.document_index()];
        let mut commands = Vec::new();
        if let Some(prepare) = dialect.generated_key_prepare(slot, &key.name, key.value_kind) {
            commands.push(prepare);
        }
        let output = dialect
            .generated_key_output(slot, &key.name)
            .map(|o| format!(" {o}"))
            .unwrap_or_default();
        commands.push(format!(
            "INSERT INTO {table} ({columns}){output} VALUES ({values})"
        ));
        commands.push(dialect.generated_key_patch(
            slot,
            collection.name(),
            &document.name,
            &key.name,
            &computed.document_path,
        ));
        Ok(WrittenOperation {
            statement: Statement::new(commands.join(";\n"), params),
            guarded: false,
            returns_key: true,
        })
    }

    fn visit_update(&mut self, op: &UpdateOperation) -> Result<WrittenOperation> {
        let collection = &op.collection;
        let dialect = self.counter.dialect();
        let mut params = Vec::new();
        let assignments = collection
            .columns()
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_written() && !c.is_key())
            .map(|(i, c)| {
                let placeholder = self.counter.bind(op.row.values()[i].clone(), &mut params);
                format!("{} = {}", dialect.quote_identifier(&c.name), placeholder)
            })
            .collect::<Vec<_>>()
            .join(", ");
        let (condition, guarded) = self.guard(&op.stored, &mut params);
        Ok(WrittenOperation {
            statement: Statement::new(
                format!(
                    "UPDATE {} SET {} WHERE {}",
                    dialect.quote_identifier(collection.name()),
                    assignments,
                    condition
                ),
                params,
            ),
            guarded,
            returns_key: false,
        })
    }

    fn visit_delete(&mut self, op: &DeleteOperation) -> Result<WrittenOperation> {
        let dialect = self.counter.dialect();
        let mut params = Vec::new();
        let (condition, guarded) = self.guard(&op.stored, &mut params);
        Ok(WrittenOperation {
            statement: Statement::new(
                format!(
                    "DELETE FROM {} WHERE {}",
                    dialect.quote_identifier(op.collection.name()),
                    condition
                ),
                params,
            ),
            guarded,
            returns_key: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;
    use crate::fixtures::{Dog, animals, counters, row_for};
    use docmodel_core::{AnyEntity, RowFactory, entity_ref};

    fn dog(id: i64) -> AnyEntity {
        AnyEntity::new(entity_ref(Dog {
            id,
            name: "Rex".into(),
        }))
    }

    #[test]
    fn insert_writes_every_stored_column() {
        let collection = animals();
        let entity = dog(1);
        let row = row_for(&collection, &entity, Value::Null);
        let op = Operation::Add(AddOperation {
            entity,
            collection,
            row,
        });
        let mut counter = ParameterCounter::new(Dialect::Postgres);
        let written = UpdateWriter::write_all(&mut counter, &[op]).unwrap();
        assert_eq!(
            written[0].statement.sql,
            "INSERT INTO \"Animals\" (\"Id\", \"Document\", \"Discriminator\", \"Etag\") \
             VALUES ($1, $2, $3, $4)"
        );
        assert!(!written[0].guarded);
    }

    #[test]
    fn update_and_delete_are_guarded_by_etag() {
        let collection = animals();
        let entity = dog(2);
        let old = RowFactory::new_etag();
        let stored = row_for(&collection, &entity, old.clone());
        let row = row_for(&collection, &entity, RowFactory::new_etag());
        let ops = vec![
            Operation::Update(UpdateOperation {
                entity: entity.clone(),
                collection: collection.clone(),
                stored: stored.clone(),
                row,
            }),
            Operation::Delete(DeleteOperation {
                entity,
                collection,
                stored,
            }),
        ];
        let mut counter = ParameterCounter::new(Dialect::Postgres);
        let written = UpdateWriter::write_all(&mut counter, &ops).unwrap();
        assert_eq!(
            written[0].statement.sql,
            "UPDATE \"Animals\" SET \"Document\" = $1, \"Discriminator\" = $2, \"Etag\" = $3 \
             WHERE \"Id\" = $4 AND \"Etag\" = $5"
        );
        assert_eq!(written[0].statement.params[4], old);
        assert_eq!(
            written[1].statement.sql,
            "DELETE FROM \"Animals\" WHERE \"Id\" = $6 AND \"Etag\" = $7"
        );
        assert!(written.iter().all(|w| w.guarded));
    }

    #[test]
    fn missing_stored_etag_is_matched_as_null() {
        let collection = animals();
        let entity = dog(3);
        let stored = row_for(&collection, &entity, Value::Null);
        let op = Operation::Delete(DeleteOperation {
            entity,
            collection,
            stored,
        });
        let mut counter = ParameterCounter::new(Dialect::Sqlite);
        let written = UpdateWriter::write_all(&mut counter, &[op]).unwrap();
        assert_eq!(
            written[0].statement.sql,
            "DELETE FROM \"Animals\" WHERE \"Id\" = ?1 AND \"Etag\" IS NULL"
        );
    }

    #[test]
    fn computed_key_insert_skips_key_and_patches_document() {
        let (collection, entity) = counters(0);
        let row = row_for(&collection, &entity, Value::Null);
        let op = Operation::Add(AddOperation {
            entity,
            collection,
            row,
        });
        let mut counter = ParameterCounter::new(Dialect::Sqlite);
        let written = UpdateWriter::write_all(&mut counter, &[op]).unwrap();
        let sql = &written[0].statement.sql;
        assert!(sql.starts_with(
            "INSERT INTO \"Counters\" (\"Document\", \"Discriminator\") VALUES (?1, ?2);\n"
        ));
        assert!(sql.ends_with(
            "UPDATE \"Counters\" SET \"Document\" = json_set(\"Document\", '$.id', \"Id\") \
             WHERE \"Id\" = last_insert_rowid() RETURNING \"Id\""
        ));
        assert!(written[0].returns_key);
        assert_eq!(written[0].statement.params.len(), 2);
    }
}
