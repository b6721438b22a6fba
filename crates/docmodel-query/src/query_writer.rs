//! Renders read queries to SELECT statements.

use crate::params::ParameterCounter;
use crate::query::{EntityQuery, KeyQuery, MultipleKeyQuery, Query, QueryVisitor};
use docmodel_core::{CommandBatch, Collection, Result, Statement, Value};

/// Writes SELECT statements for queries, numbering parameters through a
/// shared counter.
pub struct QueryWriter<'a> {
    counter: &'a mut ParameterCounter,
}

impl<'a> QueryWriter<'a> {
    pub fn new(counter: &'a mut ParameterCounter) -> Self {
        Self { counter }
    }

    /// Render every query into one batch, in order.
    pub fn write_batch(counter: &mut ParameterCounter, queries: &[Query]) -> Result<CommandBatch> {
        let mut writer = QueryWriter::new(counter);
        let mut batch = CommandBatch::new();
        for query in queries {
            batch.push(query.accept(&mut writer)?);
        }
        tracing::trace!(
            statements = batch.len(),
            params = writer.counter.count(),
            "Wrote query batch"
        );
        Ok(batch)
    }

    fn select_list(&self, collection: &Collection) -> String {
        let dialect = self.counter.dialect();
        collection
            .columns()
            .iter()
            .map(|c| dialect.quote_identifier(&c.name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn discriminator_filter(
        &mut self,
        collection: &Collection,
        discriminators: Option<&[&'static str]>,
        params: &mut Vec<Value>,
    ) -> Option<String> {
        let list = discriminators?;
        let dialect = self.counter.dialect();
        let column = dialect.quote_identifier(&collection.columns()[collection.discriminator_index()].name);
        let placeholders = list
            .iter()
            .map(|d| self.counter.bind(Value::Text((*d).to_string()), params))
            .collect::<Vec<_>>()
            .join(", ");
        Some(format!("{column} IN ({placeholders})"))
    }

    fn key_match(&mut self, collection: &Collection, key: &[Value], params: &mut Vec<Value>) -> String {
        let dialect = self.counter.dialect();
        collection
            .key_columns()
            .iter()
            .zip(key)
            .map(|(column, value)| {
                let name = dialect.quote_identifier(&collection.columns()[column.column].name);
                let placeholder = self.counter.bind(value.clone(), params);
                format!("{name} = {placeholder}")
            })
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    fn select(&self, collection: &Collection, conditions: &[String]) -> String {
        let dialect = self.counter.dialect();
        let mut sql = format!(
            "SELECT {} FROM {}",
            self.select_list(collection),
            dialect.quote_identifier(collection.name())
        );
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql
    }
}

impl QueryVisitor for QueryWriter<'_> {
    type Output = Result<Statement>;

    fn visit_entity(&mut self, query: &EntityQuery) -> Result<Statement> {
        let collection = query.collection();
        let dialect = self.counter.dialect();
        let mut params = Vec::new();
        let mut conditions = Vec::new();
        if let Some(filter) = self.discriminator_filter(collection, query.discriminators(), &mut params) {
            conditions.push(filter);
        }
        if let Some(predicate) = query.predicate() {
            let sql = self
                .counter
                .bind_markers(&predicate.sql, &predicate.params, &mut params)?;
            conditions.push(format!("({sql})"));
        }

        let mut sql = self.select(collection, &conditions);
        let (skip, take) = query.paging();
        let paging = dialect.paging(skip, take);
        match query.order() {
            Some(order) => {
                sql.push_str(" ORDER BY ");
                sql.push_str(order);
            }
            None if paging.is_some() && dialect.paging_requires_order() => {
                sql.push_str(" ORDER BY (SELECT NULL)");
            }
            None => {}
        }
        if let Some(paging) = paging {
            sql.push(' ');
            sql.push_str(&paging);
        }
        Ok(Statement::new(sql, params))
    }

    fn visit_key(&mut self, query: &KeyQuery) -> Result<Statement> {
        let collection = query.collection();
        let mut params = Vec::new();
        let mut conditions = vec![self.key_match(collection, query.key(), &mut params)];
        if let Some(filter) = self.discriminator_filter(collection, query.discriminators(), &mut params) {
            conditions.push(filter);
        }
        Ok(Statement::new(self.select(collection, &conditions), params))
    }

    fn visit_multiple_key(&mut self, query: &MultipleKeyQuery) -> Result<Statement> {
        let collection = query.collection();
        let mut params = Vec::new();
        let keys = if query.keys().is_empty() {
            "1 = 0".to_string()
        } else {
            let alternatives = query
                .keys()
                .iter()
                .map(|key| format!("({})", self.key_match(collection, key, &mut params)))
                .collect::<Vec<_>>();
            format!("({})", alternatives.join(" OR "))
        };
        let mut conditions = vec![keys];
        if let Some(filter) = self.discriminator_filter(collection, query.discriminators(), &mut params) {
            conditions.push(filter);
        }
        Ok(Statement::new(self.select(collection, &conditions), params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;
    use crate::fixtures::{Animal, Cat, Dog, animals};
    use crate::query::{EntityQuery, KeyQuery, MultipleKeyQuery};

    const COLUMNS: &str = "\"Id\", \"Document\", \"Discriminator\", \"Etag\"";

    #[test]
    fn key_query_for_view_has_no_type_filter() {
        let mut counter = ParameterCounter::new(Dialect::Postgres);
        let q = KeyQuery::new::<dyn Animal, i64>(animals(), &7).unwrap();
        let stmt = QueryWriter::new(&mut counter).visit_key(&q).unwrap();
        assert_eq!(
            stmt.sql,
            format!("SELECT {COLUMNS} FROM \"Animals\" WHERE \"Id\" = $1")
        );
        assert_eq!(stmt.params, vec![Value::BigInt(7)]);
    }

    #[test]
    fn subtype_query_filters_on_discriminator() {
        let mut counter = ParameterCounter::new(Dialect::Postgres);
        let q = EntityQuery::new::<Cat>(animals())
            .unwrap()
            .filter("\"Document\" LIKE ?", vec![Value::Text("%Tom%".into())])
            .order_by("\"Id\"")
            .take(10);
        let stmt = QueryWriter::new(&mut counter).visit_entity(&q).unwrap();
        assert_eq!(
            stmt.sql,
            format!(
                "SELECT {COLUMNS} FROM \"Animals\" WHERE \"Discriminator\" IN ($1) \
                 AND (\"Document\" LIKE $2) ORDER BY \"Id\" LIMIT 10 OFFSET 0"
            )
        );
        assert_eq!(
            stmt.params,
            vec![Value::Text("Cat".into()), Value::Text("%Tom%".into())]
        );
    }

    #[test]
    fn batch_numbers_parameters_globally() {
        let mut counter = ParameterCounter::new(Dialect::Postgres);
        let queries: Vec<Query> = vec![
            KeyQuery::new::<Dog, i64>(animals(), &1).unwrap().into(),
            MultipleKeyQuery::new::<dyn Animal, i64>(animals(), &[2, 3])
                .unwrap()
                .into(),
        ];
        let batch = QueryWriter::write_batch(&mut counter, &queries).unwrap();
        let stmts = batch.statements();
        assert!(stmts[0].sql.ends_with("\"Id\" = $1 AND \"Discriminator\" IN ($2)"));
        assert!(stmts[1].sql.ends_with("((\"Id\" = $3) OR (\"Id\" = $4))"));
        assert_eq!(batch.parameters().len(), 4);
    }

    #[test]
    fn empty_key_list_matches_nothing() {
        let mut counter = ParameterCounter::new(Dialect::Sqlite);
        let q = MultipleKeyQuery::new::<dyn Animal, i64>(animals(), &[]).unwrap();
        let stmt = QueryWriter::new(&mut counter).visit_multiple_key(&q).unwrap();
        assert!(stmt.sql.ends_with("WHERE 1 = 0"));
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn sql_server_paging_gets_an_order() {
        let mut counter = ParameterCounter::new(Dialect::SqlServer);
        let q = EntityQuery::new::<dyn Animal>(animals()).unwrap().skip(5);
        let stmt = QueryWriter::new(&mut counter).visit_entity(&q).unwrap();
        assert!(stmt.sql.ends_with("FROM [Animals] ORDER BY (SELECT NULL) OFFSET 5 ROWS"));
    }
}
