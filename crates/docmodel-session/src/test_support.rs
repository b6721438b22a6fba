//! Shared fixtures for unit tests: an `Animals` collection with a `Dog` base
//! type and a `Cat` subtype, a `Counters` collection with a database-assigned
//! key, and a connection factory backed by a tiny in-memory table store that
//! understands the statements the writers produce for Postgres.

use docmodel_core::{
    Collection, CommandBatch, Connection, ConnectionFactory, Cx, Entity, EntityRef, Error,
    Outcome, Row, Schema, Statement, StatementResult, Value, ValueKind, entity_ref,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

pub trait Animal: Send + Sync {
    fn name(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dog {
    pub id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tricks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cat {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub lives: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Counter {
    #[serde(default)]
    pub id: i64,
    pub label: String,
}

impl Entity for Dog {
    type Key = i64;
    const TYPE_NAME: &'static str = "Dog";
    fn key(&self) -> i64 {
        self.id
    }
}

impl Entity for Cat {
    type Key = i64;
    const TYPE_NAME: &'static str = "Cat";
    fn key(&self) -> i64 {
        self.id
    }
}

impl Entity for Counter {
    type Key = i64;
    const TYPE_NAME: &'static str = "Counter";
    fn key(&self) -> i64 {
        self.id
    }
}

impl Animal for Dog {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Animal for Cat {
    fn name(&self) -> &str {
        &self.name
    }
}

pub fn animals_collection() -> Collection {
    Collection::builder::<Dog>("Animals")
        .subtype::<Cat>()
        .view::<Dog, dyn Animal>(|d| d)
        .view::<Cat, dyn Animal>(|c| c)
        .key("Id", ValueKind::BigInt)
        .etag()
        .build()
        .expect("animals collection")
}

pub fn animals() -> Arc<Collection> {
    Arc::new(animals_collection())
}

pub fn counters_collection() -> Collection {
    Collection::builder::<Counter>("Counters")
        .computed_key("Id", ValueKind::BigInt, &["id"])
        .build()
        .expect("counters collection")
}

pub fn schema() -> Arc<Schema> {
    Arc::new(
        Schema::builder()
            .collection(animals_collection())
            .collection(counters_collection())
            .build()
            .expect("schema"),
    )
}

pub fn dog(id: i64, name: &str) -> EntityRef<Dog> {
    entity_ref(Dog {
        id,
        name: name.to_string(),
        tricks: Vec::new(),
    })
}

pub fn cat(id: i64, name: &str) -> EntityRef<Cat> {
    entity_ref(Cat {
        id,
        name: name.to_string(),
        lives: 9,
    })
}

fn animal_row(id: i64, document: String, discriminator: &str) -> Row {
    Row::new(
        vec![
            "Id".into(),
            "Document".into(),
            "Discriminator".into(),
            "Etag".into(),
        ],
        vec![
            Value::BigInt(id),
            Value::Text(document),
            Value::Text(discriminator.into()),
            Value::Uuid([id as u8; 16]),
        ],
    )
}

/// A stored `Animals` row for a dog, as a driver would return it.
pub fn dog_row(id: i64, name: &str) -> Row {
    let document = serde_json::json!({"id": id, "name": name}).to_string();
    animal_row(id, document, "Dog")
}

pub fn cat_row(id: i64, name: &str) -> Row {
    let document = serde_json::json!({"id": id, "name": name, "lives": 9}).to_string();
    animal_row(id, document, "Cat")
}

/// Everything the fake store has seen.
#[derive(Debug, Clone, Default)]
pub struct MockState {
    pub connects: usize,
    pub closed: usize,
    pub query_batches: usize,
    pub execute_batches: usize,
    pub statements: Vec<Statement>,
    pub tables: HashMap<String, Vec<Row>>,
    pub next_id: i64,
    pub fail_close: bool,
}

fn quoted(text: &str) -> Option<String> {
    let start = text.find('"')? + 1;
    let end = start + text[start..].find('"')?;
    Some(text[start..end].to_string())
}

fn table_after(sql: &str, keyword: &str) -> String {
    sql.find(keyword)
        .and_then(|i| quoted(&sql[i + keyword.len()..]))
        .unwrap_or_default()
}

/// `"A" = $1 AND "B" IS NULL`, consuming parameters in order.
fn conditions(clause: &str, params: &mut impl Iterator<Item = Value>) -> Vec<(String, Value)> {
    clause
        .split(" AND ")
        .filter_map(|c| {
            let name = quoted(c)?;
            let value = if c.ends_with("IS NULL") {
                Value::Null
            } else {
                params.next().unwrap_or(Value::Null)
            };
            Some((name, value))
        })
        .collect()
}

fn matches_all(row: &Row, conditions: &[(String, Value)]) -> bool {
    conditions
        .iter()
        .all(|(name, value)| row.get_by_name(name).is_some_and(|v| v == value))
}

fn with_value(row: &Row, name: &str, value: Value) -> Row {
    let mut names: Vec<String> = row.column_names().map(str::to_string).collect();
    let mut values: Vec<Value> = row.values().cloned().collect();
    match names.iter().position(|n| n == name) {
        Some(i) => values[i] = value,
        None => {
            names.push(name.to_string());
            values.push(value);
        }
    }
    Row::new(names, values)
}

impl MockState {
    fn select(&self, statement: &Statement) -> Vec<Row> {
        let table = table_after(&statement.sql, "FROM ");
        let keys: Vec<&Value> = statement
            .params
            .iter()
            .filter(|v| matches!(v, Value::BigInt(_)))
            .collect();
        let types: Vec<&Value> = statement
            .params
            .iter()
            .filter(|v| matches!(v, Value::Text(_)))
            .collect();
        self.tables
            .get(&table)
            .map(|rows| {
                rows.iter()
                    .filter(|r| keys.is_empty() || r.get_by_name("Id").is_some_and(|v| keys.contains(&v)))
                    .filter(|r| {
                        types.is_empty()
                            || r.get_by_name("Discriminator")
                                .is_some_and(|v| types.contains(&v))
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn write(&mut self, statement: &Statement) -> StatementResult {
        let sql = &statement.sql;
        let mut params = statement.params.clone().into_iter();
        if sql.starts_with("INSERT") {
            let table = table_after(sql, "INTO ");
            let open = sql.find(" (").map_or(0, |i| i + 2);
            let close = open + sql[open..].find(')').unwrap_or(0);
            let names: Vec<String> = sql[open..close].split(", ").filter_map(quoted).collect();
            let mut row = Row::new(names.clone(), params.by_ref().take(names.len()).collect());
            let mut rows = Vec::new();
            if sql.contains(";\n") {
                self.next_id += 1;
                let id = Value::BigInt(100 + self.next_id);
                row = with_value(&row, "Id", id.clone());
                rows.push(Row::new(vec!["Id".into()], vec![id]));
            }
            self.tables.entry(table).or_default().push(row);
            return StatementResult {
                rows_affected: 1,
                rows,
            };
        }
        let (table, assignments) = if sql.starts_with("UPDATE") {
            let set = sql
                .split(" SET ")
                .nth(1)
                .and_then(|s| s.split(" WHERE ").next())
                .unwrap_or_default();
            let assignments: Vec<(String, Value)> = set
                .split(", ")
                .filter_map(quoted)
                .map(|name| (name, params.next().unwrap_or(Value::Null)))
                .collect();
            (table_after(sql, "UPDATE "), Some(assignments))
        } else {
            (table_after(sql, "FROM "), None)
        };
        let clause = sql.split(" WHERE ").nth(1).unwrap_or_default();
        let conditions = conditions(clause, &mut params);
        let rows = self.tables.entry(table).or_default();
        let mut affected = 0;
        match assignments {
            Some(assignments) => {
                for row in rows.iter_mut().filter(|r| matches_all(r, &conditions)) {
                    for (name, value) in &assignments {
                        *row = with_value(row, name, value.clone());
                    }
                    affected += 1;
                }
            }
            None => {
                let before = rows.len();
                rows.retain(|r| !matches_all(r, &conditions));
                affected = before - rows.len();
            }
        }
        StatementResult {
            rows_affected: affected as u64,
            rows: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MockConnection {
    state: Arc<Mutex<MockState>>,
}

impl Connection for MockConnection {
    fn query_batch(
        &self,
        _cx: &Cx,
        batch: &CommandBatch,
    ) -> impl Future<Output = Outcome<Vec<Vec<Row>>, Error>> + Send {
        let state = Arc::clone(&self.state);
        let batch = batch.clone();
        async move {
            let mut guard = state.lock().expect("lock poisoned");
            guard.query_batches += 1;
            guard.statements.extend(batch.statements().iter().cloned());
            let results = batch.statements().iter().map(|s| guard.select(s)).collect();
            Outcome::Ok(results)
        }
    }

    fn execute_batch(
        &self,
        _cx: &Cx,
        batch: &CommandBatch,
    ) -> impl Future<Output = Outcome<Vec<StatementResult>, Error>> + Send {
        let state = Arc::clone(&self.state);
        let batch = batch.clone();
        async move {
            let mut guard = state.lock().expect("lock poisoned");
            guard.execute_batches += 1;
            guard.statements.extend(batch.statements().iter().cloned());
            let results = batch.statements().iter().map(|s| guard.write(s)).collect();
            Outcome::Ok(results)
        }
    }

    fn close(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        let state = Arc::clone(&self.state);
        async move {
            let mut guard = state.lock().expect("lock poisoned");
            guard.closed += 1;
            if guard.fail_close {
                return Outcome::Err(Error::Custom("close failed".to_string()));
            }
            Outcome::Ok(())
        }
    }
}

/// Opens connections to one shared fake store.
#[derive(Debug, Clone, Default)]
pub struct MockFactory {
    state: Arc<Mutex<MockState>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MockState {
        self.state.lock().expect("lock poisoned").clone()
    }

    /// Store a row in the `Animals` table.
    pub fn insert_row(&self, row: Row) {
        self.state
            .lock()
            .expect("lock poisoned")
            .tables
            .entry("Animals".to_string())
            .or_default()
            .push(row);
    }

    /// Make every connection close report an error.
    pub fn fail_closes(&self) {
        self.state.lock().expect("lock poisoned").fail_close = true;
    }

    /// Simulate another writer replacing a row's etag.
    pub fn touch(&self, id: i64) {
        let mut guard = self.state.lock().expect("lock poisoned");
        if let Some(rows) = guard.tables.get_mut("Animals") {
            for row in rows.iter_mut() {
                if row.get_by_name("Id") == Some(&Value::BigInt(id)) {
                    *row = with_value(row, "Etag", Value::Uuid([0xEE; 16]));
                }
            }
        }
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.state()
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }
}

impl ConnectionFactory for MockFactory {
    type Connection = MockConnection;

    fn connect(&self, _cx: &Cx) -> impl Future<Output = Outcome<MockConnection, Error>> + Send {
        let state = Arc::clone(&self.state);
        async move {
            state.lock().expect("lock poisoned").connects += 1;
            Outcome::Ok(MockConnection { state })
        }
    }
}
