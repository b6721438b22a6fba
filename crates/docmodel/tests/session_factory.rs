//! End-to-end behavior of sessions opened from one factory over a shared
//! in-memory store.

use docmodel::prelude::*;
use docmodel::{
    CallbackPublisher, CommandBatch, Connection, Row, Statement, StatementResult,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Hero {
    id: i64,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    age: Option<u32>,
}

impl Entity for Hero {
    type Key = i64;
    const TYPE_NAME: &'static str = "Hero";
    fn key(&self) -> i64 {
        self.id
    }
}

fn hero(id: i64, name: &str) -> EntityRef<Hero> {
    entity_ref(Hero {
        id,
        name: name.to_string(),
        age: None,
    })
}

fn schema() -> Schema {
    Schema::builder()
        .collection(
            Collection::builder::<Hero>("Heroes")
                .key("Id", ValueKind::BigInt)
                .etag()
                .build()
                .expect("heroes collection"),
        )
        .build()
        .expect("schema")
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Debug, Default)]
struct Store {
    rows: Vec<Row>,
    query_batches: usize,
    execute_batches: usize,
}

fn quoted_names(text: &str) -> Vec<String> {
    text.split('"')
        .skip(1)
        .step_by(2)
        .map(str::to_string)
        .collect()
}

fn set_value(row: &Row, name: &str, value: Value) -> Row {
    let names: Vec<String> = row.column_names().map(str::to_string).collect();
    let values = row
        .iter()
        .map(|(n, v)| if n == name { value.clone() } else { v.clone() })
        .collect();
    Row::new(names, values)
}

impl Store {
    fn select(&self, statement: &Statement) -> Vec<Row> {
        let ids: Vec<&Value> = statement
            .params
            .iter()
            .filter(|v| matches!(v, Value::BigInt(_)))
            .collect();
        self.rows
            .iter()
            .filter(|r| ids.is_empty() || r.get_by_name("Id").is_some_and(|v| ids.contains(&v)))
            .cloned()
            .collect()
    }

    fn write(&mut self, statement: &Statement) -> StatementResult {
        let sql = statement.sql.as_str();
        let mut params = statement.params.iter().cloned();
        let (head, clause) = sql.split_once(" WHERE ").unwrap_or((sql, ""));
        if sql.starts_with("INSERT") {
            let columns = sql.split_once(" (").map(|(_, rest)| rest).unwrap_or_default();
            let columns = columns.split_once(')').map(|(c, _)| c).unwrap_or_default();
            let names = quoted_names(columns);
            let values = params.by_ref().take(names.len()).collect();
            self.rows.push(Row::new(names, values));
            return StatementResult {
                rows_affected: 1,
                rows: Vec::new(),
            };
        }
        let assignments: Vec<(String, Value)> = if sql.starts_with("UPDATE") {
            let set = head.split_once(" SET ").map(|(_, s)| s).unwrap_or_default();
            quoted_names(set)
                .into_iter()
                .map(|n| (n, params.next().unwrap_or(Value::Null)))
                .collect()
        } else {
            Vec::new()
        };
        let conditions: Vec<(String, Value)> = quoted_names(clause)
            .into_iter()
            .map(|n| (n, params.next().unwrap_or(Value::Null)))
            .collect();
        let matches = |row: &Row| {
            conditions
                .iter()
                .all(|(n, v)| row.get_by_name(n) == Some(v))
        };
        let mut affected = 0;
        if sql.starts_with("DELETE") {
            let before = self.rows.len();
            self.rows.retain(|r| !matches(r));
            affected = before - self.rows.len();
        } else {
            for row in &mut self.rows {
                if matches(&*row) {
                    for (n, v) in &assignments {
                        *row = set_value(row, n, v.clone());
                    }
                    affected += 1;
                }
            }
        }
        StatementResult {
            rows_affected: affected as u64,
            rows: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct MemoryConnection {
    store: Arc<Mutex<Store>>,
}

impl Connection for MemoryConnection {
    fn query_batch(
        &self,
        _cx: &Cx,
        batch: &CommandBatch,
    ) -> impl Future<Output = Outcome<Vec<Vec<Row>>, Error>> + Send {
        let store = Arc::clone(&self.store);
        let batch = batch.clone();
        async move {
            let mut store = store.lock().expect("lock poisoned");
            store.query_batches += 1;
            Outcome::Ok(batch.statements().iter().map(|s| store.select(s)).collect())
        }
    }

    fn execute_batch(
        &self,
        _cx: &Cx,
        batch: &CommandBatch,
    ) -> impl Future<Output = Outcome<Vec<StatementResult>, Error>> + Send {
        let store = Arc::clone(&self.store);
        let batch = batch.clone();
        async move {
            let mut store = store.lock().expect("lock poisoned");
            store.execute_batches += 1;
            Outcome::Ok(batch.statements().iter().map(|s| store.write(s)).collect())
        }
    }

    fn close(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        async { Outcome::Ok(()) }
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryDatabase {
    store: Arc<Mutex<Store>>,
}

impl MemoryDatabase {
    fn query_batches(&self) -> usize {
        self.store.lock().expect("lock poisoned").query_batches
    }

    fn execute_batches(&self) -> usize {
        self.store.lock().expect("lock poisoned").execute_batches
    }
}

impl ConnectionFactory for MemoryDatabase {
    type Connection = MemoryConnection;

    fn connect(&self, _cx: &Cx) -> impl Future<Output = Outcome<MemoryConnection, Error>> + Send {
        let store = Arc::clone(&self.store);
        async move { Outcome::Ok(MemoryConnection { store }) }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn run<T>(f: impl Future<Output = T>) -> T {
    let rt = asupersync::runtime::RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    rt.block_on(f)
}

fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

fn factory(db: &MemoryDatabase) -> SessionFactory<MemoryDatabase> {
    SessionFactory::new(schema(), db.clone())
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn documents_round_trip_between_sessions() {
    let db = MemoryDatabase::default();
    let factory = factory(&db);
    let cx = Cx::for_testing();

    run(async {
        let mut first = factory.open_session();
        first.store(hero(1, "Spider-Man")).expect("store hero");
        let saved = unwrap_outcome(first.save_changes(&cx).await);
        assert_eq!(saved.inserted, 1);

        let mut second = factory.open_session();
        let loaded = unwrap_outcome(second.load::<Hero, i64>(&cx, &1).await).expect("stored hero");
        assert_eq!(loaded.read().unwrap().name, "Spider-Man");
        loaded.write().unwrap().age = Some(25);
        let saved = unwrap_outcome(second.save_changes(&cx).await);
        assert_eq!(saved.updated, 1);

        let mut third = factory.open_session();
        let again = unwrap_outcome(third.load::<Hero, i64>(&cx, &1).await).expect("stored hero");
        assert_eq!(again.read().unwrap().age, Some(25));
        third.delete(&again).expect("delete hero");
        assert_eq!(unwrap_outcome(third.save_changes(&cx).await).deleted, 1);

        let mut fourth = factory.open_session();
        assert!(unwrap_outcome(fourth.load::<Hero, i64>(&cx, &1).await).is_none());
    });
    assert_eq!(db.execute_batches(), 3);
}

#[test]
fn stale_session_gets_a_concurrency_conflict() {
    let db = MemoryDatabase::default();
    let factory = factory(&db);
    let cx = Cx::for_testing();

    run(async {
        let mut setup = factory.open_session();
        setup.store(hero(7, "Storm")).expect("store hero");
        unwrap_outcome(setup.save_changes(&cx).await);

        let mut a = factory.open_session();
        let mut b = factory.open_session();
        let in_a = unwrap_outcome(a.load::<Hero, i64>(&cx, &7).await).unwrap();
        let in_b = unwrap_outcome(b.load::<Hero, i64>(&cx, &7).await).unwrap();

        in_a.write().unwrap().name = "Ororo".into();
        unwrap_outcome(a.save_changes(&cx).await);

        in_b.write().unwrap().age = Some(30);
        match b.save_changes(&cx).await {
            Outcome::Err(e) => assert!(e.is_concurrency_conflict()),
            _ => panic!("expected a concurrency conflict"),
        }
    });
}

#[test]
fn shared_cache_serves_later_sessions() {
    let db = MemoryDatabase::default();
    let factory = factory(&db).with_cache(Arc::new(MemoryCache::default()));
    let cx = Cx::for_testing();

    run(async {
        let mut setup = factory.open_session();
        setup.store(hero(3, "Thor")).expect("store hero");
        unwrap_outcome(setup.save_changes(&cx).await);

        for _ in 0..3 {
            let mut session = factory.open_session();
            let future = session
                .defer_load_cached::<Hero, i64>(&3, Duration::from_secs(60))
                .unwrap();
            let found = unwrap_outcome(session.resolve(&cx, &future).await);
            assert_eq!(found[0].read().unwrap().name, "Thor");
        }
    });
    assert_eq!(db.query_batches(), 1);
}

#[test]
fn publisher_sees_every_save() {
    let db = MemoryDatabase::default();
    let saves = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&saves);
    let publisher = CallbackPublisher::new().on_event(move |event| {
        if matches!(event, SessionEvent::Saved(_)) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    });
    let factory = factory(&db).with_publisher(Arc::new(publisher));
    let cx = Cx::for_testing();

    run(async {
        for id in 0..2 {
            let mut session = factory.open_session();
            session.store(hero(id, "Hero")).expect("store hero");
            unwrap_outcome(session.save_changes(&cx).await);
        }
    });
    assert_eq!(saves.load(Ordering::SeqCst), 2);
}

#[test]
fn factory_writes_the_initial_migration() {
    let db = MemoryDatabase::default();
    let factory = factory(&db).config(SessionConfig::new().dialect(Dialect::Sqlite));
    let migration = factory
        .migration("0001_initial", &ModelSnapshot::empty())
        .expect("initial migration");
    assert!(migration.up.starts_with("CREATE TABLE \"Heroes\""));
    assert_eq!(migration.down, "DROP TABLE \"Heroes\";\n");
    assert_eq!(migration.snapshot, factory.snapshot());

    let stored = migration.snapshot.to_json().unwrap();
    assert!(factory.migration_from_json("0002", &stored).unwrap().is_none());
}
