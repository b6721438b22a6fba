//! Query and update SQL writers for DocModel Rust.
//!
//! `docmodel-query` is the **SQL rendering layer**. It turns read queries and
//! unit-of-work operations into statements for one of the supported dialects.
//!
//! # Role In The Architecture
//!
//! - **Queries**: `EntityQuery`, `KeyQuery` and `MultipleKeyQuery`, each with a
//!   unique `QueryId` used to collect results after batched execution.
//! - **Operations**: `Add`, `Update` and `Delete` for one entity each.
//! - **Writers**: `QueryWriter` and `UpdateWriter` number parameters through a
//!   shared `ParameterCounter` so a whole batch can go out as one command.
//! - **Dialects**: Postgres, SQLite, MySQL and SQL Server.
//!
//! The resulting batches execute through the `Connection` trait from
//! `docmodel-core`.

pub mod dialect;
pub mod operation;
pub mod params;
pub mod query;
pub mod query_writer;
pub mod update_writer;

pub use dialect::Dialect;
pub use operation::{AddOperation, DeleteOperation, Operation, OperationVisitor, UpdateOperation};
pub use params::ParameterCounter;
pub use query::{
    CacheHint, EntityQuery, KeyQuery, MultipleKeyQuery, Predicate, Query, QueryId, QueryVisitor,
    Requested,
};
pub use query_writer::QueryWriter;
pub use update_writer::{UpdateWriter, WrittenOperation};

#[cfg(test)]
pub(crate) mod fixtures {
    use docmodel_core::{
        AnyEntity, Collection, DatabaseRow, Entity, JsonSerializer, RowFactory, Value, ValueKind,
    };
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;

    pub trait Animal: Send + Sync {
        fn name(&self) -> &str;
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct Dog {
        pub id: i64,
        pub name: String,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct Cat {
        pub id: i64,
        pub name: String,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct Counter {
        pub id: i64,
        pub hits: u32,
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

    pub fn animals() -> Arc<Collection> {
        Arc::new(
            Collection::builder::<Dog>("Animals")
                .subtype::<Cat>()
                .view::<Dog, dyn Animal>(|d| d)
                .view::<Cat, dyn Animal>(|c| c)
                .key("Id", ValueKind::BigInt)
                .etag()
                .build()
                .expect("animals collection"),
        )
    }

    pub fn counters(id: i64) -> (Arc<Collection>, AnyEntity) {
        let collection = Collection::builder::<Counter>("Counters")
            .computed_key("Id", ValueKind::BigInt, &["id"])
            .build()
            .expect("counters collection");
        let entity = AnyEntity::new(docmodel_core::entity_ref(Counter { id, hits: 0 }));
        (Arc::new(collection), entity)
    }

    pub fn row_for(collection: &Arc<Collection>, entity: &AnyEntity, etag: Value) -> DatabaseRow {
        RowFactory::new(Arc::new(JsonSerializer::new()))
            .create_row(collection, entity, etag)
            .expect("row")
    }
}
