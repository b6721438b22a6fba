//! Schemas shared by the unit tests.

use docmodel_core::{Collection, CollectionBuilder, Entity, Projection, Schema, ValueKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Animal {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Counter {
    #[serde(default)]
    pub id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub slug: String,
}

impl Entity for Animal {
    type Key = i64;
    const TYPE_NAME: &'static str = "Animal";
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

impl Entity for Note {
    type Key = String;
    const TYPE_NAME: &'static str = "Note";
    fn key(&self) -> String {
        self.slug.clone()
    }
}

fn animals() -> CollectionBuilder<i64> {
    Collection::builder::<Animal>("Animals")
        .key("Id", ValueKind::BigInt)
        .etag()
}

/// `Animals` (etag) and `Counters` (database-assigned key).
pub fn schema() -> Schema {
    Schema::builder()
        .collection(animals().build().expect("animals"))
        .collection(
            Collection::builder::<Counter>("Counters")
                .computed_key("Id", ValueKind::BigInt, &["id"])
                .build()
                .expect("counters"),
        )
        .build()
        .expect("schema")
}

/// The next version of the model: `Animals` gains a projected `Name`
/// column, `Notes` is new and `Counters` is gone.
pub fn notes_schema() -> Schema {
    Schema::builder()
        .collection(
            animals()
                .project("Name", ValueKind::Text, Projection::pointer("/name"))
                .build()
                .expect("animals"),
        )
        .collection(
            Collection::builder::<Note>("Notes")
                .key("Slug", ValueKind::Text)
                .build()
                .expect("notes"),
        )
        .build()
        .expect("schema")
}
