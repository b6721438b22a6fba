//! Session events and the publisher they are delivered to.
//!
//! A session never reaches for a global dispatcher: whoever opens it passes
//! an [`EventPublisher`], and every event goes there.

use docmodel_core::{Error, WriteKind};
use std::sync::Mutex;

/// Counts of the writes one `save_changes` call performed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveResult {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl SaveResult {
    pub(crate) fn record(&mut self, kind: WriteKind) {
        match kind {
            WriteKind::Insert => self.inserted += 1,
            WriteKind::Update => self.updated += 1,
            WriteKind::Delete => self.deleted += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

/// Something that happened in a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// An entity was attached for insertion.
    Stored {
        collection: String,
        type_name: &'static str,
    },
    /// An entity was scheduled for deletion.
    Deleted { collection: String, key: String },
    /// A save is about to send this many writes.
    Saving { operations: usize },
    /// A save finished.
    Saved(SaveResult),
}

/// Receives session events. An error aborts the session call that raised
/// the event.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: &SessionEvent) -> Result<(), Error>;
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish(&self, _event: &SessionEvent) -> Result<(), Error> {
        Ok(())
    }
}

type EventFn = Box<dyn Fn(&SessionEvent) -> Result<(), Error> + Send + Sync>;

/// Publisher that calls registered closures in registration order.
#[derive(Default)]
pub struct CallbackPublisher {
    callbacks: Vec<EventFn>,
}

impl CallbackPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_event(mut self, f: impl Fn(&SessionEvent) -> Result<(), Error> + Send + Sync + 'static) -> Self {
        self.callbacks.push(Box::new(f));
        self
    }
}

impl std::fmt::Debug for CallbackPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackPublisher")
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl EventPublisher for CallbackPublisher {
    fn publish(&self, event: &SessionEvent) -> Result<(), Error> {
        for cb in &self.callbacks {
            cb(event)?;
        }
        Ok(())
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<SessionEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventPublisher for EventLog {
    fn publish(&self, event: &SessionEvent) -> Result<(), Error> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| Error::Custom("event log lock poisoned".to_string()))?;
        events.push(event.clone());
        Ok(())
    }
}
