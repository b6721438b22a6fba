//! Second-level cache for key lookups.
//!
//! Key queries marked `cached` are answered from a [`Cache`] before they
//! reach the database. Entries hold the rows a lookup returned, encoded as
//! JSON, under a key built from the collection name and the key column
//! values. A session removes the entries of documents it updates or deletes.
//!
//! [`MemoryCache`] keeps entries in process with a per-entry TTL and
//! least-recently-used eviction. Distributed caches implement the same trait.

use docmodel_core::{Cx, Error, Outcome, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Boxed future returned by [`Cache`] methods.
pub type CacheFuture<'a, T> = Pin<Box<dyn Future<Output = Outcome<T, Error>> + Send + 'a>>;

/// A string-keyed cache of serialized row sets.
pub trait Cache: Send + Sync {
    fn get<'a>(&'a self, cx: &'a Cx, key: &'a str) -> CacheFuture<'a, Option<String>>;

    fn set<'a>(&'a self, cx: &'a Cx, key: &'a str, value: String, ttl: Duration) -> CacheFuture<'a, ()>;

    fn remove<'a>(&'a self, cx: &'a Cx, key: &'a str) -> CacheFuture<'a, ()>;
}

/// How sessions address the cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheOptions {
    /// Prepended to every key, to share one cache between applications.
    pub prefix: String,
    /// Cache every key load for this long, not only lookups marked `cached`.
    pub default_ttl: Option<Duration>,
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Cache key of one document: the prefix followed by a JSON array of
    /// the collection name and the key values, so separators inside text
    /// keys cannot make two documents share an entry.
    pub fn key_for(&self, collection: &str, key: &[Value]) -> String {
        let values: Vec<serde_json::Value> = key.iter().map(Value::to_json).collect();
        let address = serde_json::json!([collection, values]);
        format!("{}{}", self.prefix, address)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryCacheConfig {
    /// Entries kept before the least recently used one is evicted.
    pub max_entries: usize,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self { max_entries: 1024 }
    }
}

impl MemoryCacheConfig {
    pub fn max_entries(mut self, n: usize) -> Self {
        self.max_entries = n.max(1);
        self
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    /// `None` when the TTL reaches past what `Instant` can represent.
    expires_at: Option<Instant>,
    last_used: Instant,
    hit_count: u64,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-process cache with per-entry expiry.
#[derive(Debug, Default)]
pub struct MemoryCache {
    config: MemoryCacheConfig,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new(config: MemoryCacheConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::with_capacity(config.max_entries.min(256))),
        }
    }

    fn with_entries<R>(&self, f: impl FnOnce(&mut HashMap<String, CacheEntry>) -> R) -> Result<R, Error> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|_| Error::Custom("memory cache lock poisoned".to_string()))?;
        Ok(f(&mut guard))
    }

    fn evict_lru(entries: &mut HashMap<String, CacheEntry>) {
        let oldest = entries
            .iter()
            .min_by_key(|(_, e)| e.last_used)
            .map(|(k, _)| k.clone());
        if let Some(key) = oldest {
            tracing::trace!(key = %key, "Evicting least recently used cache entry");
            entries.remove(&key);
        }
    }

    /// Synchronous lookup; expired entries are dropped on access.
    pub fn get_now(&self, key: &str) -> Result<Option<String>, Error> {
        self.with_entries(|entries| {
            let now = Instant::now();
            match entries.get_mut(key) {
                Some(entry) if entry.is_live(now) => {
                    entry.last_used = now;
                    entry.hit_count += 1;
                    Some(entry.value.clone())
                }
                Some(_) => {
                    entries.remove(key);
                    None
                }
                None => None,
            }
        })
    }

    pub fn set_now(&self, key: &str, value: String, ttl: Duration) -> Result<(), Error> {
        let max = self.config.max_entries.max(1);
        self.with_entries(|entries| {
            let now = Instant::now();
            entries.retain(|_, e| e.is_live(now));
            if !entries.contains_key(key) && entries.len() >= max {
                Self::evict_lru(entries);
            }
            entries.insert(
                key.to_string(),
                CacheEntry {
                    value,
                    expires_at: now.checked_add(ttl),
                    last_used: now,
                    hit_count: 0,
                },
            );
        })
    }

    pub fn remove_now(&self, key: &str) -> Result<(), Error> {
        self.with_entries(|entries| {
            entries.remove(key);
        })
    }

    /// Number of times an entry has been served.
    pub fn hit_count(&self, key: &str) -> u64 {
        self.with_entries(|entries| entries.get(key).map_or(0, |e| e.hit_count))
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.with_entries(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn ready<T: Send + 'static>(result: Result<T, Error>) -> CacheFuture<'static, T> {
    Box::pin(async move {
        match result {
            Ok(v) => Outcome::Ok(v),
            Err(e) => Outcome::Err(e),
        }
    })
}

impl Cache for MemoryCache {
    fn get<'a>(&'a self, _cx: &'a Cx, key: &'a str) -> CacheFuture<'a, Option<String>> {
        ready(self.get_now(key))
    }

    fn set<'a>(&'a self, _cx: &'a Cx, key: &'a str, value: String, ttl: Duration) -> CacheFuture<'a, ()> {
        ready(self.set_now(key, value, ttl))
    }

    fn remove<'a>(&'a self, _cx: &'a Cx, key: &'a str) -> CacheFuture<'a, ()> {
        ready(self.remove_now(key))
    }
}
