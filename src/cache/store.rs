//! In-memory cache store
//!
//! Provides a `CacheStore` that maps string keys to type-erased values with
//! expiry timestamps. Expired entries are still returned (with `is_expired`
//! set) so callers can serve stale data while they refresh.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

/// Longest TTL the store honours; longer TTLs are clamped to it
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Wrapper struct for a value held by the store
#[derive(Clone)]
struct CacheEntry {
    /// The cached value
    value: Arc<dyn Any + Send + Sync>,
    /// When the value was cached
    cached_at: Instant,
    /// When the entry expires (`cached_at + ttl`)
    expires_at: Instant,
    /// Wall-clock time of the write, for diagnostics
    fetched_at: DateTime<Utc>,
    /// Recency tick, bumped on set and on get in a bounded store
    last_used: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Result of reading from the store, including freshness metadata
#[derive(Debug)]
pub struct CachedData<T> {
    /// The cached value
    pub data: Arc<T>,
    /// When the value was cached
    pub cached_at: Instant,
    /// When the value expires
    pub expires_at: Instant,
    /// Wall-clock time of the write
    pub fetched_at: DateTime<Utc>,
    /// Whether the entry had expired at read time
    pub is_expired: bool,
}

impl<T> Clone for CachedData<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            cached_at: self.cached_at,
            expires_at: self.expires_at,
            fetched_at: self.fetched_at,
            is_expired: self.is_expired,
        }
    }
}

/// Diagnostic view of one entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryStats {
    pub key: String,
    /// Time since the entry was written
    #[serde(rename = "age_ms", serialize_with = "as_millis")]
    pub age: Duration,
    pub is_expired: bool,
    /// Time left before expiry, zero once expired
    #[serde(rename = "expires_in_ms", serialize_with = "as_millis")]
    pub expires_in: Duration,
}

/// Read-only snapshot of the store
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub size: usize,
    /// Entries sorted by key
    pub entries: Vec<EntryStats>,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, CacheEntry>,
    tick: u64,
}

impl Inner {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

/// Shared key/value store with per-entry TTL
///
/// Cloning a `CacheStore` yields another handle onto the same entries, so one
/// store can be created at startup and handed to every consumer. With a
/// capacity set, inserting a new key into a full store evicts the least
/// recently used entry; without one the store grows with the key count.
#[derive(Clone, Default)]
pub struct CacheStore {
    inner: Arc<Mutex<Inner>>,
    max_entries: Option<usize>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("len", &self.len())
            .field("max_entries", &self.max_entries)
            .finish()
    }
}

impl CacheStore {
    /// Creates an empty, unbounded store
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store holding at most `max_entries` keys
    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            inner: Arc::default(),
            max_entries: Some(max_entries.max(1)),
        }
    }

    /// Returns the configured capacity, if any
    pub fn max_entries(&self) -> Option<usize> {
        self.max_entries
    }

    /// Reads a value from the store
    ///
    /// Returns `None` if the key is absent or holds a value of another type.
    /// Expired entries are returned with `is_expired = true`. Reads leave
    /// entries untouched, except that a bounded store records recency for
    /// LRU eviction.
    pub fn get<T>(&self, key: &str) -> Option<CachedData<T>>
    where
        T: Send + Sync + 'static,
    {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let data = match Arc::clone(&inner.entries.get(key)?.value).downcast::<T>() {
            Ok(data) => data,
            Err(_) => {
                tracing::trace!(key, "cached value has a different type");
                return None;
            }
        };
        if self.max_entries.is_some() {
            let tick = inner.next_tick();
            if let Some(entry) = inner.entries.get_mut(key) {
                entry.last_used = tick;
            }
        }
        let entry = inner.entries.get(key)?;

        Some(CachedData {
            data,
            cached_at: entry.cached_at,
            expires_at: entry.expires_at,
            fetched_at: entry.fetched_at,
            is_expired: entry.is_expired(now),
        })
    }

    /// Writes a value with the given TTL, replacing any existing entry
    pub fn set<T>(&self, key: &str, value: T, ttl: Duration)
    where
        T: Send + Sync + 'static,
    {
        self.set_arc(key, Arc::new(value), ttl);
    }

    /// Writes an already shared value with the given TTL
    pub fn set_arc<T>(&self, key: &str, value: Arc<T>, ttl: Duration)
    where
        T: Send + Sync + 'static,
    {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let tick = inner.next_tick();

        if let Some(max) = self.max_entries {
            if !inner.entries.contains_key(key) && inner.entries.len() >= max {
                evict_lru(&mut inner.entries);
            }
        }

        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                cached_at: now,
                expires_at: expiry_after(now, ttl),
                fetched_at: Utc::now(),
                last_used: tick,
            },
        );
    }

    /// Removes an entry; does nothing if the key is absent
    pub fn delete(&self, key: &str) {
        if self.inner.lock().entries.remove(key).is_some() {
            tracing::debug!(key, "cache entry removed");
        }
    }

    /// Removes all entries
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        let removed = inner.entries.len();
        inner.entries.clear();
        tracing::debug!(removed, "cache cleared");
    }

    /// Returns true if an entry exists for `key`, expired or not
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.lock().entries.contains_key(key)
    }

    /// Number of entries held
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns true if the store holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Builds a diagnostic snapshot without touching any entry
    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let inner = self.inner.lock();

        let mut entries: Vec<EntryStats> = inner
            .entries
            .iter()
            .map(|(key, entry)| EntryStats {
                key: key.clone(),
                age: now.saturating_duration_since(entry.cached_at),
                is_expired: entry.is_expired(now),
                expires_in: entry.expires_at.saturating_duration_since(now),
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        CacheStats {
            size: entries.len(),
            entries,
        }
    }
}

/// `now + ttl`, with `ttl` clamped to [`MAX_TTL`]
fn expiry_after(now: Instant, ttl: Duration) -> Instant {
    let ttl = ttl.min(MAX_TTL);
    now.checked_add(ttl)
        .or_else(|| now.checked_add(Duration::from_secs(365 * 24 * 60 * 60)))
        .unwrap_or(now)
}

fn evict_lru(entries: &mut HashMap<String, CacheEntry>) {
    let victim = entries
        .iter()
        .min_by_key(|(_, entry)| entry.last_used)
        .map(|(key, _)| key.clone());

    if let Some(key) = victim {
        entries.remove(&key);
        tracing::debug!(key = %key, "evicted least recently used entry");
    }
}
