//! Fetch-and-cache resolution with stale-while-revalidate
//!
//! `DataCache::resolve` combines the `CacheStore` with a caller-supplied async
//! producer. Fresh entries short-circuit, expired entries are either served
//! stale while a background task refreshes them or refetched inline, and
//! producer failures fall back to whatever stale value the store still holds.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::error::Error as StdError;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use super::error::{validate_key, CacheError};
use super::store::{CacheStats, CacheStore, CachedData};
use crate::config::{CacheConfig, DEFAULT_TTL};

type AnyValue = Arc<dyn Any + Send + Sync>;
type SharedFetch = Shared<BoxFuture<'static, Result<AnyValue, CacheError>>>;

/// A producer call that other resolves of the same key can join
struct Flight {
    id: u64,
    type_id: TypeId,
    fetch: SharedFetch,
}

/// Per-call options for [`DataCache::resolve`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOptions {
    /// How long a fetched value stays fresh
    pub ttl: Duration,
    /// Serve an expired value immediately while refreshing in the background
    pub stale_while_revalidate: bool,
    /// Treat an existing entry as expired
    pub force_refresh: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            stale_while_revalidate: true,
            force_refresh: false,
        }
    }
}

impl ResolveOptions {
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn stale_while_revalidate(mut self, enabled: bool) -> Self {
        self.stale_while_revalidate = enabled;
        self
    }

    pub fn force_refresh(mut self, enabled: bool) -> Self {
        self.force_refresh = enabled;
        self
    }
}

#[derive(Debug)]
enum Outcome<T> {
    Value(Arc<T>),
    Failed {
        stale: Option<Arc<T>>,
        error: CacheError,
    },
}

impl<T> Clone for Outcome<T> {
    fn clone(&self) -> Self {
        match self {
            Outcome::Value(value) => Outcome::Value(Arc::clone(value)),
            Outcome::Failed { stale, error } => Outcome::Failed {
                stale: stale.clone(),
                error: error.clone(),
            },
        }
    }
}

/// The `{value, is_stale, error}` triple observed after a resolve
///
/// A snapshot always carries a value, an error, or both. Both means the
/// producer failed and an older value is still usable.
#[derive(Debug)]
pub struct Snapshot<T> {
    outcome: Outcome<T>,
    is_stale: bool,
}

impl<T> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        Self {
            outcome: self.outcome.clone(),
            is_stale: self.is_stale,
        }
    }
}

impl<T> Snapshot<T> {
    pub(crate) fn fresh(value: Arc<T>) -> Self {
        Self {
            outcome: Outcome::Value(value),
            is_stale: false,
        }
    }

    pub(crate) fn stale(value: Arc<T>) -> Self {
        Self {
            outcome: Outcome::Value(value),
            is_stale: true,
        }
    }

    pub(crate) fn failed(stale: Option<Arc<T>>, error: CacheError) -> Self {
        let is_stale = stale.is_some();
        Self {
            outcome: Outcome::Failed { stale, error },
            is_stale,
        }
    }

    /// The usable value, fresh or stale
    pub fn value(&self) -> Option<&Arc<T>> {
        match &self.outcome {
            Outcome::Value(value) => Some(value),
            Outcome::Failed { stale, .. } => stale.as_ref(),
        }
    }

    /// Whether the value is older than its TTL
    pub fn is_stale(&self) -> bool {
        self.is_stale
    }

    /// The producer failure, if the last fetch failed
    pub fn error(&self) -> Option<&CacheError> {
        match &self.outcome {
            Outcome::Value(_) => None,
            Outcome::Failed { error, .. } => Some(error),
        }
    }

    /// True for a value that is neither stale nor accompanied by an error
    pub fn is_fresh(&self) -> bool {
        !self.is_stale && matches!(self.outcome, Outcome::Value(_))
    }

    /// Returns the value, or the error if the fetch failed
    ///
    /// A stale fallback is discarded when an error is present; inspect
    /// [`Snapshot::value`] first to use degraded data.
    pub fn into_result(self) -> Result<Arc<T>, CacheError> {
        match self.outcome {
            Outcome::Value(value) => Ok(value),
            Outcome::Failed { error, .. } => Err(error),
        }
    }
}

/// Handle to a background refresh started by a stale-while-revalidate resolve
#[derive(Debug)]
pub struct Revalidation<T> {
    handle: JoinHandle<Snapshot<T>>,
    stale: Arc<T>,
}

impl<T> Revalidation<T> {
    /// Waits for the refresh and returns the settled snapshot
    pub async fn wait(self) -> Snapshot<T> {
        match self.handle.await {
            Ok(snapshot) => snapshot,
            Err(join_err) => Snapshot::failed(Some(self.stale), CacheError::producer(join_err)),
        }
    }

    /// Returns true once the background task has finished
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Outcome of [`DataCache::resolve`]
///
/// `snapshot()` is observable immediately. When a background refresh was
/// started, `settle()` waits for it and returns the snapshot it produced.
#[derive(Debug)]
pub struct Resolved<T> {
    snapshot: Snapshot<T>,
    revalidation: Option<Revalidation<T>>,
}

impl<T> Resolved<T> {
    fn settled(snapshot: Snapshot<T>) -> Self {
        Self {
            snapshot,
            revalidation: None,
        }
    }

    pub fn snapshot(&self) -> &Snapshot<T> {
        &self.snapshot
    }

    pub fn value(&self) -> Option<&Arc<T>> {
        self.snapshot.value()
    }

    pub fn is_stale(&self) -> bool {
        self.snapshot.is_stale()
    }

    pub fn error(&self) -> Option<&CacheError> {
        self.snapshot.error()
    }

    /// Whether a background refresh was started
    pub fn is_revalidating(&self) -> bool {
        self.revalidation.is_some()
    }

    pub fn into_parts(self) -> (Snapshot<T>, Option<Revalidation<T>>) {
        (self.snapshot, self.revalidation)
    }

    /// Returns the final snapshot, waiting for a background refresh if any
    pub async fn settle(self) -> Snapshot<T> {
        match self.revalidation {
            Some(revalidation) => revalidation.wait().await,
            None => self.snapshot,
        }
    }
}

/// Cache handle combining a [`CacheStore`] with producer-driven resolution
///
/// Cheap to clone; clones share the store and the in-flight table. Construct
/// one per session and pass it to consumers.
#[derive(Clone)]
pub struct DataCache {
    store: CacheStore,
    config: CacheConfig,
    in_flight: Arc<Mutex<HashMap<String, Flight>>>,
    flight_ids: Arc<AtomicU64>,
}

impl std::fmt::Debug for DataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataCache")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish()
    }
}

impl Default for DataCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl DataCache {
    /// Creates a cache with its own store, built from `config`
    pub fn new(config: CacheConfig) -> Self {
        let store = match config.max_entries {
            Some(max) => CacheStore::with_capacity(max),
            None => CacheStore::new(),
        };
        Self::with_store(store, config)
    }

    /// Creates a cache over an existing store
    pub fn with_store(store: CacheStore, config: CacheConfig) -> Self {
        Self {
            store,
            config,
            in_flight: Arc::default(),
            flight_ids: Arc::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Resolve options seeded from this cache's configuration
    pub fn options(&self) -> ResolveOptions {
        ResolveOptions {
            ttl: self.config.default_ttl,
            stale_while_revalidate: self.config.stale_while_revalidate,
            force_refresh: false,
        }
    }

    /// Resolves `key`, calling `producer` only when the cached value is
    /// missing, expired, or a refresh is forced
    ///
    /// # Arguments
    /// * `key` - Cache key; must not be blank
    /// * `producer` - Called at most once to fetch a new value
    /// * `options` - TTL, stale-while-revalidate and force-refresh settings
    ///
    /// # Returns
    /// * `Err(CacheError::InvalidKey)` for an empty key, before `producer` runs
    /// * `Ok(Resolved)` otherwise; producer failures are reported inside the
    ///   snapshot together with any stale value
    pub async fn resolve<T, F, Fut, E>(
        &self,
        key: &str,
        producer: F,
        options: ResolveOptions,
    ) -> Result<Resolved<T>, CacheError>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        validate_key(key)?;

        let cached: Option<CachedData<T>> = self.store.get(key);
        if let Some(cached) = &cached {
            if !cached.is_expired && !options.force_refresh {
                tracing::trace!(key, "cache hit");
                return Ok(Resolved::settled(Snapshot::fresh(Arc::clone(&cached.data))));
            }
        }

        let fetch = self.fetch(key, producer, options.ttl);

        match cached {
            Some(cached) if options.stale_while_revalidate => {
                tracing::debug!(key, "serving stale value while revalidating");
                let stale = cached.data;
                let fallback = Arc::clone(&stale);
                let handle = tokio::spawn(async move {
                    match fetch.await {
                        Ok(value) => Snapshot::fresh(value),
                        Err(err) => Snapshot::failed(Some(fallback), err),
                    }
                });

                Ok(Resolved {
                    snapshot: Snapshot::stale(Arc::clone(&stale)),
                    revalidation: Some(Revalidation { handle, stale }),
                })
            }
            cached => {
                tracing::debug!(key, expired = cached.is_some(), "cache miss, fetching");
                let stale = cached.map(|c| c.data);
                let snapshot = match fetch.await {
                    Ok(value) => Snapshot::fresh(value),
                    Err(err) => Snapshot::failed(stale, err),
                };
                Ok(Resolved::settled(snapshot))
            }
        }
    }

    /// Reads a cached value without calling a producer
    pub fn get<T>(&self, key: &str) -> Option<CachedData<T>>
    where
        T: Send + Sync + 'static,
    {
        self.store.get(key)
    }

    /// Writes a value directly, as if a producer had just returned it
    ///
    /// # Arguments
    /// * `key` - Cache key; must not be blank
    /// * `value` - Value to store
    /// * `ttl` - How long the value stays fresh, clamped to [`MAX_TTL`](crate::cache::MAX_TTL)
    ///
    /// # Returns
    /// * `Err(CacheError::InvalidKey)` for an empty key, otherwise `Ok(())`
    pub fn prime<T>(&self, key: &str, value: T, ttl: Duration) -> Result<(), CacheError>
    where
        T: Send + Sync + 'static,
    {
        validate_key(key)?;
        self.store.set(key, value, ttl);
        Ok(())
    }

    /// Removes `key`; producer calls already in flight are not cancelled and
    /// will repopulate the entry when they finish
    pub fn invalidate(&self, key: &str) {
        self.store.delete(key);
    }

    /// Removes every key with the given prefix
    pub fn invalidate_prefix(&self, prefix: &str) {
        for entry in self.store.stats().entries {
            if entry.key.starts_with(prefix) {
                self.store.delete(&entry.key);
            }
        }
    }

    pub fn clear(&self) {
        self.store.clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }

    /// Runs the producer and stores its result, joining an in-flight call
    /// for the same key when single-flight is enabled
    fn fetch<T, F, Fut, E>(
        &self,
        key: &str,
        producer: F,
        ttl: Duration,
    ) -> BoxFuture<'static, Result<Arc<T>, CacheError>>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        if !self.config.dedupe_in_flight {
            let store = self.store.clone();
            let key = key.to_string();
            let pending = producer();
            return async move {
                let value = Arc::new(pending.await.map_err(CacheError::producer)?);
                store.set_arc(&key, Arc::clone(&value), ttl);
                Ok(value)
            }
            .boxed();
        }

        let type_id = TypeId::of::<T>();
        let mut table = self.in_flight.lock();
        let existing = table.get(key).map(|flight| (flight.type_id, flight.fetch.clone()));
        if let Some((existing_type, joined)) = &existing {
            if *existing_type == type_id {
                tracing::debug!(key, "joining in-flight fetch");
                return downcast_flight(joined.clone());
            }
        }

        let id = self.flight_ids.fetch_add(1, Ordering::Relaxed);
        let store = self.store.clone();
        let flights = Arc::clone(&self.in_flight);
        let owned_key = key.to_string();
        let pending = producer();

        let shared: SharedFetch = async move {
            let result = pending.await.map_err(CacheError::producer);
            let result = result.map(|value| {
                let value = Arc::new(value);
                store.set_arc(&owned_key, Arc::clone(&value), ttl);
                value as AnyValue
            });

            let mut flights = flights.lock();
            if flights.get(&owned_key).map(|f| f.id) == Some(id) {
                flights.remove(&owned_key);
            }
            drop(flights);
            result
        }
        .boxed()
        .shared();

        // A flight registered under another type keeps its slot; ours runs unshared
        if existing.is_none() {
            table.insert(
                key.to_string(),
                Flight {
                    id,
                    type_id,
                    fetch: shared.clone(),
                },
            );
        }
        drop(table);

        downcast_flight(shared)
    }
}

fn downcast_flight<T>(shared: SharedFetch) -> BoxFuture<'static, Result<Arc<T>, CacheError>>
where
    T: Send + Sync + 'static,
{
    async move {
        let value = shared.await?;
        value
            .downcast::<T>()
            .map_err(|_| CacheError::producer("in-flight value has an unexpected type"))
    }
    .boxed()
}
