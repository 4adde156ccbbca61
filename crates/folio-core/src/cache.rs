use crate::config::CacheConfig;
use crate::key::{CacheKey, QueryParams};
use crate::source::ContentSource;
use crate::stats::{CacheCounters, CacheStats, EntrySummary};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Result of a cache lookup.
///
/// Failures of the content source never surface as errors; they show up as
/// `Stale` (old data was available) or `Unavailable` (nothing was).
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched<T> {
    /// Served from a fresh entry or fetched just now.
    Fresh(T),
    /// Refresh failed; this is the last data that was fetched successfully.
    Stale(T),
    /// Refresh failed and nothing was cached for the key.
    Unavailable,
}

impl<T> Fetched<T> {
    pub fn data(&self) -> Option<&T> {
        match self {
            Fetched::Fresh(data) | Fetched::Stale(data) => Some(data),
            Fetched::Unavailable => None,
        }
    }

    pub fn into_data(self) -> Option<T> {
        match self {
            Fetched::Fresh(data) | Fetched::Stale(data) => Some(data),
            Fetched::Unavailable => None,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, Fetched::Fresh(_))
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Fetched::Stale(_))
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Fetched::Unavailable)
    }

    pub fn status(&self) -> FetchStatus {
        match self {
            Fetched::Fresh(_) => FetchStatus::Fresh,
            Fetched::Stale(_) => FetchStatus::Stale,
            Fetched::Unavailable => FetchStatus::Unavailable,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Fetched<U> {
        match self {
            Fetched::Fresh(data) => Fetched::Fresh(f(data)),
            Fetched::Stale(data) => Fetched::Stale(f(data)),
            Fetched::Unavailable => Fetched::Unavailable,
        }
    }
}

/// Data-less tag of a [`Fetched`] value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    Fresh,
    Stale,
    Unavailable,
}

/// Stored result of one successful source call. Replaced wholesale, never
/// mutated.
#[derive(Debug, Clone)]
struct CacheEntry {
    data: Arc<Value>,
    cached_at: Instant,
    fetched_at: DateTime<Utc>,
}

impl CacheEntry {
    fn new(data: Arc<Value>) -> Self {
        Self {
            data,
            cached_at: Instant::now(),
            fetched_at: Utc::now(),
        }
    }

    fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.cached_at)
    }
}

type FlightFuture = Shared<BoxFuture<'static, Option<Arc<Value>>>>;

/// A source call that concurrent misses for the same key can join.
struct Flight {
    id: u64,
    future: FlightFuture,
}

struct Inner<S> {
    source: S,
    config: CacheConfig,
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    in_flight: Mutex<HashMap<CacheKey, Flight>>,
    /// Source calls whose result will be stored, by call id. Invalidation
    /// removes the calls it matches; those still answer their callers.
    pending: Mutex<HashMap<u64, CacheKey>>,
    next_call_id: AtomicU64,
    counters: CacheCounters,
}

/// Read-through cache in front of a [`ContentSource`].
///
/// Entries are fresh for `ttl` after a successful fetch. Once stale, the next
/// lookup refreshes them; if that refresh fails the old data is served
/// instead. Cloning is cheap and every clone shares the same entries.
///
/// # Example
/// ```rust,no_run
/// use folio_core::{ContentCache, ContentSource, Fetched};
///
/// async fn latest_articles<S: ContentSource + 'static>(cache: &ContentCache<S>) {
///     match cache.fetch("*[_type=='article'] | order(publishedAt desc)", None).await {
///         Fetched::Fresh(articles) => println!("{}", articles),
///         Fetched::Stale(articles) => println!("(may be outdated) {}", articles),
///         Fetched::Unavailable => println!("no articles right now"),
///     }
/// }
/// ```
pub struct ContentCache<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for ContentCache<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: ContentSource + 'static> ContentCache<S> {
    pub fn new(source: S, config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                config,
                entries: RwLock::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                next_call_id: AtomicU64::new(0),
                counters: CacheCounters::default(),
            }),
        }
    }

    /// Create a cache seeded with `entries`, each timestamped now.
    pub fn with_entries(
        source: S,
        config: CacheConfig,
        entries: impl IntoIterator<Item = (CacheKey, Value)>,
    ) -> Self {
        let cache = Self::new(source, config);
        {
            let mut map = write(&cache.inner.entries);
            for (key, data) in entries {
                map.insert(key, CacheEntry::new(Arc::new(data)));
            }
        }
        cache
    }

    pub fn source(&self) -> &S {
        &self.inner.source
    }

    pub fn ttl(&self) -> Duration {
        self.inner.config.ttl
    }

    /// Look up `query`, refreshing through the source when needed.
    ///
    /// A fresh entry is returned without suspending. Otherwise exactly one
    /// source call is made (or joined, with `dedupe_in_flight`); there is no
    /// retry. The call runs on its own task, so it completes and stores its
    /// result even if this future is dropped.
    pub async fn fetch(&self, query: &str, params: Option<&QueryParams>) -> Fetched<Arc<Value>> {
        let key = CacheKey::new(query, params);

        if let Some(data) = self.lookup_fresh(&key) {
            CacheCounters::incr(&self.inner.counters.hits);
            debug!("cache hit: {}", key);
            return Fetched::Fresh(data);
        }

        CacheCounters::incr(&self.inner.counters.misses);
        debug!("cache miss: {}", key);

        let params = params.cloned().unwrap_or_default();
        let loaded = if self.inner.config.dedupe_in_flight {
            self.join_flight(key.clone(), query, params).await
        } else {
            let id = self.inner.begin_call(&key);
            Inner::spawn_load(self.inner.clone(), id, key.clone(), query.to_owned(), params).await
        };

        match loaded {
            Some(data) => Fetched::Fresh(data),
            None => self.fallback(&key),
        }
    }

    /// The plain nullable contract: any data if there is some, else `None`.
    pub async fn get(&self, query: &str, params: Option<&QueryParams>) -> Option<Arc<Value>> {
        self.fetch(query, params).await.into_data()
    }

    /// Like [`fetch`](Self::fetch), decoding the payload as `T`.
    ///
    /// A payload that does not decode is logged and reported as
    /// `Unavailable`.
    pub async fn fetch_as<T: DeserializeOwned>(
        &self,
        query: &str,
        params: Option<&QueryParams>,
    ) -> Fetched<T> {
        let fetched = self.fetch(query, params).await;
        let stale = fetched.is_stale();

        let Some(data) = fetched.into_data() else {
            return Fetched::Unavailable;
        };

        match T::deserialize(&*data) {
            Ok(value) if stale => Fetched::Stale(value),
            Ok(value) => Fetched::Fresh(value),
            Err(e) => {
                warn!("cached payload for {:?} did not decode: {}", query, e);
                Fetched::Unavailable
            }
        }
    }

    /// Store `data` for `(query, params)` as if it had just been fetched.
    pub fn prime(&self, query: &str, params: Option<&QueryParams>, data: Value) {
        let key = CacheKey::new(query, params);
        write(&self.inner.entries).insert(key, CacheEntry::new(Arc::new(data)));
    }

    /// Drop every entry and return how many there were. Calls already in
    /// flight are detached: they still answer their own callers but their
    /// results are not stored.
    pub fn invalidate_all(&self) -> usize {
        let removed = {
            let mut entries = write(&self.inner.entries);
            lock(&self.inner.pending).clear();
            let n = entries.len();
            entries.clear();
            n
        };
        lock(&self.inner.in_flight).clear();

        CacheCounters::add(&self.inner.counters.invalidated, removed as u64);
        info!("cache cleared ({} entries)", removed);
        removed
    }

    /// Drop every entry whose serialized key contains `pattern`. Returns the
    /// number of entries removed. Non-matching entries keep their data and
    /// timestamp, and calls in flight for them still store their results.
    pub fn invalidate_matching(&self, pattern: &str) -> usize {
        let removed = {
            let mut entries = write(&self.inner.entries);
            lock(&self.inner.pending).retain(|_, key| !key.contains(pattern));
            let before = entries.len();
            entries.retain(|key, _| !key.contains(pattern));
            before - entries.len()
        };
        lock(&self.inner.in_flight).retain(|key, _| !key.contains(pattern));

        CacheCounters::add(&self.inner.counters.invalidated, removed as u64);
        info!("invalidated {} entries matching {:?}", removed, pattern);
        removed
    }

    pub fn len(&self) -> usize {
        read(&self.inner.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.inner.entries).is_empty()
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let ttl = self.inner.config.ttl;
        let entries = read(&self.inner.entries);
        let counters = &self.inner.counters;

        let ages = entries.values().map(|e| e.age(now));

        CacheStats {
            entries: entries.len(),
            fresh_entries: entries.values().filter(|e| e.age(now) < ttl).count(),
            in_flight: lock(&self.inner.in_flight).len(),
            ttl,
            hits: CacheCounters::get(&counters.hits),
            misses: CacheCounters::get(&counters.misses),
            coalesced: CacheCounters::get(&counters.coalesced),
            source_calls: CacheCounters::get(&counters.source_calls),
            stale_served: CacheCounters::get(&counters.stale_served),
            unavailable: CacheCounters::get(&counters.unavailable),
            invalidated: CacheCounters::get(&counters.invalidated),
            oldest_entry_age: ages.clone().max(),
            newest_entry_age: ages.min(),
        }
    }

    /// Every entry with its age, sorted by key.
    pub fn entries(&self) -> Vec<EntrySummary> {
        let now = Instant::now();
        let ttl = self.inner.config.ttl;
        let entries = read(&self.inner.entries);

        let mut out: Vec<EntrySummary> = entries
            .iter()
            .map(|(key, entry)| {
                let age = entry.age(now);
                EntrySummary {
                    key: key.to_string(),
                    age,
                    fresh: age < ttl,
                    fetched_at: entry.fetched_at,
                }
            })
            .collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }

    fn lookup_fresh(&self, key: &CacheKey) -> Option<Arc<Value>> {
        let entries = read(&self.inner.entries);
        let entry = entries.get(key)?;
        if entry.age(Instant::now()) < self.inner.config.ttl {
            Some(entry.data.clone())
        } else {
            None
        }
    }

    fn fallback(&self, key: &CacheKey) -> Fetched<Arc<Value>> {
        match read(&self.inner.entries).get(key) {
            Some(entry) => {
                CacheCounters::incr(&self.inner.counters.stale_served);
                debug!("serving stale entry for {}", key);
                Fetched::Stale(entry.data.clone())
            }
            None => {
                CacheCounters::incr(&self.inner.counters.unavailable);
                Fetched::Unavailable
            }
        }
    }

    async fn join_flight(
        &self,
        key: CacheKey,
        query: &str,
        params: QueryParams,
    ) -> Option<Arc<Value>> {
        let future = {
            let mut flights = lock(&self.inner.in_flight);
            match flights.get(&key) {
                Some(flight) => {
                    CacheCounters::incr(&self.inner.counters.coalesced);
                    debug!("joining in-flight fetch for {}", key);
                    flight.future.clone()
                }
                None => {
                    let id = self.inner.begin_call(&key);
                    let future = Inner::spawn_load(
                        self.inner.clone(),
                        id,
                        key.clone(),
                        query.to_owned(),
                        params,
                    )
                    .shared();
                    flights.insert(
                        key,
                        Flight {
                            id,
                            future: future.clone(),
                        },
                    );
                    future
                }
            }
        };

        future.await
    }
}

impl<S> Inner<S> {
    /// Register a source call for `key`; its result is stored unless an
    /// invalidation matching `key` runs before it completes.
    fn begin_call(&self, key: &CacheKey) -> u64 {
        let id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.pending).insert(id, key.clone());
        id
    }

    fn store(&self, id: u64, key: &CacheKey, data: &Arc<Value>) {
        let mut entries = write(&self.entries);
        if lock(&self.pending).remove(&id).is_none() {
            debug!("discarding result for {}: invalidated while in flight", key);
            return;
        }
        entries.insert(key.clone(), CacheEntry::new(data.clone()));
    }

    fn end_call(&self, id: u64, key: &CacheKey) {
        lock(&self.pending).remove(&id);
        let mut flights = lock(&self.in_flight);
        if flights.get(key).is_some_and(|f| f.id == id) {
            flights.remove(key);
        }
    }
}

impl<S: ContentSource + 'static> Inner<S> {
    /// Run call `id` on its own task. The returned future only waits for
    /// it; dropping that future does not cancel the call.
    fn spawn_load(
        self: Arc<Self>,
        id: u64,
        key: CacheKey,
        query: String,
        params: QueryParams,
    ) -> BoxFuture<'static, Option<Arc<Value>>> {
        let inner = self.clone();
        let task_key = key.clone();
        let task = tokio::spawn(async move { self.load(id, task_key, query, params).await });

        async move {
            match task.await {
                Ok(loaded) => loaded,
                Err(e) => {
                    warn!("source call for {} did not complete: {}", key, e);
                    inner.end_call(id, &key);
                    None
                }
            }
        }
        .boxed()
    }

    async fn load(
        self: Arc<Self>,
        id: u64,
        key: CacheKey,
        query: String,
        params: QueryParams,
    ) -> Option<Arc<Value>> {
        CacheCounters::incr(&self.counters.source_calls);

        let loaded = match self.source.query(&query, &params).await {
            Ok(value) => {
                let data = Arc::new(value);
                self.store(id, &key, &data);
                Some(data)
            }
            Err(e) => {
                warn!("{} query failed for {}: {}", self.source.name(), key, e);
                None
            }
        };

        self.end_call(id, &key);
        loaded
    }
}

// A panic while holding one of these locks cannot leave the maps half
// written, so poisoning is ignored.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests;
