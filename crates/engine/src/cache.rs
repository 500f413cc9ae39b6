//! Option cache keyed by field, dependency state, and option template.
//!
//! Entries stay fresh for a fixed time-to-live. Expired entries are evicted
//! lazily on access, and an insert that pushes the cache over its soft limit
//! sweeps every expired entry. Fresh entries are never evicted.
//!
//! Concurrent requests for the same key share one in-flight fetch; every
//! waiter receives the same result.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use formflow_types::{FieldOption, OptionSource};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, trace};

use crate::{error::EngineError, template::ResolvedValues};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_SOFT_LIMIT: usize = 256;

pub type OptionList = Arc<Vec<FieldOption>>;
type InFlightFetch = Shared<BoxFuture<'static, Result<OptionList, EngineError>>>;

/// Time source for freshness checks.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock().expect("clock lock") += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock().expect("clock lock")
    }
}

/// Identity of one cached option list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    field: String,
    parents: String,
    template: String,
}

impl CacheKey {
    /// Builds a key from the field, its option source, and the canonical parent values.
    ///
    /// Two keys are equal only when all three parts are equal, so a changed
    /// template or changed parent value never reuses stale options.
    pub fn new(field: impl Into<String>, source: &OptionSource, parents: &ResolvedValues) -> Self {
        Self {
            field: field.into(),
            parents: parents.canonical(),
            template: serde_json::to_string(source).unwrap_or_default(),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    /// Canonical serialization of the parent values this key was built from.
    pub fn parents(&self) -> &str {
        &self.parents
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    stored_at: Instant,
    options: OptionList,
}

struct CacheInner {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    in_flight: Mutex<HashMap<CacheKey, InFlightFetch>>,
    time_to_live: Duration,
    soft_limit: usize,
    clock: Arc<dyn Clock>,
}

/// Shared option cache. Cloning yields another handle to the same storage.
#[derive(Clone)]
pub struct OptionCache {
    inner: Arc<CacheInner>,
}

impl fmt::Debug for OptionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptionCache")
            .field("time_to_live", &self.inner.time_to_live)
            .field("soft_limit", &self.inner.soft_limit)
            .field("len", &self.len())
            .finish()
    }
}

impl Default for OptionCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL, DEFAULT_SOFT_LIMIT)
    }
}

impl OptionCache {
    pub fn new(time_to_live: Duration, soft_limit: usize) -> Self {
        Self::with_clock(time_to_live, soft_limit, Arc::new(SystemClock))
    }

    pub fn with_clock(time_to_live: Duration, soft_limit: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                time_to_live,
                soft_limit,
                clock,
            }),
        }
    }

    fn is_fresh(&self, entry: &CacheEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.stored_at) < self.inner.time_to_live
    }

    /// Returns fresh options for `key`, evicting the entry if it has expired.
    pub fn get(&self, key: &CacheKey) -> Option<OptionList> {
        let now = self.inner.clock.now();
        let mut entries = self.inner.entries.lock().expect("cache lock");
        let entry = entries.get(key)?;
        if self.is_fresh(entry, now) {
            trace!(field = %key.field, "option cache hit");
            return Some(Arc::clone(&entry.options));
        }
        entries.remove(key);
        debug!(field = %key.field, "option cache entry expired");
        None
    }

    pub fn put(&self, key: CacheKey, options: Vec<FieldOption>) -> OptionList {
        let options = Arc::new(options);
        self.store(key, Arc::clone(&options));
        options
    }

    fn store(&self, key: CacheKey, options: OptionList) {
        let now = self.inner.clock.now();
        let mut entries = self.inner.entries.lock().expect("cache lock");
        entries.insert(key, CacheEntry { stored_at: now, options });
        if entries.len() > self.inner.soft_limit {
            let before = entries.len();
            let time_to_live = self.inner.time_to_live;
            entries.retain(|_, entry| now.saturating_duration_since(entry.stored_at) < time_to_live);
            debug!(
                evicted = before - entries.len(),
                remaining = entries.len(),
                soft_limit = self.inner.soft_limit,
                "option cache swept"
            );
        }
    }

    /// Drops every entry for `field`, whatever its parent values.
    pub fn invalidate(&self, field: &str) {
        self.inner
            .entries
            .lock()
            .expect("cache lock")
            .retain(|key, _| key.field != field);
    }

    pub fn clear(&self) {
        self.inner.entries.lock().expect("cache lock").clear();
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().expect("cache lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of fetches currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.lock().expect("in-flight lock").len()
    }

    /// Returns cached options or runs `fetch`, sharing the fetch with concurrent callers.
    ///
    /// `fetch` is only invoked when neither a fresh entry nor an in-flight fetch
    /// exists for `key`. Successful results are stored; failures are not.
    pub async fn get_or_fetch<F>(&self, key: CacheKey, fetch: F) -> Result<OptionList, EngineError>
    where
        F: FnOnce() -> BoxFuture<'static, Result<Vec<FieldOption>, EngineError>>,
    {
        if let Some(options) = self.get(&key) {
            return Ok(options);
        }

        let shared = {
            let mut in_flight = self.inner.in_flight.lock().expect("in-flight lock");
            if let Some(existing) = in_flight.get(&key) {
                debug!(field = %key.field, "joining in-flight option fetch");
                existing.clone()
            } else {
                let cache = self.clone();
                let store_key = key.clone();
                let request = fetch();
                let shared = async move {
                    let result = request.await.map(Arc::new);
                    if let Ok(options) = &result {
                        cache.store(store_key.clone(), Arc::clone(options));
                    }
                    cache.inner.in_flight.lock().expect("in-flight lock").remove(&store_key);
                    result
                }
                .boxed()
                .shared();
                in_flight.insert(key, shared.clone());
                shared
            }
        };

        shared.await
    }
}
