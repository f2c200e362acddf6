//! TTL cache with inflight coalescing.
//!
//! [`TtlCache::get_or_set`] returns a fresh entry when one exists, joins a
//! load already in flight for the same key, and otherwise runs the loader
//! once. Each load runs on its own task, so it finishes (and releases
//! whatever it holds) even when every caller waiting on it is dropped. The
//! inflight marker is removed by a drop guard inside that task, so a failed
//! or panicking loader never blocks later callers.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use herald_core::{Clock, HeraldError, HeraldResult};

type SharedLoad<V> = Shared<BoxFuture<'static, HeraldResult<V>>>;

/// How a value was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Served from a fresh entry
    Hit,
    /// Joined a load started by another caller
    Coalesced,
    /// This caller ran the loader
    Loaded,
}

/// Value returned by [`TtlCache::get_or_set`].
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRead<V> {
    pub value: V,
    pub outcome: CacheOutcome,
}

impl<V> CacheRead<V> {
    /// True when this call did not reach upstream.
    pub fn from_cache(&self) -> bool {
        self.outcome != CacheOutcome::Loaded
    }
}

/// Counters for one cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    /// Loader invocations
    pub misses: u64,
    pub coalesced: u64,
    pub entry_count: u64,
}

impl CacheStats {
    /// Fraction of calls that did not run the loader (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.coalesced + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits + self.coalesced) as f64 / total as f64
        }
    }
}

struct CacheEntry<V> {
    value: V,
    expires_at_ms: i64,
}

struct Inner<V> {
    name: String,
    entries: DashMap<String, CacheEntry<V>>,
    /// Pending loads tagged with a load id so a finished load never removes
    /// a newer marker for the same key.
    inflight: DashMap<String, (u64, SharedLoad<V>)>,
    clock: Arc<dyn Clock>,
    next_load: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
}

impl<V: Clone> Inner<V> {
    fn fresh(&self, key: &str) -> Option<V> {
        let now = self.clock.now_ms();
        self.entries
            .get(key)
            .filter(|e| e.expires_at_ms > now)
            .map(|e| e.value.clone())
    }
}

/// Removes the inflight marker for `key` when the load finishes, fails or
/// unwinds.
struct InflightGuard<V> {
    inner: Weak<Inner<V>>,
    key: String,
    load_id: u64,
}

impl<V> Drop for InflightGuard<V> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner
                .inflight
                .remove_if(&self.key, |_, (id, _)| *id == self.load_id);
        }
    }
}

/// In-memory TTL cache keyed by string.
///
/// Expired entries are never served but are only replaced, not evicted, so
/// memory grows with the number of distinct keys.
pub struct TtlCache<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for TtlCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> std::fmt::Debug for TtlCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("name", &self.inner.name)
            .field("entries", &self.inner.entries.len())
            .field("inflight", &self.inner.inflight.len())
            .finish()
    }
}

impl<V> TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                entries: DashMap::new(),
                inflight: DashMap::new(),
                clock,
                next_load: AtomicU64::new(0),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                coalesced: AtomicU64::new(0),
            }),
        }
    }

    /// Return the cached value for `key`, or load it.
    ///
    /// `loader` is only called when there is neither a fresh entry nor a
    /// load in flight. A successful load is stored with expiry
    /// `now + ttl`; a failed load stores nothing and every caller waiting on
    /// it receives the same error.
    pub async fn get_or_set<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        loader: F,
    ) -> HeraldResult<CacheRead<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = HeraldResult<V>> + Send + 'static,
    {
        if let Some(value) = self.inner.fresh(key) {
            self.inner.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(CacheRead {
                value,
                outcome: CacheOutcome::Hit,
            });
        }

        let (load, outcome) = match self.inner.inflight.entry(key.to_string()) {
            MapEntry::Occupied(pending) => (pending.get().1.clone(), CacheOutcome::Coalesced),
            MapEntry::Vacant(slot) => {
                // A load may have completed between the freshness check and
                // taking the inflight slot.
                if let Some(value) = self.inner.fresh(key) {
                    self.inner.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(CacheRead {
                        value,
                        outcome: CacheOutcome::Hit,
                    });
                }
                let load_id = self.inner.next_load.fetch_add(1, Ordering::Relaxed);
                let load = self.start_load(key, ttl, load_id, loader());
                slot.insert((load_id, load.clone()));
                (load, CacheOutcome::Loaded)
            }
        };

        match outcome {
            CacheOutcome::Loaded => self.inner.misses.fetch_add(1, Ordering::Relaxed),
            _ => self.inner.coalesced.fetch_add(1, Ordering::Relaxed),
        };

        let value = load.await?;
        Ok(CacheRead { value, outcome })
    }

    fn start_load<Fut>(&self, key: &str, ttl: Duration, load_id: u64, fut: Fut) -> SharedLoad<V>
    where
        Fut: Future<Output = HeraldResult<V>> + Send + 'static,
    {
        let weak = Arc::downgrade(&self.inner);
        let key = key.to_string();
        let ttl_ms = ttl.as_millis() as i64;

        let task = tokio::spawn({
            let key = key.clone();
            async move {
                let _guard = InflightGuard {
                    inner: weak.clone(),
                    key: key.clone(),
                    load_id,
                };
                let value = fut.await?;
                if let Some(inner) = weak.upgrade() {
                    let expires_at_ms = inner.clock.now_ms().saturating_add(ttl_ms);
                    inner.entries.insert(
                        key,
                        CacheEntry {
                            value: value.clone(),
                            expires_at_ms,
                        },
                    );
                }
                Ok(value)
            }
        });

        async move {
            task.await.unwrap_or_else(|e| {
                Err(HeraldError::internal(format!("Cache load for '{}' aborted: {}", key, e)))
            })
        }
        .boxed()
        .shared()
    }

    /// Fresh value for `key` without loading.
    pub fn peek(&self, key: &str) -> Option<V> {
        self.inner.fresh(key)
    }

    pub fn invalidate(&self, key: &str) {
        self.inner.entries.remove(key);
    }

    pub fn clear(&self) {
        self.inner.entries.clear();
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Number of loads currently in flight.
    pub fn inflight(&self) -> usize {
        self.inner.inflight.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            coalesced: self.inner.coalesced.load(Ordering::Relaxed),
            entry_count: self.inner.entries.len() as u64,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
