//! Process-wide artifact cache
//!
//! Memoizes fetched buffers by canonical source URL:
//! - Concurrent requests for the same key share one in-flight fetch
//! - Every waiter observes the same buffer or the same error
//! - Failures are never memoized
//! - Least-recently-used entries are evicted when count or byte bounds are exceeded
//!
//! [`ArtifactCache`] is a cheap handle; clones share the same storage, so a
//! single cache can be injected into any number of runners.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::CacheConfig;
use crate::error::{Error, Result};

type PendingFetch = Shared<BoxFuture<'static, Result<Bytes>>>;

/// Cached buffer
struct CacheEntry {
    data: Bytes,
    /// When the fetch completed
    fetched_at: SystemTime,
    /// Logical access time for LRU ordering
    last_used: u64,
}

/// Fetch currently running for a key
struct InFlight {
    id: u64,
    fetch: PendingFetch,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    in_flight: HashMap<String, InFlight>,
    total_bytes: u64,
    clock: u64,
    next_id: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    fetches: AtomicU64,
    evictions: AtomicU64,
}

struct Inner {
    config: CacheConfig,
    state: Mutex<CacheState>,
    counters: Counters,
}

/// Cache statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: u64,
    pub in_flight: usize,
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub fetches: u64,
    pub evictions: u64,
}

/// Shared, bounded, request-coalescing buffer cache
#[derive(Clone)]
pub struct ArtifactCache {
    inner: Arc<Inner>,
}

impl ArtifactCache {
    /// Create a cache. Call once at application start and share the handle.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(CacheState::default()),
                counters: Counters::default(),
            }),
        }
    }

    /// A cache that never memoizes
    pub fn disabled() -> Self {
        Self::new(CacheConfig {
            enabled: false,
            ..Default::default()
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.config.enabled
    }

    /// Return the buffer for `key`, running `fetch` only if no cached value
    /// or in-flight fetch exists
    ///
    /// The fetch runs on its own task: dropping every waiter does not cancel
    /// it, and its result still lands in the cache. Must be called from
    /// within a tokio runtime.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> Result<Bytes>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes>> + Send + 'static,
    {
        if !self.inner.config.enabled {
            self.inner.counters.fetches.fetch_add(1, Ordering::Relaxed);
            return fetch().await;
        }

        let pending = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            state.clock += 1;

            if let Some(entry) = state.entries.get_mut(key) {
                entry.last_used = state.clock;
                self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Cache hit: {}", key);
                return Ok(entry.data.clone());
            }

            if let Some(in_flight) = state.in_flight.get(key) {
                self.inner.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Joining in-flight fetch: {}", key);
                in_flight.fetch.clone()
            } else {
                self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
                self.inner.counters.fetches.fetch_add(1, Ordering::Relaxed);

                let id = state.next_id;
                state.next_id += 1;

                let pending = self.spawn_fetch(key.to_string(), id, fetch());
                state.in_flight.insert(
                    key.to_string(),
                    InFlight {
                        id,
                        fetch: pending.clone(),
                    },
                );
                pending
            }
        };

        pending.await
    }

    fn spawn_fetch<Fut>(&self, key: String, id: u64, fetch: Fut) -> PendingFetch
    where
        Fut: Future<Output = Result<Bytes>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            let result = fetch.await;
            inner.complete(&task_key, id, &result);
            result
        });

        async move {
            task.await.unwrap_or_else(|e| {
                Err(Error::backend(format!("fetch task for {} aborted: {}", key, e)))
            })
        }
        .boxed()
        .shared()
    }

    /// Whether `key` currently has a cached buffer
    pub fn contains(&self, key: &str) -> bool {
        self.inner.state.lock().entries.contains_key(key)
    }

    /// When the cached buffer for `key` was fetched
    pub fn fetched_at(&self, key: &str) -> Option<SystemTime> {
        self.inner
            .state
            .lock()
            .entries
            .get(key)
            .map(|entry| entry.fetched_at)
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached buffer and detach in-flight fetches
    ///
    /// Detached fetches still resolve for their waiters but are not stored.
    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        let dropped = state.entries.len();
        state.entries.clear();
        state.in_flight.clear();
        state.total_bytes = 0;
        tracing::info!("Cleared artifact cache ({} entries)", dropped);
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.inner.state.lock();
        let counters = &self.inner.counters;
        CacheStats {
            entries: state.entries.len(),
            bytes: state.total_bytes,
            in_flight: state.in_flight.len(),
            hits: counters.hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            coalesced: counters.coalesced.load(Ordering::Relaxed),
            fetches: counters.fetches.load(Ordering::Relaxed),
            evictions: counters.evictions.load(Ordering::Relaxed),
        }
    }
}

impl Default for ArtifactCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl Inner {
    /// Record the outcome of fetch `id` for `key`
    fn complete(&self, key: &str, id: u64, result: &Result<Bytes>) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        match state.in_flight.get(key) {
            Some(in_flight) if in_flight.id == id => {
                state.in_flight.remove(key);
            }
            // Detached by clear()
            _ => return,
        }

        let Ok(data) = result else {
            return;
        };

        let size = data.len() as u64;
        if size > self.config.max_bytes {
            tracing::debug!(
                "Not caching {} ({} bytes exceeds budget of {})",
                key,
                size,
                self.config.max_bytes
            );
            return;
        }

        state.clock += 1;
        if let Some(previous) = state.entries.insert(
            key.to_string(),
            CacheEntry {
                data: data.clone(),
                fetched_at: SystemTime::now(),
                last_used: state.clock,
            },
        ) {
            state.total_bytes -= previous.data.len() as u64;
        }
        state.total_bytes += size;

        self.ensure_capacity(state);
    }

    /// Evict least-recently-used entries until both bounds hold
    fn ensure_capacity(&self, state: &mut CacheState) {
        while state.entries.len() > self.config.max_entries
            || state.total_bytes > self.config.max_bytes
        {
            let lru_key = state
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone());

            let Some(key) = lru_key else {
                break;
            };

            if let Some(entry) = state.entries.remove(&key) {
                state.total_bytes -= entry.data.len() as u64;
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::info!("Evicting cached artifact: {}", key);
            }
        }
    }
}
