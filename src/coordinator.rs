//! Fetch coordination: cache lookup, in-flight dedup, fetch, persist, insert.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::debug;

use crate::cache::{CacheKey, CacheStats, PageCache};
use crate::error::PageResult;
use crate::fetcher::PageFetcher;
use crate::inflight::{Claim, InFlightTable};
use crate::store::{LocalHandle, PageStore};

/// Check if per-fetch timing instrumentation is enabled via env var.
fn fetch_timing_enabled() -> bool {
    std::env::var("PAGECACHE_FETCH_TIMING").is_ok_and(|v| v == "1" || v == "true")
}

/// Resolves page keys to local handles, fetching each key at most once at a
/// time no matter how many callers ask for it concurrently.
pub struct FetchCoordinator {
    /// LRU index of persisted pages.
    cache: Arc<PageCache>,
    /// Keys currently being fetched, with their shared result slots.
    in_flight: InFlightTable,
    store: Arc<dyn PageStore>,
    /// Serializes persist+insert against check+delete. Handles are
    /// deterministic per key, so an unguarded background release could
    /// delete a page that was fetched again after it was evicted.
    storage_lock: Arc<Mutex<()>>,
    fetcher: Arc<dyn PageFetcher>,
    /// Whether per-fetch timing is enabled (cached from PAGECACHE_FETCH_TIMING env var).
    fetch_timing: bool,
}

impl FetchCoordinator {
    pub fn new(capacity: usize, store: Arc<dyn PageStore>, fetcher: Arc<dyn PageFetcher>) -> Self {
        Self {
            cache: Arc::new(PageCache::new(capacity)),
            in_flight: InFlightTable::new(),
            store,
            storage_lock: Arc::new(Mutex::new(())),
            fetcher,
            fetch_timing: fetch_timing_enabled(),
        }
    }

    /// Resolve `key` to a local handle.
    ///
    /// 1. Cache hit: return immediately, refreshing recency.
    /// 2. Fetch already running for `key`: block until it settles and share
    ///    its outcome.
    /// 3. Otherwise lead the fetch: remote call, persist, cache insert. The
    ///    in-flight entry is cleared on every exit path.
    pub fn resolve(&self, key: &CacheKey, credential: &str) -> PageResult<LocalHandle> {
        if let Some(handle) = self.cache.get(key) {
            debug!(page = %key, "Cache hit");
            return Ok(handle);
        }

        match self.in_flight.claim(key) {
            Claim::Waiter(slot) => {
                debug!(page = %key, "Joining in-flight fetch");
                slot.wait()
            }
            Claim::Leader(leader) => {
                // A fetch may have settled between the miss and the claim
                if let Some(handle) = self.cache.peek(key) {
                    return leader.settle(Ok(handle));
                }
                let result = self.fetch_and_store(key, credential);
                if let Err(e) = &result {
                    debug!(page = %key, error = %e, "Fetch failed");
                }
                leader.settle(result)
            }
        }
    }

    /// Fetch, persist, and insert into the cache.
    ///
    /// Called only by the in-flight leader for `key`. The cache insert
    /// happens before the leader settles, so anyone arriving after the
    /// in-flight entry is gone finds the page cached.
    fn fetch_and_store(&self, key: &CacheKey, credential: &str) -> PageResult<LocalHandle> {
        let t0 = self.fetch_timing.then(Instant::now);

        let data = self.fetcher.fetch(key, credential)?;
        let t_fetch = t0.map(|t| t.elapsed());

        let (handle, released) = {
            let _guard = self.storage_lock.lock();
            let handle = self.store.persist(key, &data)?;
            let released = self.cache.put(key.clone(), handle.clone());
            (handle, released)
        };
        self.release_in_background(released);

        if let (Some(t), Some(t_fetch)) = (t0, t_fetch) {
            let total = t.elapsed();
            debug!(
                page = %key,
                bytes = data.len(),
                "fetch={:.2?} persist={:.2?} total={:.2?}",
                t_fetch,
                total - t_fetch,
                total
            );
        }

        Ok(handle)
    }

    /// Delete released handles off the caller's thread. Failures are logged
    /// by the store and never reach the caller.
    fn release_in_background(&self, handles: Vec<LocalHandle>) {
        for handle in handles {
            debug!(path = %handle.path().display(), "Releasing evicted page");
            let store = Arc::clone(&self.store);
            let cache = Arc::clone(&self.cache);
            let storage_lock = Arc::clone(&self.storage_lock);
            rayon::spawn(move || {
                let _guard = storage_lock.lock();
                // Fetched again since it was released
                if cache.holds(&handle) {
                    return;
                }
                store.release_logged(&handle);
            });
        }
    }

    /// Whether `key` is cached. Does not count as an access.
    pub fn is_cached(&self, key: &CacheKey) -> bool {
        self.cache.contains(key)
    }

    /// Whether a fetch for `key` is currently running.
    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        self.in_flight.contains(key)
    }

    /// Drop every cached page and release its storage.
    ///
    /// Fetches already running are left alone; they still settle their
    /// waiters and insert their page when done.
    pub fn clear(&self) {
        let released = self.cache.clear();
        debug!(pages = released.len(), "Cleared page cache");
        self.release_in_background(released);
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn reset_cache_stats(&self) {
        self.cache.reset_stats();
    }

    #[cfg(test)]
    pub(crate) fn in_flight(&self) -> &InFlightTable {
        &self.in_flight
    }
}
