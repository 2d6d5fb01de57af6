//! Bounded LRU index of persisted pages.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::store::LocalHandle;

/// Default number of pages kept in the cache.
pub const DEFAULT_CAPACITY: usize = 10;

/// Page address: chapter id plus zero-based page index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub chapter_id: Arc<str>,
    pub page_index: u32,
}

impl CacheKey {
    pub fn new(chapter_id: impl Into<Arc<str>>, page_index: u32) -> Self {
        Self {
            chapter_id: chapter_id.into(),
            page_index,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.chapter_id, self.page_index)
    }
}

/// A cached page.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub handle: LocalHandle,
    /// Logical access time. Strictly increasing across all hits and inserts.
    pub last_accessed: u64,
}

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub num_pages: usize,
}

struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    clock: u64,
}

impl CacheState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// Thread-safe LRU page cache.
///
/// Pure bookkeeping: it never touches storage itself. Mutating calls hand
/// back the handles that fell out of the cache so the caller can release
/// them off the hot path.
pub struct PageCache {
    state: Mutex<CacheState>,
    /// Maximum number of entries, at least one.
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl PageCache {
    /// Create a cache holding at most `capacity` pages (clamped to 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::with_capacity(capacity + 1),
                clock: 0,
            }),
            capacity: capacity.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up a page, refreshing its recency on hit.
    pub fn get(&self, key: &CacheKey) -> Option<LocalHandle> {
        let mut state = self.state.lock();
        let state = &mut *state;
        match state.entries.get_mut(key) {
            Some(entry) => {
                state.clock += 1;
                entry.last_accessed = state.clock;
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.handle.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Look up a page without touching recency or stats.
    pub fn peek(&self, key: &CacheKey) -> Option<LocalHandle> {
        self.state
            .lock()
            .entries
            .get(key)
            .map(|entry| entry.handle.clone())
    }

    /// Check if a page is cached.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    /// Whether any entry currently points at `handle`.
    pub fn holds(&self, handle: &LocalHandle) -> bool {
        self.state
            .lock()
            .entries
            .values()
            .any(|entry| entry.handle == *handle)
    }

    /// Insert or overwrite a page, then evict least recently accessed
    /// entries until the cache is back within capacity.
    ///
    /// Returns the handles that are no longer referenced: evicted entries
    /// plus a displaced handle when an overwrite changed it.
    #[must_use = "returned handles must be released"]
    pub fn put(&self, key: CacheKey, handle: LocalHandle) -> Vec<LocalHandle> {
        let mut released = Vec::new();
        let mut state = self.state.lock();
        let now = state.tick();

        let entry = CacheEntry {
            key: key.clone(),
            handle: handle.clone(),
            last_accessed: now,
        };
        if let Some(previous) = state.entries.insert(key, entry) {
            if previous.handle != handle {
                released.push(previous.handle);
            }
        }

        while state.entries.len() > self.capacity {
            // Ties cannot happen with a strictly increasing clock; the key
            // still orders them so the choice stays deterministic.
            let victim = state
                .entries
                .values()
                .min_by(|a, b| {
                    a.last_accessed
                        .cmp(&b.last_accessed)
                        .then_with(|| a.key.cmp(&b.key))
                })
                .map(|entry| entry.key.clone());

            let Some(victim) = victim else { break };
            if let Some(evicted) = state.entries.remove(&victim) {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                released.push(evicted.handle);
            }
        }

        released
    }

    /// Remove every entry, returning all handles for release.
    #[must_use = "returned handles must be released"]
    pub fn clear(&self) -> Vec<LocalHandle> {
        // Stats survive a clear.
        let mut state = self.state.lock();
        state.entries.drain().map(|(_, entry)| entry.handle).collect()
    }

    #[cfg(test)]
    pub(crate) fn entry(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.state.lock().entries.get(key).cloned()
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            num_pages: self.len(),
        }
    }

    /// Reset hit/miss/eviction counters to zero.
    pub fn reset_stats(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get the number of cached pages.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Check if cache is empty.
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }
}
