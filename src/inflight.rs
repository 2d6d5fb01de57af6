//! Per-key in-flight fetch tracking.
//!
//! The first caller to claim a key becomes its leader and performs the
//! fetch. Later callers for the same key get the leader's slot and block on
//! it until the leader settles, so one network round trip serves them all.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::cache::CacheKey;
use crate::error::{PageError, PageResult};
use crate::store::LocalHandle;

/// Shared result cell for one in-flight fetch.
#[derive(Debug)]
pub struct InFlightSlot {
    result: Mutex<Option<PageResult<LocalHandle>>>,
    ready: Condvar,
    waiters: AtomicUsize,
}

impl InFlightSlot {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            ready: Condvar::new(),
            waiters: AtomicUsize::new(0),
        }
    }

    /// Block until the leader settles, then return its result.
    pub fn wait(&self) -> PageResult<LocalHandle> {
        let mut result = self.result.lock();
        loop {
            if let Some(settled) = result.as_ref() {
                return settled.clone();
            }
            self.ready.wait(&mut result);
        }
    }

    fn publish(&self, settled: PageResult<LocalHandle>) {
        *self.result.lock() = Some(settled);
        self.ready.notify_all();
    }
}

/// Outcome of [`InFlightTable::claim`].
pub enum Claim<'a> {
    /// Caller must perform the fetch and settle the guard.
    Leader(LeaderGuard<'a>),
    /// Another caller is already fetching; wait on its slot.
    Waiter(Arc<InFlightSlot>),
}

/// Set of keys currently being fetched.
#[derive(Default)]
pub struct InFlightTable {
    slots: Mutex<HashMap<CacheKey, Arc<InFlightSlot>>>,
}

impl InFlightTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`, becoming its leader unless a fetch is already running.
    pub fn claim(&self, key: &CacheKey) -> Claim<'_> {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get(key) {
            slot.waiters.fetch_add(1, Ordering::Relaxed);
            return Claim::Waiter(Arc::clone(slot));
        }
        let slot = Arc::new(InFlightSlot::new());
        slots.insert(key.clone(), Arc::clone(&slot));
        Claim::Leader(LeaderGuard {
            table: self,
            key: key.clone(),
            slot,
            settled: false,
        })
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.slots.lock().contains_key(key)
    }

    /// Number of callers that joined the fetch for `key` (0 if none running).
    pub fn waiters(&self, key: &CacheKey) -> usize {
        self.slots
            .lock()
            .get(key)
            .map_or(0, |slot| slot.waiters.load(Ordering::Relaxed))
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    fn remove(&self, key: &CacheKey, slot: &Arc<InFlightSlot>) {
        let mut slots = self.slots.lock();
        if slots.get(key).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            slots.remove(key);
        }
    }
}

/// Leadership over one in-flight key.
///
/// Dropping an unsettled guard (early return, panic in a fetcher) settles
/// it with [`PageError::Cancelled`] so waiters are never stranded.
pub struct LeaderGuard<'a> {
    table: &'a InFlightTable,
    key: CacheKey,
    slot: Arc<InFlightSlot>,
    settled: bool,
}

impl LeaderGuard<'_> {
    /// Remove the key from the table and hand `result` to every waiter.
    pub fn settle(mut self, result: PageResult<LocalHandle>) -> PageResult<LocalHandle> {
        self.finish(result.clone());
        result
    }

    fn finish(&mut self, result: PageResult<LocalHandle>) {
        self.settled = true;
        // Remove first: a caller arriving after this point starts fresh
        // (or hits the cache) instead of joining a finished slot.
        self.table.remove(&self.key, &self.slot);
        self.slot.publish(result);
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            let key = self.key.clone();
            self.finish(Err(PageError::Cancelled { key }));
        }
    }
}
