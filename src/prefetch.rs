//! Reading-position based page prefetching.
//!
//! Each planning call replaces the previous plan: the queue is cleared and
//! the generation bumped, so jobs queued for an old reading position are
//! dropped instead of pursued. Jobs run on a small dedicated rayon pool to
//! avoid competing with foreground work.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::cache::CacheKey;
use crate::coordinator::FetchCoordinator;
use crate::error::{PageError, PageResult};
use crate::fetcher::CredentialProvider;

/// Neighbor selection for a reading position.
///
/// Page indices are zero-based: `current_index` ranges over
/// `0..total_pages`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrefetchCalculator;

impl PrefetchCalculator {
    pub fn new() -> Self {
        Self
    }

    /// Neighbor pages in priority order: next, previous, next-plus-one.
    pub fn candidates(&self, current_index: u32, total_pages: u32) -> Vec<u32> {
        if current_index >= total_pages {
            return Vec::new();
        }
        let within = |offset: u32| {
            current_index
                .checked_add(offset)
                .filter(|page| *page < total_pages)
        };
        let mut pages = Vec::with_capacity(3);
        pages.extend(within(1));
        if current_index > 0 {
            pages.push(current_index - 1);
        }
        pages.extend(within(2));
        pages
    }

    /// Candidate keys for `chapter_id`, minus those `skip` rejects.
    pub fn prefetch_pages(
        &self,
        chapter_id: &Arc<str>,
        current_index: u32,
        total_pages: u32,
        skip: &impl Fn(&CacheKey) -> bool,
    ) -> Vec<CacheKey> {
        self.candidates(current_index, total_pages)
            .into_iter()
            .map(|page| CacheKey::new(Arc::clone(chapter_id), page))
            .filter(|key| !skip(key))
            .collect()
    }
}

/// Count of dispatched-but-unsettled jobs.
#[derive(Default)]
struct Pending {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Pending {
    fn enter(self: &Arc<Self>) -> PendingGuard {
        *self.count.lock() += 1;
        PendingGuard(Arc::clone(self))
    }

    fn wait_idle(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.idle.wait(&mut count);
        }
    }
}

struct PendingGuard(Arc<Pending>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let mut count = self.0.count.lock();
        *count -= 1;
        if *count == 0 {
            self.0.idle.notify_all();
        }
    }
}

/// Background prefetcher feeding the fetch coordinator.
pub struct PrefetchScheduler {
    coordinator: Arc<FetchCoordinator>,
    credentials: Arc<dyn CredentialProvider>,
    calculator: PrefetchCalculator,
    /// Keys planned but not yet picked up by a job.
    queue: Arc<Mutex<VecDeque<CacheKey>>>,
    /// Bumped on every plan()/cancel() to invalidate queued jobs.
    generation: Arc<AtomicU64>,
    pending: Arc<Pending>,
    /// Total jobs dispatched since creation.
    dispatched: AtomicU64,
    pool: rayon::ThreadPool,
}

impl PrefetchScheduler {
    /// Create a scheduler with a dedicated pool of `threads` workers.
    pub fn new(
        coordinator: Arc<FetchCoordinator>,
        credentials: Arc<dyn CredentialProvider>,
        threads: usize,
    ) -> PageResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|idx| format!("page-prefetch-{idx}"))
            .panic_handler(|_| warn!("Prefetch job panicked"))
            .build()
            .map_err(|e| PageError::Config(format!("prefetch pool: {e}")))?;

        Ok(Self {
            coordinator,
            credentials,
            calculator: PrefetchCalculator::new(),
            queue: Arc::new(Mutex::new(VecDeque::new())),
            generation: Arc::new(AtomicU64::new(0)),
            pending: Arc::new(Pending::default()),
            dispatched: AtomicU64::new(0),
            pool,
        })
    }

    /// Replace the current plan with the neighbors of `current_index`.
    ///
    /// Never blocks on network I/O and never fails; fetch errors surface
    /// only in logs.
    pub fn plan(&self, chapter_id: &str, current_index: u32, total_pages: u32) {
        let batch_generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let chapter_id: Arc<str> = Arc::from(chapter_id);

        let mut queue = self.queue.lock();
        queue.clear();

        let keys = self.calculator.prefetch_pages(
            &chapter_id,
            current_index,
            total_pages,
            &|key| self.coordinator.is_cached(key) || self.coordinator.is_in_flight(key),
        );
        if keys.is_empty() {
            debug!(chapter = %chapter_id, current_index, total_pages, "Nothing to prefetch");
            return;
        }

        for key in keys {
            debug!(page = %key, generation = batch_generation, "Queueing prefetch");
            queue.push_back(key);
            self.dispatch_one(batch_generation);
        }
    }

    /// Drop every queued job. Fetches already running finish normally.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.queue.lock().clear();
    }

    /// Number of planned keys not yet picked up.
    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// Number of jobs dispatched since creation, one per planned key.
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Block until every dispatched job has settled.
    pub fn wait_idle(&self) {
        self.pending.wait_idle();
    }

    /// Spawn a job that takes one key off the queue and resolves it.
    fn dispatch_one(&self, batch_generation: u64) {
        let guard = self.pending.enter();
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        let coordinator = Arc::clone(&self.coordinator);
        let credentials = Arc::clone(&self.credentials);
        let queue = Arc::clone(&self.queue);
        let generation = Arc::clone(&self.generation);

        self.pool.spawn(move || {
            let _guard = guard;

            // A newer plan superseded this one before the job started
            if generation.load(Ordering::Acquire) != batch_generation {
                return;
            }
            let Some(key) = queue.lock().pop_front() else {
                return;
            };
            // Foreground reading may have loaded it in the meantime
            if coordinator.is_cached(&key) {
                return;
            }

            let credential = credentials.credential();
            match coordinator.resolve(&key, &credential) {
                Ok(_) => debug!(page = %key, "Prefetched"),
                Err(e) => warn!(page = %key, error = %e, "Prefetch failed"),
            }
        });
    }
}

impl Drop for PrefetchScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
