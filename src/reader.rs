//! Consumer-facing entry point for the reading UI.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cache::{CacheKey, CacheStats};
use crate::config::ReaderConfig;
use crate::coordinator::FetchCoordinator;
use crate::error::{PageError, PageResult};
use crate::fetcher::{CredentialProvider, PageFetcher};
use crate::prefetch::PrefetchScheduler;
use crate::store::{DiskPageStore, LocalHandle, PageStore};

/// Page engine for one reading session.
///
/// Construct once and share by reference; every instance owns its own
/// cache, in-flight table, and prefetch queue.
///
/// ```no_run
/// use std::sync::Arc;
/// use pagecache_core::{ChapterReader, ReaderConfig, StaticCredential};
/// # fn demo(fetcher: Arc<dyn pagecache_core::PageFetcher>) -> pagecache_core::PageResult<()> {
/// let reader = ChapterReader::open(
///     &ReaderConfig::default(),
///     fetcher,
///     Arc::new(StaticCredential("session-token".into())),
/// )?;
///
/// let handle = reader.get_page("chapter-17", 0)?;
/// reader.plan_prefetch("chapter-17", 0, 24);
/// println!("render {}", handle.path().display());
///
/// reader.reset();
/// # Ok(())
/// # }
/// ```
pub struct ChapterReader {
    coordinator: Arc<FetchCoordinator>,
    prefetch: PrefetchScheduler,
    credentials: Arc<dyn CredentialProvider>,
    prefetch_enabled: bool,
}

impl ChapterReader {
    /// Open a reader backed by `config.cache_dir`.
    ///
    /// Page files left by a previous process are purged: the in-memory
    /// index starts empty, so nothing would ever release them.
    pub fn open(
        config: &ReaderConfig,
        fetcher: Arc<dyn PageFetcher>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> PageResult<Self> {
        config.validate()?;
        let store = DiskPageStore::open(&config.cache_dir).map_err(|e| {
            PageError::Config(format!("cache dir {}: {e}", config.cache_dir.display()))
        })?;
        match store.purge() {
            Ok(0) => {}
            Ok(removed) => info!(removed, "Purged orphaned pages"),
            Err(e) => warn!(error = %e, "Failed to purge orphaned pages"),
        }
        Self::with_store(config, Arc::new(store), fetcher, credentials)
    }

    /// Open a reader over an arbitrary page store.
    pub fn with_store(
        config: &ReaderConfig,
        store: Arc<dyn PageStore>,
        fetcher: Arc<dyn PageFetcher>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> PageResult<Self> {
        config.validate()?;
        let coordinator = Arc::new(FetchCoordinator::new(config.capacity, store, fetcher));
        let prefetch = PrefetchScheduler::new(
            Arc::clone(&coordinator),
            Arc::clone(&credentials),
            config.prefetch_threads,
        )?;

        Ok(Self {
            coordinator,
            prefetch,
            credentials,
            prefetch_enabled: config.prefetch_enabled,
        })
    }

    /// Get a page's local handle, fetching it if needed.
    ///
    /// `page_index` is zero-based.
    pub fn get_page(&self, chapter_id: &str, page_index: u32) -> PageResult<LocalHandle> {
        let key = CacheKey::new(chapter_id, page_index);
        let credential = self.credentials.credential();
        self.coordinator.resolve(&key, &credential)
    }

    /// Prefetch the neighbors of the page now on screen.
    ///
    /// `current_index` is zero-based and `total_pages` is the chapter's
    /// page count. Returns immediately.
    pub fn plan_prefetch(&self, chapter_id: &str, current_index: u32, total_pages: u32) {
        if !self.prefetch_enabled {
            return;
        }
        self.prefetch.plan(chapter_id, current_index, total_pages);
    }

    /// Forget everything: cancel queued prefetch and drop all cached pages.
    ///
    /// Call on chapter change or when the app goes to the background.
    pub fn reset(&self) {
        debug!("Resetting reader");
        self.prefetch.cancel();
        self.coordinator.clear();
    }

    /// Whether a page is cached locally. Does not count as an access.
    pub fn is_cached(&self, chapter_id: &str, page_index: u32) -> bool {
        self.coordinator
            .is_cached(&CacheKey::new(chapter_id, page_index))
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.coordinator.cache_stats()
    }

    /// Reset cache hit/miss/eviction counters to zero.
    pub fn reset_cache_stats(&self) {
        self.coordinator.reset_cache_stats();
    }

    /// Block until all dispatched prefetch work has settled.
    pub fn wait_for_prefetch(&self) {
        self.prefetch.wait_idle();
    }
}
