//! pagecache_core - Page retrieval and caching engine for chapter reading.
//!
//! This crate provides:
//! - A bounded LRU index of pages persisted to a local cache directory
//! - At most one in-flight remote fetch per page, shared by all callers
//! - Neighbor prefetching driven by the current reading position
//!
//! Page indices are zero-based throughout.

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fetcher;
pub mod inflight;
pub mod prefetch;
pub mod reader;
pub mod store;
#[cfg(test)]
pub(crate) mod test_utils;

pub use cache::{CacheKey, CacheStats, PageCache};
pub use config::ReaderConfig;
pub use coordinator::FetchCoordinator;
pub use error::{PageError, PageResult};
#[cfg(feature = "http")]
pub use fetcher::HttpPageFetcher;
pub use fetcher::{CredentialProvider, PageFetcher, StaticCredential};
pub use prefetch::{PrefetchCalculator, PrefetchScheduler};
pub use reader::ChapterReader;
pub use store::{DiskPageStore, LocalHandle, PageStore};
