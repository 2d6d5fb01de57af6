//! Error types for pagecache_core.

use std::sync::Arc;

use thiserror::Error;

use crate::cache::CacheKey;

/// Error types for page operations.
///
/// Cloneable so every caller waiting on the same in-flight fetch can be
/// handed the identical failure.
#[derive(Error, Debug, Clone)]
pub enum PageError {
    #[error("Fetch failed for {key}: {reason}")]
    Fetch { key: CacheKey, reason: String },

    #[error("Failed to persist {key}: {source}")]
    Storage {
        key: CacheKey,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("Fetch for {key} was abandoned before completing")]
    Cancelled { key: CacheKey },

    #[error("Config error: {0}")]
    Config(String),
}

impl PageError {
    pub fn fetch(key: &CacheKey, reason: impl Into<String>) -> Self {
        PageError::Fetch {
            key: key.clone(),
            reason: reason.into(),
        }
    }

    pub fn storage(key: &CacheKey, source: std::io::Error) -> Self {
        PageError::Storage {
            key: key.clone(),
            source: Arc::new(source),
        }
    }
}

impl From<serde_json::Error> for PageError {
    fn from(err: serde_json::Error) -> Self {
        PageError::Config(err.to_string())
    }
}

/// Result type alias for page operations.
pub type PageResult<T> = Result<T, PageError>;
