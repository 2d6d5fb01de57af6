//! Engine configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cache::DEFAULT_CAPACITY;
use crate::error::{PageError, PageResult};

/// Settings for a [`ChapterReader`](crate::reader::ChapterReader).
///
/// Every field has a default, so a JSON file only needs the keys it
/// overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReaderConfig {
    /// Maximum number of pages kept on disk and indexed in memory.
    pub capacity: usize,
    /// Directory holding persisted pages.
    pub cache_dir: PathBuf,
    /// Worker threads for background prefetch.
    pub prefetch_threads: usize,
    /// Whether `plan_prefetch` schedules anything at all.
    pub prefetch_enabled: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            cache_dir: std::env::temp_dir().join("pagecache"),
            prefetch_threads: 2,
            prefetch_enabled: true,
        }
    }
}

impl ReaderConfig {
    /// Load and validate a JSON config file.
    pub fn load(path: &Path) -> PageResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PageError::Config(format!("{}: {e}", path.display())))?;
        let config: ReaderConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PageResult<()> {
        if self.capacity == 0 {
            return Err(PageError::Config("capacity must be at least 1".into()));
        }
        if self.prefetch_threads == 0 {
            return Err(PageError::Config(
                "prefetch_threads must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
