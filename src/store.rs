//! Durable local storage for fetched page bytes.
//!
//! Every page lands in a single flat cache directory under a name derived
//! from its key, so persisting the same key twice overwrites in place.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::cache::CacheKey;
use crate::error::{PageError, PageResult};

const PAGE_FILE_PREFIX: &str = "page-";
const TEMP_SUFFIX: &str = ".part";

/// Opaque reference to a persisted page, consumable by a renderer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocalHandle(PathBuf);

impl LocalHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

/// Storage backend for page bytes.
pub trait PageStore: Send + Sync {
    /// Write `data` for `key`, returning its handle.
    fn persist(&self, key: &CacheKey, data: &[u8]) -> PageResult<LocalHandle>;

    /// Delete the object behind `handle`. A missing object is not an error.
    fn release(&self, handle: &LocalHandle) -> io::Result<()>;

    /// Release without surfacing failures; they are logged and dropped.
    fn release_logged(&self, handle: &LocalHandle) {
        if let Err(e) = self.release(handle) {
            warn!(path = %handle.path().display(), error = %e, "Failed to release page");
        }
    }
}

/// Page store backed by a directory on disk.
#[derive(Debug, Clone)]
pub struct DiskPageStore {
    root: PathBuf,
}

impl DiskPageStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Deterministic handle for a key, whether or not it has been written.
    pub fn handle_for(&self, key: &CacheKey) -> LocalHandle {
        LocalHandle::new(self.root.join(page_file_name(key)))
    }

    /// Remove every page file in the store directory.
    ///
    /// Returns how many files were removed.
    pub fn purge(&self) -> io::Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(PAGE_FILE_PREFIX) {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        debug!(root = %self.root.display(), removed, "Purged page store");
        Ok(removed)
    }
}

impl PageStore for DiskPageStore {
    fn persist(&self, key: &CacheKey, data: &[u8]) -> PageResult<LocalHandle> {
        let handle = self.handle_for(key);
        let mut tmp = handle.path().as_os_str().to_owned();
        tmp.push(TEMP_SUFFIX);
        let tmp = PathBuf::from(tmp);

        // Write then rename so a renderer never opens a half-written page
        let written = fs::write(&tmp, data).and_then(|()| fs::rename(&tmp, handle.path()));
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(PageError::storage(key, e));
        }
        Ok(handle)
    }

    fn release(&self, handle: &LocalHandle) -> io::Result<()> {
        match fs::remove_file(handle.path()) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

/// `page-{chapter}-{index}` with the chapter id escaped so any string maps
/// to a single flat, unique file name.
fn page_file_name(key: &CacheKey) -> String {
    let mut name = String::with_capacity(PAGE_FILE_PREFIX.len() + key.chapter_id.len() + 8);
    name.push_str(PAGE_FILE_PREFIX);
    for byte in key.chapter_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            name.push(byte as char);
        } else {
            let _ = write!(name, "%{byte:02X}");
        }
    }
    let _ = write!(name, "-{}", key.page_index);
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_name_plain() {
        let key = CacheKey::new("chapter_42", 3);
        assert_eq!(page_file_name(&key), "page-chapter_42-3");
    }

    #[test]
    fn test_file_name_escapes_path_characters() {
        let key = CacheKey::new("../etc/passwd", 0);
        let name = page_file_name(&key);
        assert_eq!(name, "page-%2E%2E%2Fetc%2Fpasswd-0");
        assert!(!name.contains('/'));
    }

    #[test]
    fn test_file_names_are_distinct() {
        let a = page_file_name(&CacheKey::new("a-1", 2));
        let b = page_file_name(&CacheKey::new("a", 12));
        let c = page_file_name(&CacheKey::new("a%2D1", 2));
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_persist_writes_bytes() {
        let temp = TempDir::new().unwrap();
        let store = DiskPageStore::open(temp.path()).unwrap();
        let key = CacheKey::new("ch", 1);

        let handle = store.persist(&key, b"image-bytes").unwrap();

        assert_eq!(handle, store.handle_for(&key));
        assert_eq!(fs::read(handle.path()).unwrap(), b"image-bytes");
    }

    #[test]
    fn test_persist_same_key_overwrites() {
        let temp = TempDir::new().unwrap();
        let store = DiskPageStore::open(temp.path()).unwrap();
        let key = CacheKey::new("ch", 1);

        let first = store.persist(&key, b"old").unwrap();
        let second = store.persist(&key, b"new").unwrap();

        assert_eq!(first, second);
        assert_eq!(fs::read(second.path()).unwrap(), b"new");
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_persist_into_missing_dir_is_storage_error() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("gone");
        let store = DiskPageStore::open(&root).unwrap();
        fs::remove_dir_all(&root).unwrap();

        let result = store.persist(&CacheKey::new("ch", 0), b"x");
        assert!(matches!(result, Err(PageError::Storage { .. })));
    }

    #[test]
    fn test_release_removes_file() {
        let temp = TempDir::new().unwrap();
        let store = DiskPageStore::open(temp.path()).unwrap();
        let handle = store.persist(&CacheKey::new("ch", 0), b"x").unwrap();

        store.release(&handle).unwrap();
        assert!(!handle.path().exists());

        // Releasing twice is fine
        store.release(&handle).unwrap();
    }

    #[test]
    fn test_purge_only_touches_page_files() {
        let temp = TempDir::new().unwrap();
        let store = DiskPageStore::open(temp.path()).unwrap();
        store.persist(&CacheKey::new("ch", 0), b"x").unwrap();
        store.persist(&CacheKey::new("ch", 1), b"y").unwrap();
        fs::write(temp.path().join("unrelated.txt"), b"keep").unwrap();

        assert_eq!(store.purge().unwrap(), 2);
        assert!(temp.path().join("unrelated.txt").exists());
    }
}
