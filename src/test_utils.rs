//! Shared test helpers.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Once;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use tracing_subscriber::EnvFilter;

use crate::cache::CacheKey;
use crate::error::{PageError, PageResult};
use crate::fetcher::PageFetcher;

/// Install a test-friendly tracing subscriber once per process.
pub(crate) fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("pagecache_core=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Poll `cond` until it holds or `timeout` elapses.
pub(crate) fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Fake remote backend that records every call.
///
/// A gated fetcher parks each call until `open_gate()`, which lets tests
/// pile up concurrent callers behind a single outstanding fetch.
pub(crate) struct MockFetcher {
    calls: AtomicUsize,
    keys: Mutex<Vec<CacheKey>>,
    credentials: Mutex<Vec<String>>,
    failing: AtomicBool,
    panicking: AtomicBool,
    gate_open: Mutex<bool>,
    gate: Condvar,
}

impl MockFetcher {
    pub(crate) fn new() -> Self {
        Self::with_gate(true)
    }

    pub(crate) fn gated() -> Self {
        Self::with_gate(false)
    }

    fn with_gate(open: bool) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            keys: Mutex::new(Vec::new()),
            credentials: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            panicking: AtomicBool::new(false),
            gate_open: Mutex::new(open),
            gate: Condvar::new(),
        }
    }

    /// Bytes served for `key`.
    pub(crate) fn body_for(key: &CacheKey) -> Vec<u8> {
        format!("image:{key}").into_bytes()
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn set_panicking(&self, panicking: bool) {
        self.panicking.store(panicking, Ordering::SeqCst);
    }

    pub(crate) fn open_gate(&self) {
        *self.gate_open.lock() = true;
        self.gate.notify_all();
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn calls_for(&self, key: &CacheKey) -> usize {
        self.keys.lock().iter().filter(|k| *k == key).count()
    }

    /// Keys in the order they were requested.
    pub(crate) fn keys(&self) -> Vec<CacheKey> {
        self.keys.lock().clone()
    }

    pub(crate) fn credentials(&self) -> Vec<String> {
        self.credentials.lock().clone()
    }
}

impl PageFetcher for MockFetcher {
    fn fetch(&self, key: &CacheKey, credential: &str) -> PageResult<Bytes> {
        self.keys.lock().push(key.clone());
        self.credentials.lock().push(credential.to_string());
        self.calls.fetch_add(1, Ordering::SeqCst);

        {
            let mut open = self.gate_open.lock();
            while !*open {
                self.gate.wait(&mut open);
            }
        }

        if self.panicking.load(Ordering::SeqCst) {
            panic!("mock fetcher panic for {key}");
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(PageError::fetch(key, "HTTP 503"));
        }
        Ok(Bytes::from(Self::body_for(key)))
    }
}
