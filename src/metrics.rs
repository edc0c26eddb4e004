//! Loader metrics for the zipnum read path
//!
//! Lightweight, thread-safe counters shared by every reader a
//! [`BlockLoader`](crate::loader::BlockLoader) opens. One instance per
//! loader, wrapped in `Arc`.
//!
//! Tracks:
//! - readers opened and blocks fetched
//! - failovers (a location failed, the next one was tried)
//! - blocks lost (every location for a part failed)
//! - bytes read, split by file and HTTP backends
//! - a rolling window of block fetch latencies for percentiles
//!
//! # Example
//!
//! ```
//! use zipnum::metrics::LoaderMetrics;
//!
//! let metrics = LoaderMetrics::new();
//! metrics.record_fetch(4096, false, 3);
//! assert_eq!(metrics.snapshot().blocks_fetched, 1);
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use serde::Serialize;

/// Number of recent block fetch latencies retained for percentiles.
const LATENCY_WINDOW_SIZE: usize = 1000;

/// Block fetches slower than this are counted as slow.
pub const SLOW_FETCH_THRESHOLD_MS: u64 = 500;

/// Thread-safe counters for block loading.
pub struct LoaderMetrics {
    readers_opened: AtomicU64,
    blocks_fetched: AtomicU64,
    failovers: AtomicU64,
    blocks_lost: AtomicU64,
    file_bytes_read: AtomicU64,
    http_bytes_read: AtomicU64,
    slow_fetches: AtomicU64,

    /// Recent fetch latencies (ms).
    latencies_ms: Mutex<VecDeque<u64>>,

    started_at: Instant,
}

/// Point-in-time copy of [`LoaderMetrics`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LoaderStats {
    pub readers_opened: u64,
    pub blocks_fetched: u64,
    pub failovers: u64,
    pub blocks_lost: u64,
    pub file_bytes_read: u64,
    pub http_bytes_read: u64,
    pub slow_fetches: u64,
    pub fetch_p50_ms: u64,
    pub fetch_p99_ms: u64,
    pub uptime_secs: u64,
}

impl Default for LoaderMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl LoaderMetrics {
    pub fn new() -> Self {
        Self {
            readers_opened: AtomicU64::new(0),
            blocks_fetched: AtomicU64::new(0),
            failovers: AtomicU64::new(0),
            blocks_lost: AtomicU64::new(0),
            file_bytes_read: AtomicU64::new(0),
            http_bytes_read: AtomicU64::new(0),
            slow_fetches: AtomicU64::new(0),
            latencies_ms: Mutex::new(VecDeque::with_capacity(LATENCY_WINDOW_SIZE)),
            started_at: Instant::now(),
        }
    }

    pub fn record_reader_opened(&self) {
        self.readers_opened.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful block read of `bytes` bytes.
    pub fn record_fetch(&self, bytes: u64, remote: bool, duration_ms: u64) {
        self.blocks_fetched.fetch_add(1, Ordering::Relaxed);
        if remote {
            self.http_bytes_read.fetch_add(bytes, Ordering::Relaxed);
        } else {
            self.file_bytes_read.fetch_add(bytes, Ordering::Relaxed);
        }
        if duration_ms >= SLOW_FETCH_THRESHOLD_MS {
            self.slow_fetches.fetch_add(1, Ordering::Relaxed);
        }

        let mut latencies = self.latencies_ms.lock().unwrap();
        if latencies.len() >= LATENCY_WINDOW_SIZE {
            latencies.pop_front();
        }
        latencies.push_back(duration_ms);
    }

    pub fn record_failover(&self) {
        self.failovers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_block_lost(&self) {
        self.blocks_lost.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LoaderStats {
        let (p50, p99) = {
            let latencies = self.latencies_ms.lock().unwrap();
            let mut sorted: Vec<u64> = latencies.iter().copied().collect();
            sorted.sort_unstable();
            (percentile(&sorted, 50), percentile(&sorted, 99))
        };

        LoaderStats {
            readers_opened: self.readers_opened.load(Ordering::Relaxed),
            blocks_fetched: self.blocks_fetched.load(Ordering::Relaxed),
            failovers: self.failovers.load(Ordering::Relaxed),
            blocks_lost: self.blocks_lost.load(Ordering::Relaxed),
            file_bytes_read: self.file_bytes_read.load(Ordering::Relaxed),
            http_bytes_read: self.http_bytes_read.load(Ordering::Relaxed),
            slow_fetches: self.slow_fetches.load(Ordering::Relaxed),
            fetch_p50_ms: p50,
            fetch_p99_ms: p99,
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }
}

/// Nearest-rank percentile of sorted values. Empty input gives 0.
fn percentile(sorted: &[u64], p: usize) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = (sorted.len() * p / 100).min(sorted.len() - 1);
    sorted[idx]
}
