//! Per-query tracking of open range readers.
//!
//! Every reader registers itself with the [`HandleTracker`] of the query
//! that opened it and deregisters on drop. A front-end that abandons a
//! query can call [`HandleTracker::close_all_open_readers`] to force every
//! still-registered reader closed; those readers then fail their next
//! read with `ReaderClosed`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::warn;

/// Shared state between a registered reader and its tracker.
#[derive(Debug)]
pub struct HandleState {
    location: String,
    opened_at: Instant,
    closed: AtomicBool,
}

impl HandleState {
    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Registry of the readers a single query has open.
#[derive(Debug, Default)]
pub struct HandleTracker {
    next_id: AtomicU64,
    open: Mutex<HashMap<u64, Arc<HandleState>>>,
}

impl HandleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reader for `location`. The returned guard deregisters
    /// it when dropped.
    pub fn register(self: &Arc<Self>, location: &str) -> TrackedHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(HandleState {
            location: location.to_string(),
            opened_at: Instant::now(),
            closed: AtomicBool::new(false),
        });
        self.open.lock().unwrap().insert(id, Arc::clone(&state));
        TrackedHandle {
            id,
            state,
            tracker: Arc::clone(self),
        }
    }

    /// Number of readers currently registered.
    pub fn open_count(&self) -> usize {
        self.open.lock().unwrap().len()
    }

    /// Locations of the currently registered readers.
    pub fn open_locations(&self) -> Vec<String> {
        let open = self.open.lock().unwrap();
        let mut locations: Vec<String> = open.values().map(|s| s.location.clone()).collect();
        locations.sort();
        locations
    }

    /// Force-close every registered reader. Returns how many were closed.
    pub fn close_all_open_readers(&self) -> usize {
        let drained: Vec<Arc<HandleState>> = {
            let mut open = self.open.lock().unwrap();
            open.drain().map(|(_, s)| s).collect()
        };
        for state in &drained {
            warn!(
                location = %state.location,
                open_ms = state.opened_at.elapsed().as_millis() as u64,
                "Force-closing reader left open by query"
            );
            state.mark_closed();
        }
        drained.len()
    }

    fn deregister(&self, id: u64) {
        self.open.lock().unwrap().remove(&id);
    }
}

/// Registration guard held by a reader.
#[derive(Debug)]
pub struct TrackedHandle {
    id: u64,
    state: Arc<HandleState>,
    tracker: Arc<HandleTracker>,
}

impl TrackedHandle {
    pub fn state(&self) -> &HandleState {
        &self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    pub fn mark_closed(&self) {
        self.state.mark_closed();
    }
}

impl Drop for TrackedHandle {
    fn drop(&mut self) {
        self.tracker.deregister(self.id);
    }
}
