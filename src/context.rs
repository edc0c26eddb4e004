//! QueryContext - per-query state
//!
//! Created when a lookup starts and carried by every stage of its stream.
//! Owns the query's open-handle set, so a front-end can inspect or sweep
//! the readers a query left open without any thread-local state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::QueryParams;
use crate::loader::HandleTracker;

/// Unique id assigned to each query.
pub type QueryId = u64;

static NEXT_QUERY_ID: AtomicU64 = AtomicU64::new(1);

/// State shared by the stages of one query.
#[derive(Debug)]
pub struct QueryContext {
    pub id: QueryId,
    pub params: QueryParams,
    handles: Arc<HandleTracker>,
    started: Instant,
}

impl QueryContext {
    pub fn new(params: QueryParams) -> Self {
        Self {
            id: NEXT_QUERY_ID.fetch_add(1, Ordering::Relaxed),
            params,
            handles: Arc::new(HandleTracker::new()),
            started: Instant::now(),
        }
    }

    pub fn handles(&self) -> &Arc<HandleTracker> {
        &self.handles
    }

    pub fn open_handles(&self) -> usize {
        self.handles.open_count()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}
