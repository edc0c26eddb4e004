//! Byte-range readers for part files.
//!
//! [`BlockLoader::open`] dispatches on the location scheme:
//!
//! - `http://` / `https://` -- range requests through one pooled client
//!   shared by the whole loader
//! - anything else -- a local path, served from a cached per-path
//!   [`FileReaderFactory`]
//!
//! Every reader is registered with the calling query's [`HandleTracker`].

pub mod file;
pub mod handles;
pub mod http;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use reqwest::blocking::Client;
use tracing::{debug, info};

use crate::config::HttpConfig;
use crate::error::Result;
use crate::metrics::LoaderMetrics;

pub use file::{FileRangeReader, FileReaderFactory};
pub use handles::{HandleTracker, TrackedHandle};
pub use http::{ConnectionGate, HttpRangeReader};

/// A seekable reader over one part location.
pub trait RangeReader: Send {
    /// The location this reader was opened for.
    fn location(&self) -> &str;

    /// Position the reader at `offset`.
    fn seek(&mut self, offset: u64) -> Result<()>;

    /// Read up to `max_len` bytes starting at `offset`.
    fn read_range(&mut self, offset: u64, max_len: u64) -> Result<Vec<u8>>;

    /// Release the reader. Idempotent.
    fn close(&mut self);

    /// False once closed, either directly or by a forced sweep.
    fn is_open(&self) -> bool;
}

/// True for locations served over HTTP.
pub fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Opens readers for part locations. Shared across queries.
pub struct BlockLoader {
    http_config: HttpConfig,
    client: Mutex<Option<Client>>,
    gate: Arc<ConnectionGate>,
    host_gates: Mutex<HashMap<String, Arc<ConnectionGate>>>,
    files: Mutex<HashMap<String, Arc<FileReaderFactory>>>,
    metrics: Arc<LoaderMetrics>,
}

impl BlockLoader {
    pub fn new(http_config: HttpConfig) -> Self {
        let gate = Arc::new(ConnectionGate::new(http_config.max_total_connections));
        Self {
            http_config,
            client: Mutex::new(None),
            gate,
            host_gates: Mutex::new(HashMap::new()),
            files: Mutex::new(HashMap::new()),
            metrics: Arc::new(LoaderMetrics::new()),
        }
    }

    pub fn metrics(&self) -> &Arc<LoaderMetrics> {
        &self.metrics
    }

    pub fn http_config(&self) -> &HttpConfig {
        &self.http_config
    }

    /// Open a reader for `location`, registered with `handles`.
    pub fn open(
        &self,
        location: &str,
        handles: &Arc<HandleTracker>,
    ) -> Result<Box<dyn RangeReader>> {
        let reader: Box<dyn RangeReader> = if is_remote(location) {
            let client = self.http_client()?;
            Box::new(HttpRangeReader::new(
                location,
                client,
                Arc::clone(&self.gate),
                self.host_gate(location),
                self.http_config.connect_timeout(),
                handles.register(location),
            ))
        } else {
            let factory = self.file_factory(location);
            Box::new(factory.reader(location, handles.register(location)))
        };
        self.metrics.record_reader_opened();
        debug!(location, "Opened reader");
        Ok(reader)
    }

    /// Drop the cached factory for a local path. Readers already opened
    /// from it keep working. Returns true if a factory was cached.
    pub fn close_location(&self, location: &str) -> bool {
        let removed = self.files.lock().unwrap().remove(location).is_some();
        if removed {
            info!(location, "Closed cached part location");
        }
        removed
    }

    /// Paths with a cached file factory, sorted.
    pub fn cached_locations(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.files.lock().unwrap().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Request gate shared by every location on the same `host:port`.
    pub fn host_gate(&self, location: &str) -> Arc<ConnectionGate> {
        let mut gates = self.host_gates.lock().unwrap();
        Arc::clone(gates.entry(http::host_key(location)).or_insert_with(|| {
            Arc::new(ConnectionGate::new(self.http_config.max_host_connections))
        }))
    }

    fn file_factory(&self, path: &str) -> Arc<FileReaderFactory> {
        let mut files = self.files.lock().unwrap();
        Arc::clone(
            files
                .entry(path.to_string())
                .or_insert_with(|| Arc::new(FileReaderFactory::new(path))),
        )
    }

    fn http_client(&self) -> Result<Client> {
        let mut client = self.client.lock().unwrap();
        if let Some(existing) = client.as_ref() {
            return Ok(existing.clone());
        }
        let built = http::build_client(&self.http_config)?;
        *client = Some(built.clone());
        Ok(built)
    }
}

impl Default for BlockLoader {
    fn default() -> Self {
        Self::new(HttpConfig::default())
    }
}
