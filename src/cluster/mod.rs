//! ZipNumCluster: a zipnum index whose parts live wherever the location
//! table says.
//!
//! Wraps a [`ZipNumIndex`] and adds:
//!
//! - part resolution through the live location table
//! - capture-date gating from the table's `_EARLIEST` / `_LATEST`
//! - an `OFF` switch
//! - a background thread that reloads the table when the file changes
//!
//! Lifecycle: `Loading -> Active | Disabled`. A reload that reads `OFF` or
//! fails disables the cluster until a later reload succeeds. If the very
//! first load fails the cluster stays disabled for good and no reload
//! thread is started.

pub mod dates;
pub mod locations;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use tracing::{error, info, warn};

use crate::config::{IndexConfig, QueryParams};
use crate::engine::{CdxIndex, CdxLines, KeyRange, Page, ZipNumIndex};
use crate::error::{IndexError, Result};
use crate::loader::BlockLoader;
use crate::sorted_file::SortedTextFile;

pub use dates::DateRange;
pub use locations::{LiveLocations, LocationTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterState {
    Loading,
    Active,
    Disabled,
}

/// Change signature of the location file.
type FileStamp = (Option<SystemTime>, u64);

// ── Shared State ───────────────────────────────────────────────────

/// State shared between the cluster and its reload thread.
struct Shared {
    loc_path: PathBuf,
    live: Arc<LiveLocations>,
    loader: Arc<BlockLoader>,
    state: RwLock<ClusterState>,
    /// Set when the first load failed; the cluster never recovers.
    load_failed: AtomicBool,
    last_stamp: Mutex<Option<FileStamp>>,
    /// Held for a whole stat, load, publish and close sequence.
    reload_lock: Mutex<()>,
}

impl Shared {
    fn state(&self) -> ClusterState {
        *self.state.read().unwrap()
    }

    fn set_state(&self, state: ClusterState) {
        *self.state.write().unwrap() = state;
    }

    fn stamp(&self) -> Result<FileStamp> {
        let meta = std::fs::metadata(&self.loc_path)?;
        Ok((meta.modified().ok(), meta.len()))
    }

    /// Reload the table and swap it in. Locations dropped from a part's
    /// list are closed only after the new table is visible.
    fn reload(&self) -> Result<()> {
        let _guard = self.reload_lock.lock().unwrap();
        self.reload_locked()
    }

    /// Caller holds `reload_lock`.
    fn reload_locked(&self) -> Result<()> {
        if self.load_failed.load(Ordering::Acquire) {
            return Err(IndexError::InvalidConfig(format!(
                "cluster for {} is permanently disabled",
                self.loc_path.display()
            )));
        }

        let stamp = self.stamp();
        let loaded = stamp.and_then(|stamp| Ok((stamp, LocationTable::load(&self.loc_path)?)));
        let (stamp, table) = match loaded {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(path = %self.loc_path.display(), error = %e, "Location table reload failed, disabling cluster");
                self.set_state(ClusterState::Disabled);
                return Err(e);
            }
        };

        let disabled = table.is_disabled();
        let parts = table.len();
        let previous = self.live.snapshot();
        let stale = previous.stale_locations(&table);
        self.live.publish(table);
        *self.last_stamp.lock().unwrap() = Some(stamp);

        for location in &stale {
            self.loader.close_location(location);
        }

        if disabled {
            warn!(path = %self.loc_path.display(), "Location table is OFF, disabling cluster");
            self.set_state(ClusterState::Disabled);
        } else {
            self.set_state(ClusterState::Active);
        }
        info!(
            path = %self.loc_path.display(),
            parts,
            stale = stale.len(),
            disabled,
            "Location table loaded"
        );
        Ok(())
    }

    /// Reload if the file's modification time or size changed.
    fn reload_if_changed(&self) {
        let _guard = self.reload_lock.lock().unwrap();
        let current = match self.stamp() {
            Ok(stamp) => Some(stamp),
            Err(e) => {
                warn!(path = %self.loc_path.display(), error = %e, "Cannot stat location table");
                // Force a reload once the file is back, whatever its stamp.
                *self.last_stamp.lock().unwrap() = None;
                if self.state() != ClusterState::Disabled {
                    self.set_state(ClusterState::Disabled);
                }
                return;
            }
        };
        let changed = *self.last_stamp.lock().unwrap() != current;
        if changed {
            // Failures are logged and reflected in the state.
            let _ = self.reload_locked();
        }
    }
}

// ── Reload Thread ──────────────────────────────────────────────────

/// Background poller, stopped by dropping the shutdown sender.
struct Reloader {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Reloader {
    fn spawn(shared: Arc<Shared>, interval: Duration) -> Result<Self> {
        let (tx, rx) = bounded::<()>(1);
        let handle = std::thread::Builder::new()
            .name("zipnum-loc-reload".to_string())
            .spawn(move || loop {
                match rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => shared.reload_if_changed(),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;
        Ok(Self {
            shutdown: Some(tx),
            handle: Some(handle),
        })
    }
}

impl Drop for Reloader {
    fn drop(&mut self) {
        drop(self.shutdown.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Location reload thread panicked");
            }
        }
    }
}

// ── ZipNumCluster ──────────────────────────────────────────────────

pub struct ZipNumCluster {
    index: ZipNumIndex,
    shared: Arc<Shared>,
    _reloader: Option<Reloader>,
}

impl ZipNumCluster {
    /// Open the summary and location table named by `config`.
    ///
    /// Fails only if the config is invalid or the summary cannot be
    /// opened. A location table that cannot be read leaves the cluster
    /// permanently disabled.
    pub fn open(config: &IndexConfig) -> Result<Self> {
        config.validate()?;
        let loc_path = config.loc_path.clone().ok_or_else(|| {
            IndexError::InvalidConfig("a cluster needs loc_path".to_string())
        })?;
        let summary = SortedTextFile::open(&config.summary_path)?;
        let loader = Arc::new(BlockLoader::new(config.http.clone()));
        let live = Arc::new(LiveLocations::default());

        let index = ZipNumIndex::with_resolver(summary, Arc::clone(&loader), live.clone())
            .with_cdx_lines_per_block(config.cdx_lines_per_block)
            .with_params(config.params);

        let shared = Arc::new(Shared {
            loc_path,
            live,
            loader,
            state: RwLock::new(ClusterState::Loading),
            load_failed: AtomicBool::new(false),
            last_stamp: Mutex::new(None),
            reload_lock: Mutex::new(()),
        });

        if let Err(e) = shared.reload() {
            error!(
                path = %shared.loc_path.display(),
                error = %e,
                "Initial location table load failed, cluster disabled"
            );
            shared.load_failed.store(true, Ordering::Release);
            shared.set_state(ClusterState::Disabled);
            return Ok(Self {
                index,
                shared,
                _reloader: None,
            });
        }

        let reloader = if config.check_interval_ms > 0 {
            Some(Reloader::spawn(Arc::clone(&shared), config.check_interval())?)
        } else {
            None
        };

        Ok(Self {
            index,
            shared,
            _reloader: reloader,
        })
    }

    pub fn state(&self) -> ClusterState {
        self.shared.state()
    }

    pub fn loc_path(&self) -> &Path {
        &self.shared.loc_path
    }

    /// Date window of the current table.
    pub fn date_range(&self) -> DateRange {
        self.shared.live.snapshot().dates()
    }

    /// Current locations of `part_id`, in failover order.
    pub fn locations_for(&self, part_id: &str) -> Vec<String> {
        self.shared
            .live
            .snapshot()
            .locations(part_id)
            .map(<[String]>::to_vec)
            .unwrap_or_default()
    }

    /// Reload the location table now, whether or not it changed.
    pub fn reload_now(&self) -> Result<()> {
        self.shared.reload()
    }

    pub fn index(&self) -> &ZipNumIndex {
        &self.index
    }

    /// False if the cluster is not active or `key`'s capture date falls
    /// outside the table's window. Unparseable dates pass.
    pub fn date_range_check(&self, key: &str) -> bool {
        if self.state() != ClusterState::Active {
            return false;
        }
        self.date_range().admits_key(key)
    }
}

impl CdxIndex for ZipNumCluster {
    fn lookup_le(&self, key: &str, range: &KeyRange, params: &QueryParams) -> CdxLines {
        if !self.date_range_check(key) {
            return CdxLines::empty();
        }
        self.index.lookup_le(key, range, params)
    }

    fn lookup_prefix(&self, key: &str, prefix: &str, exact: bool, params: &QueryParams) -> CdxLines {
        if !self.date_range_check(key) {
            return CdxLines::empty();
        }
        self.index.lookup_prefix(key, prefix, exact, params)
    }

    fn count_lines(&self, range: &KeyRange) -> u64 {
        if !self.date_range_check(&range.start) {
            return 0;
        }
        self.index.count_lines(range)
    }

    fn get_page(
        &self,
        range: &KeyRange,
        page: u64,
        page_size: u64,
        count_only: bool,
        params: &QueryParams,
    ) -> Page {
        if !self.date_range_check(&range.start) {
            return if count_only {
                Page::Count(0)
            } else {
                Page::Lines(CdxLines::empty())
            };
        }
        self.index.get_page(range, page, page_size, count_only, params)
    }

    fn default_params(&self) -> QueryParams {
        self.index.default_params()
    }
}

// ── Tests ──────────────────────────────────────────────────────────
