//! Configuration for the zipnum read path.
//!
//! Three layers, all JSON-loadable with serde defaults:
//!
//! - [`HttpConfig`] -- connection pool settings for remote part locations
//! - [`QueryParams`] -- per-query knobs passed through from front-ends
//! - [`IndexConfig`] -- where the summary / location files live and how
//!   often the location file is re-checked
//!
//! ```text
//! {
//!   "summary_path": "/data/cdx/ALL.summary",
//!   "loc_path": "/data/cdx/ALL.loc",
//!   "check_interval_ms": 30000,
//!   "http": { "max_host_connections": 5 },
//!   "params": { "max_aggregate_blocks": 4 }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};

/// Default number of CDX lines written per gzip member by the index builder.
pub const DEFAULT_CDX_LINES_PER_BLOCK: u64 = 3000;

/// Default location-file polling interval.
pub const DEFAULT_CHECK_INTERVAL_MS: u64 = 30_000;

/// Default suffix appended to a part id by the static resolver.
pub const DEFAULT_PART_SUFFIX: &str = ".gz";

// ── HTTP Config ────────────────────────────────────────────────────

/// Pooled HTTP client settings used by the block loader.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HttpConfig {
    /// Upper bound on concurrent requests to one host, and the idle
    /// connections kept per host when `keep_alive` is on. 0 means unlimited.
    pub max_host_connections: usize,
    /// Upper bound on concurrently open HTTP readers across all hosts.
    pub max_total_connections: usize,
    /// TCP connect timeout.
    pub connect_timeout_ms: u64,
    /// Whole-request read timeout.
    pub read_timeout_ms: u64,
    /// Enable TCP keep-alive on pooled connections.
    pub keep_alive: bool,
    /// Drop idle pooled connections before reuse instead of trusting them.
    pub stale_check: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_host_connections: 5,
            max_total_connections: 500,
            connect_timeout_ms: 10_000,
            read_timeout_ms: 10_000,
            keep_alive: true,
            stale_check: false,
        }
    }
}

impl HttpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

// ── Query Params ───────────────────────────────────────────────────

/// Immutable per-query configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QueryParams {
    /// Maximum number of contiguous summary entries merged into one read.
    /// Values <= 0 disable the cap.
    pub max_aggregate_blocks: i32,
    /// Maximum number of summary entries (blocks) a query may touch.
    /// 0 means unbounded.
    pub max_blocks: i32,
    /// Collapse summary entries whose timestamps share this many leading
    /// digits. 0 disables collapsing.
    pub timestamp_dedup_length: i32,
    /// With `timestamp_dedup_length` set, also collapse CDX lines sharing
    /// urlkey and those timestamp digits, keeping the lowest HTTP status.
    pub best_status_dedup: bool,
    /// Passed through to front-ends; the engine always scans forward.
    pub reverse: bool,
}

impl Default for QueryParams {
    fn default() -> Self {
        Self {
            max_aggregate_blocks: 1,
            max_blocks: 0,
            timestamp_dedup_length: 0,
            best_status_dedup: false,
            reverse: false,
        }
    }
}

impl QueryParams {
    pub fn with_max_aggregate_blocks(mut self, n: i32) -> Self {
        self.max_aggregate_blocks = n;
        self
    }

    pub fn with_max_blocks(mut self, n: i32) -> Self {
        self.max_blocks = n;
        self
    }

    pub fn with_timestamp_dedup_length(mut self, n: i32) -> Self {
        self.timestamp_dedup_length = n;
        self
    }

    pub fn with_best_status_dedup(mut self, enabled: bool) -> Self {
        self.best_status_dedup = enabled;
        self
    }

    pub fn with_reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }
}

// ── Index Config ───────────────────────────────────────────────────

/// Top-level configuration for opening an index or cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IndexConfig {
    /// Sorted summary file (one line per gzip block).
    pub summary_path: PathBuf,
    /// Location table (`ALL.loc`). When set, the index is opened as a cluster.
    pub loc_path: Option<PathBuf>,
    /// How often the location file's modification time is polled.
    /// 0 disables background reloading.
    pub check_interval_ms: u64,
    /// CDX lines per gzip member, used for size estimation only.
    pub cdx_lines_per_block: u64,
    /// Suffix used by the static `<summary dir>/<part><suffix>` resolver.
    pub part_suffix: String,
    pub http: HttpConfig,
    /// Defaults applied by front-ends that don't supply their own params.
    pub params: QueryParams,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            summary_path: PathBuf::new(),
            loc_path: None,
            check_interval_ms: DEFAULT_CHECK_INTERVAL_MS,
            cdx_lines_per_block: DEFAULT_CDX_LINES_PER_BLOCK,
            part_suffix: DEFAULT_PART_SUFFIX.to_string(),
            http: HttpConfig::default(),
            params: QueryParams::default(),
        }
    }
}

impl IndexConfig {
    /// Config for a plain (non-cluster) index over `summary_path`.
    pub fn new(summary_path: impl Into<PathBuf>) -> Self {
        Self {
            summary_path: summary_path.into(),
            ..Self::default()
        }
    }

    /// Read config from a JSON file.
    pub fn read_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Write config as pretty JSON.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.summary_path.as_os_str().is_empty() {
            return Err(IndexError::InvalidConfig(
                "summary_path must not be empty".to_string(),
            ));
        }
        if self.cdx_lines_per_block == 0 {
            return Err(IndexError::InvalidConfig(
                "cdx_lines_per_block must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}

// ── Tests ──────────────────────────────────────────────────────────
