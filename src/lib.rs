//! zipnum - read path for sharded, block-compressed CDX indexes
//!
//! A zipnum index stores sorted CDX lines (web archive captures) in part
//! files made of independently gzip-compressed blocks. A sorted summary
//! file holds one line per block: the block's first key, its part, byte
//! offset, length and a running line count. Lookups binary-search the
//! summary, fetch only the blocks that can match (merging adjacent ones
//! into single range reads), and stream the decompressed lines back in
//! key order.
//!
//! ```no_run
//! use zipnum::{CdxIndex, IndexConfig, KeyRange};
//!
//! let index = zipnum::open(&IndexConfig::new("/data/cdx/ALL.summary"))?;
//! let params = index.default_params();
//! for line in index.lookup_prefix("com,example)/", "com,example)/", true, &params) {
//!     println!("{line}");
//! }
//! # Ok::<(), zipnum::IndexError>(())
//! ```

pub mod aggregator;
pub mod cluster;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod filters;
pub mod flatten;
pub mod loader;
pub mod metrics;
pub mod sorted_file;
pub mod stream;
pub mod summary;

pub use aggregator::{Block, BlockAggregator, BlockFetch, BlockLines, LocationResolver};
pub use cluster::{ClusterState, DateRange, LocationTable, ZipNumCluster};
pub use config::{HttpConfig, IndexConfig, QueryParams};
pub use context::QueryContext;
pub use engine::{CdxIndex, CdxLines, KeyRange, Page, StaticLocations, ZipNumIndex};
pub use error::{IndexError, Result};
pub use flatten::LineFlattener;
pub use loader::{BlockLoader, HandleTracker, RangeReader};
pub use metrics::{LoaderMetrics, LoaderStats};
pub use sorted_file::SortedTextFile;
pub use stream::{BoxedStream, CloseableExt, CloseableIterator};
pub use summary::SummaryEntry;

/// Open the index described by `config`: a [`ZipNumCluster`] when a
/// location table is configured, a plain [`ZipNumIndex`] otherwise.
pub fn open(config: &IndexConfig) -> Result<Box<dyn CdxIndex>> {
    if config.loc_path.is_some() {
        Ok(Box::new(ZipNumCluster::open(config)?))
    } else {
        Ok(Box::new(ZipNumIndex::open(config)?))
    }
}
