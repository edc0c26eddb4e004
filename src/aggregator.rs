//! Block aggregation and fetch.
//!
//! Consumes a sorted stream of [`SummaryEntry`] values, merges runs of
//! contiguous entries (same part, each block starting where the previous
//! one ends) into a single [`Block`] read, and fetches it from the first
//! location of the part that answers.
//!
//! A run grows while all of the following hold:
//!
//! - `max_aggregate_blocks <= 0` or the run is shorter than it
//! - `max_blocks <= 0` or the blocks taken so far plus the run stay below it
//! - the next entry is contiguous with the last one in the run
//!
//! Each fetched block yields [`BlockFetch::Found`] with a line reader over
//! its decompressed members. A block no location could serve yields
//! [`BlockFetch::Unavailable`]; its lines are lost and the scan goes on.

use std::io::{BufRead, BufReader, Cursor};
use std::sync::Arc;
use std::time::Instant;

use flate2::bufread::MultiGzDecoder;
use tracing::{debug, error, warn};

use crate::config::QueryParams;
use crate::error::{IndexError, Result};
use crate::loader::{is_remote, BlockLoader, HandleTracker, RangeReader};
use crate::stream::CloseableIterator;
use crate::summary::SummaryEntry;

/// Maps a part id to its candidate locations, in failover order.
pub trait LocationResolver: Send + Sync {
    fn locations(&self, part_id: &str) -> Vec<String>;
}

impl<F> LocationResolver for F
where
    F: Fn(&str) -> Vec<String> + Send + Sync,
{
    fn locations(&self, part_id: &str) -> Vec<String> {
        self(part_id)
    }
}

// ── Block ──────────────────────────────────────────────────────────

/// A contiguous byte range covering one or more summary entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub part_id: String,
    pub start_offset: u64,
    pub total_length: u64,
    pub entry_count: usize,
}

impl Block {
    fn starting_at(entry: &SummaryEntry) -> Self {
        Self {
            part_id: entry.part_id.clone(),
            start_offset: entry.offset,
            total_length: u64::from(entry.length),
            entry_count: 1,
        }
    }

    fn extend(&mut self, entry: &SummaryEntry) {
        self.total_length += u64::from(entry.length);
        self.entry_count += 1;
    }

    pub fn end_offset(&self) -> u64 {
        self.start_offset + self.total_length
    }
}

/// Result of fetching one block.
pub enum BlockFetch {
    Found(BlockLines),
    Unavailable { block: Block, reason: String },
}

// ── Aggregator ─────────────────────────────────────────────────────

pub struct BlockAggregator<I> {
    entries: I,
    lookahead: Option<SummaryEntry>,
    max_aggregate_blocks: i32,
    max_blocks: i32,
    blocks_so_far: i64,
    loader: Arc<BlockLoader>,
    resolver: Arc<dyn LocationResolver>,
    handles: Arc<HandleTracker>,
    done: bool,
}

impl<I> BlockAggregator<I>
where
    I: CloseableIterator<Item = SummaryEntry>,
{
    pub fn new(
        entries: I,
        params: &QueryParams,
        loader: Arc<BlockLoader>,
        resolver: Arc<dyn LocationResolver>,
        handles: Arc<HandleTracker>,
    ) -> Self {
        Self {
            entries,
            lookahead: None,
            max_aggregate_blocks: params.max_aggregate_blocks,
            max_blocks: params.max_blocks,
            blocks_so_far: 0,
            loader,
            resolver,
            handles,
            done: false,
        }
    }

    /// Number of summary entries consumed into runs so far.
    pub fn blocks_so_far(&self) -> i64 {
        self.blocks_so_far
    }

    fn run_may_grow(&self, run: i64) -> bool {
        let under_aggregate = self.max_aggregate_blocks <= 0 || run < i64::from(self.max_aggregate_blocks);
        let under_total =
            self.max_blocks <= 0 || self.blocks_so_far + run < i64::from(self.max_blocks);
        under_aggregate && under_total
    }

    /// Next aggregated run, without fetching it.
    pub fn next_run(&mut self) -> Option<Block> {
        if self.done {
            return None;
        }
        if self.max_blocks > 0 && self.blocks_so_far >= i64::from(self.max_blocks) {
            self.finish();
            return None;
        }

        let first = match self.lookahead.take().or_else(|| self.entries.next()) {
            Some(entry) => entry,
            None => {
                self.finish();
                return None;
            }
        };

        let mut block = Block::starting_at(&first);
        let mut last = first;
        let mut run = 1i64;
        while self.run_may_grow(run) {
            let Some(next) = self.entries.next() else {
                break;
            };
            if !last.is_contiguous_with(&next) {
                self.lookahead = Some(next);
                break;
            }
            block.extend(&next);
            last = next;
            run += 1;
        }

        self.blocks_so_far += run;
        Some(block)
    }

    /// Fetch `block` from the first of its part's locations that answers.
    pub fn fetch(&self, block: Block) -> BlockFetch {
        let locations = self.resolver.locations(&block.part_id);
        let metrics = self.loader.metrics();
        let mut reason = format!("no locations for part '{}'", block.part_id);

        for (i, location) in locations.iter().enumerate() {
            let started = Instant::now();
            match self.read_block(location, &block) {
                Ok((reader, bytes)) => {
                    metrics.record_fetch(
                        bytes.len() as u64,
                        is_remote(location),
                        started.elapsed().as_millis() as u64,
                    );
                    debug!(
                        part = %block.part_id,
                        location = %location,
                        offset = block.start_offset,
                        length = block.total_length,
                        entries = block.entry_count,
                        "Fetched block"
                    );
                    return BlockFetch::Found(BlockLines::new(reader, bytes));
                }
                Err(e) => {
                    warn!(
                        part = %block.part_id,
                        location = %location,
                        error = %e,
                        "Location failed for block"
                    );
                    if i + 1 < locations.len() {
                        metrics.record_failover();
                    }
                    reason = e.to_string();
                }
            }
        }

        let err = IndexError::LocationUnavailable {
            part: block.part_id.clone(),
            reason,
        };
        error!(
            part = %block.part_id,
            offset = block.start_offset,
            length = block.total_length,
            candidates = locations.len(),
            error = %err,
            "All locations failed, block lines lost"
        );
        metrics.record_block_lost();
        BlockFetch::Unavailable {
            block,
            reason: err.to_string(),
        }
    }

    fn read_block(&self, location: &str, block: &Block) -> Result<(Box<dyn RangeReader>, Vec<u8>)> {
        let mut reader = self.loader.open(location, &self.handles)?;
        let read = reader
            .seek(block.start_offset)
            .and_then(|_| reader.read_range(block.start_offset, block.total_length));
        match read {
            Ok(bytes) => Ok((reader, bytes)),
            Err(e) => {
                reader.close();
                Err(e)
            }
        }
    }

    fn finish(&mut self) {
        if !self.done {
            self.done = true;
            self.lookahead = None;
            self.entries.close();
        }
    }
}

impl<I> Iterator for BlockAggregator<I>
where
    I: CloseableIterator<Item = SummaryEntry>,
{
    type Item = BlockFetch;

    fn next(&mut self) -> Option<BlockFetch> {
        let block = self.next_run()?;
        Some(self.fetch(block))
    }
}

impl<I> CloseableIterator for BlockAggregator<I>
where
    I: CloseableIterator<Item = SummaryEntry>,
{
    fn close(&mut self) {
        self.finish();
    }
}

// ── Block Lines ────────────────────────────────────────────────────

/// Lines of one fetched block, decoded across all of its gzip members.
///
/// Owns the reader the block was fetched with until the lines run out,
/// the block is closed, or the reader is force-closed by a sweep.
pub struct BlockLines {
    decoder: Option<BufReader<MultiGzDecoder<Cursor<Vec<u8>>>>>,
    reader: Option<Box<dyn RangeReader>>,
    location: String,
}

impl BlockLines {
    pub fn new(reader: Box<dyn RangeReader>, bytes: Vec<u8>) -> Self {
        Self {
            decoder: Some(BufReader::new(MultiGzDecoder::new(Cursor::new(bytes)))),
            location: reader.location().to_string(),
            reader: Some(reader),
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn is_open(&self) -> bool {
        self.reader.as_ref().is_some_and(|r| r.is_open())
    }
}

impl Iterator for BlockLines {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if !self.is_open() {
            if self.reader.is_some() {
                debug!(location = %self.location, "Block reader closed before exhaustion");
            }
            self.close();
            return None;
        }
        let decoder = self.decoder.as_mut()?;
        let mut buf = Vec::new();
        match decoder.read_until(b'\n', &mut buf) {
            Ok(0) => {
                self.close();
                None
            }
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n') | Some(b'\r')) {
                    buf.pop();
                }
                Some(String::from_utf8_lossy(&buf).into_owned())
            }
            Err(e) => {
                warn!(location = %self.location, error = %e, "Block decode failed, dropping rest of block");
                self.close();
                None
            }
        }
    }
}

impl CloseableIterator for BlockLines {
    fn close(&mut self) {
        self.decoder = None;
        if let Some(mut reader) = self.reader.take() {
            reader.close();
        }
    }
}

impl Drop for BlockLines {
    fn drop(&mut self) {
        self.close();
    }
}

// ── Tests ──────────────────────────────────────────────────────────
