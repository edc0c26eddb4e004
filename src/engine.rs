//! Query engine over a zipnum index.
//!
//! A query runs in two stages. First the sorted summary file is binary
//! searched and scanned to get the block entries that can hold matching
//! lines. Then those blocks are fetched, decompressed, and flattened into
//! CDX lines:
//!
//! ```text
//! summary scan -> [dedup] -> [end bound] -> [buffer cap] -> parse
//!     -> BlockAggregator -> LineFlattener -> [start bound] -> [end bound]
//!     -> [best-status dedup]
//! ```
//!
//! Every query returns a [`CdxLines`] stream. Per-block and per-line
//! failures are absorbed (see [`crate::aggregator`]), so the query methods
//! never fail; only opening an index does.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error};

use crate::aggregator::{BlockAggregator, LocationResolver};
use crate::config::{IndexConfig, QueryParams};
use crate::context::{QueryContext, QueryId};
use crate::error::Result;
use crate::filters::{self, cdx_key, summary_key};
use crate::flatten::LineFlattener;
use crate::loader::BlockLoader;
use crate::sorted_file::{FieldExtractor, FieldOrder, SortedTextFile};
use crate::stream::{self, BoxedStream, CloseableExt, CloseableIterator};
use crate::summary::{self, SummaryEntry, LINE_COUNT_FIELD};

/// Appended to a prefix to bound an exact-key lookup. Sorts right after
/// the space separating a urlkey from its timestamp.
pub const EXACT_MATCH_SENTINEL: &str = "!";

// ── Query Types ────────────────────────────────────────────────────

/// Line-level key bounds `[start, end)`. An empty bound is unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyRange {
    pub start: String,
    pub end: String,
}

impl KeyRange {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// Everything from `start` to the end of the index.
    pub fn starting_at(start: impl Into<String>) -> Self {
        Self::new(start, "")
    }

    /// The whole index.
    pub fn all() -> Self {
        Self::default()
    }
}

/// Result of a page request.
pub enum Page {
    /// Number of pages, for `count_only` requests.
    Count(u64),
    Lines(CdxLines),
}

impl Page {
    pub fn count(&self) -> Option<u64> {
        match self {
            Page::Count(n) => Some(*n),
            Page::Lines(_) => None,
        }
    }

    pub fn into_lines(self) -> Option<CdxLines> {
        match self {
            Page::Count(_) => None,
            Page::Lines(lines) => Some(lines),
        }
    }
}

/// Ordered CDX lines produced by one query.
///
/// Closing (or dropping) the stream releases every reader it holds.
pub struct CdxLines {
    inner: BoxedStream<String>,
    ctx: QueryContext,
}

impl CdxLines {
    pub(crate) fn new(inner: BoxedStream<String>, ctx: QueryContext) -> Self {
        Self { inner, ctx }
    }

    /// A stream with no lines.
    pub fn empty() -> Self {
        Self::new(stream::empty().boxed(), QueryContext::new(QueryParams::default()))
    }

    pub fn query_id(&self) -> QueryId {
        self.ctx.id
    }

    pub fn params(&self) -> &QueryParams {
        &self.ctx.params
    }

    /// Readers this query currently holds open.
    pub fn open_handles(&self) -> usize {
        self.ctx.open_handles()
    }

    /// Force-close every reader this query holds. Returns how many were
    /// closed; each is logged as a leak.
    pub fn close_all_open_readers(&self) -> usize {
        self.ctx.handles().close_all_open_readers()
    }
}

impl Iterator for CdxLines {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.inner.next()
    }
}

impl CloseableIterator for CdxLines {
    fn close(&mut self) {
        self.inner.close();
        debug!(query = self.ctx.id, elapsed_ms = self.ctx.elapsed_ms(), "Query closed");
    }
}

/// Queries answered by a zipnum index or cluster.
pub trait CdxIndex: Send + Sync {
    /// Lines in `range`, scanning from the greatest block whose key is
    /// `<= key`.
    fn lookup_le(&self, key: &str, range: &KeyRange, params: &QueryParams) -> CdxLines;

    /// Lines starting at `key` whose key starts with `prefix`. With
    /// `exact`, only lines whose urlkey equals `prefix`.
    fn lookup_prefix(&self, key: &str, prefix: &str, exact: bool, params: &QueryParams) -> CdxLines;

    /// Approximate number of summary lines spanned by `range`.
    fn count_lines(&self, range: &KeyRange) -> u64;

    /// One page of `page_size` summary lines' worth of CDX lines.
    fn get_page(
        &self,
        range: &KeyRange,
        page: u64,
        page_size: u64,
        count_only: bool,
        params: &QueryParams,
    ) -> Page;

    /// Parameters used by front-ends that supply none.
    fn default_params(&self) -> QueryParams;
}

// ── Static Resolution ──────────────────────────────────────────────

/// Resolves a part to `<root>/<part><suffix>`.
#[derive(Debug, Clone)]
pub struct StaticLocations {
    root: PathBuf,
    suffix: String,
}

impl StaticLocations {
    pub fn new(root: impl Into<PathBuf>, suffix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            suffix: suffix.into(),
        }
    }

    /// Parts stored next to the summary file.
    pub fn beside(summary_path: &Path, suffix: &str) -> Self {
        let root = match summary_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Self::new(root, suffix)
    }
}

impl LocationResolver for StaticLocations {
    fn locations(&self, part_id: &str) -> Vec<String> {
        let path = self.root.join(format!("{part_id}{}", self.suffix));
        vec![path.to_string_lossy().into_owned()]
    }
}

// ── ZipNumIndex ────────────────────────────────────────────────────

/// A single zipnum index: a summary file plus its part files.
pub struct ZipNumIndex {
    summary: SortedTextFile,
    loader: Arc<BlockLoader>,
    resolver: Arc<dyn LocationResolver>,
    cdx_lines_per_block: u64,
    params: QueryParams,
}

impl ZipNumIndex {
    /// Open the summary in `config`, resolving parts beside it.
    pub fn open(config: &IndexConfig) -> Result<Self> {
        config.validate()?;
        let summary = SortedTextFile::open(&config.summary_path)?;
        let resolver = StaticLocations::beside(&config.summary_path, &config.part_suffix);
        let loader = Arc::new(BlockLoader::new(config.http.clone()));
        Ok(Self::with_resolver(summary, loader, Arc::new(resolver))
            .with_cdx_lines_per_block(config.cdx_lines_per_block)
            .with_params(config.params))
    }

    pub fn with_resolver(
        summary: SortedTextFile,
        loader: Arc<BlockLoader>,
        resolver: Arc<dyn LocationResolver>,
    ) -> Self {
        Self {
            summary,
            loader,
            resolver,
            cdx_lines_per_block: crate::config::DEFAULT_CDX_LINES_PER_BLOCK,
            params: QueryParams::default(),
        }
    }

    pub fn with_cdx_lines_per_block(mut self, n: u64) -> Self {
        self.cdx_lines_per_block = n;
        self
    }

    pub fn with_params(mut self, params: QueryParams) -> Self {
        self.params = params;
        self
    }

    pub fn summary(&self) -> &SortedTextFile {
        &self.summary
    }

    pub fn loader(&self) -> &Arc<BlockLoader> {
        &self.loader
    }

    pub fn cdx_lines_per_block(&self) -> u64 {
        self.cdx_lines_per_block
    }

    /// Estimated number of CDX lines (captures) in `range`.
    pub fn estimate_captures(&self, range: &KeyRange) -> u64 {
        self.count_lines(range).saturating_mul(self.cdx_lines_per_block)
    }

    /// Raw summary lines of one page, without fetching any block.
    pub fn page_blocks(&self, range: &KeyRange, page: u64, page_size: u64) -> Vec<String> {
        match self.page_span(range, page, page_size) {
            Some((start, end)) => self.summary.lines_between(start, end).collect(),
            None => Vec::new(),
        }
    }

    /// Fetch and flatten the blocks listed by `summary_lines`.
    fn blocks_to_lines<S>(&self, summary_lines: S, ctx: &QueryContext) -> BoxedStream<String>
    where
        S: CloseableIterator<Item = String> + Send + 'static,
    {
        let entries = summary::parse_entries(summary_lines);
        let blocks = BlockAggregator::new(
            entries,
            &ctx.params,
            Arc::clone(&self.loader),
            Arc::clone(&self.resolver),
            Arc::clone(ctx.handles()),
        );
        LineFlattener::new(blocks).boxed()
    }

    /// Bound a CDX line stream to `[start, end)`.
    fn bound_lines(lines: BoxedStream<String>, start: &str, end: &str) -> BoxedStream<String> {
        let mut lines = lines;
        if !start.is_empty() {
            lines = filters::start_bound(lines, start.to_string(), cdx_key).boxed();
        }
        if !end.is_empty() {
            lines = filters::prefix_bound(lines, end.to_string(), false, cdx_key).boxed();
        }
        lines
    }

    /// Summary scan from the greatest entry `< key`, with the optional
    /// summary-level stages applied.
    ///
    /// Starting strictly below `key` keeps lines equal to `key` that close
    /// out the previous block when the next block's summary key is `key`.
    fn summary_scan(&self, key: &str, params: &QueryParams) -> BoxedStream<String> {
        let mut lines = self.summary.iter_less_than(key).boxed();
        if params.timestamp_dedup_length > 0 {
            lines = filters::timestamp_dedup(lines, params.timestamp_dedup_length as usize, summary_key)
                .boxed();
        }
        lines
    }

    /// Line-level best-status dedup, when selected.
    fn dedup_lines(lines: BoxedStream<String>, params: &QueryParams) -> BoxedStream<String> {
        if params.best_status_dedup && params.timestamp_dedup_length > 0 {
            filters::timestamp_best_pick_dedup(
                lines,
                params.timestamp_dedup_length as usize,
                filters::DEFAULT_STATUS_FIELD_INDEX,
            )
            .boxed()
        } else {
            lines
        }
    }

    fn cap_blocks(lines: BoxedStream<String>, params: &QueryParams) -> BoxedStream<String> {
        if params.max_blocks > 0 {
            filters::buffer_cap(lines, params.max_blocks as usize).boxed()
        } else {
            lines
        }
    }

    /// `lineCount` of the summary line starting at `offset`.
    fn line_count_at(&self, offset: u64) -> Option<u64> {
        let mut reader = self.summary.line_reader();
        reader.seek(offset);
        let line = reader.read_line()?;
        match SummaryEntry::parse(&line) {
            Ok(entry) => Some(entry.line_count),
            Err(e) => {
                error!(offset, error = %e, "Malformed summary line while counting");
                None
            }
        }
    }

    /// Offset of the summary line bracketing `key` from below. An empty
    /// key brackets the first line.
    fn bracket_start(&self, key: &str) -> u64 {
        if key.is_empty() {
            0
        } else {
            self.summary.floor_offset(key)
        }
    }

    /// Offset of the summary line bracketing `key` from above. An empty
    /// key brackets the last line.
    fn bracket_end(&self, key: &str) -> Option<u64> {
        if key.is_empty() {
            self.summary.last_line_offset()
        } else if self.summary.is_empty() {
            None
        } else {
            Some(self.summary.floor_offset(key))
        }
    }

    /// Offset just past the summary line starting at `offset`.
    fn after_line(&self, offset: u64) -> u64 {
        let mut reader = self.summary.line_reader();
        reader.seek(offset);
        match reader.read_line() {
            Some(_) => reader.position(),
            None => self.summary.len(),
        }
    }

    /// Summary byte span `[start, end)` of one page, or `None` when the
    /// page is past the end.
    fn page_span(&self, range: &KeyRange, page: u64, page_size: u64) -> Option<(u64, u64)> {
        let page_size = page_size.max(1);
        let total = self.count_lines(range);
        let num_pages = total / page_size + 1;
        if page >= num_pages || self.summary.is_empty() {
            return None;
        }

        let start_bracket = self.bracket_start(&range.start);
        let base = self.line_count_at(start_bracket)?;
        let counts = FieldExtractor::tab(LINE_COUNT_FIELD);

        let first = base + page * page_size;
        let start = self
            .summary
            .binary_find_offset(&counts, &first.to_string(), FieldOrder::Numeric);

        let end = if page + 1 == num_pages {
            match self.bracket_end(&range.end) {
                Some(offset) => self.after_line(offset),
                None => self.summary.len(),
            }
        } else {
            let next = base + (page + 1) * page_size;
            self.summary
                .binary_find_offset(&counts, &next.to_string(), FieldOrder::Numeric)
        };

        Some((start, end.max(start)))
    }
}

impl CdxIndex for ZipNumIndex {
    fn lookup_le(&self, key: &str, range: &KeyRange, params: &QueryParams) -> CdxLines {
        let ctx = QueryContext::new(*params);
        debug!(query = ctx.id, key, start = %range.start, end = %range.end, "lookup_le");

        let mut lines = self.summary_scan(key, params);
        if !range.end.is_empty() {
            lines = filters::prefix_bound(lines, range.end.clone(), false, summary_key).boxed();
        }
        let lines = Self::cap_blocks(lines, params);
        let lines = self.blocks_to_lines(lines, &ctx);
        let lines = Self::bound_lines(lines, &range.start, &range.end);
        CdxLines::new(Self::dedup_lines(lines, params), ctx)
    }

    fn lookup_prefix(&self, key: &str, prefix: &str, exact: bool, params: &QueryParams) -> CdxLines {
        let ctx = QueryContext::new(*params);
        debug!(query = ctx.id, key, prefix, exact, "lookup_prefix");

        let mut lines = self.summary_scan(key, params);
        lines = if exact {
            let end = format!("{prefix}{EXACT_MATCH_SENTINEL}");
            filters::prefix_bound(lines, end, false, summary_key).boxed()
        } else {
            filters::prefix_match(lines, prefix.to_string(), summary_key).boxed()
        };
        let lines = Self::cap_blocks(lines, params);
        let mut lines = self.blocks_to_lines(lines, &ctx);

        if !key.is_empty() {
            lines = filters::start_bound(lines, key.to_string(), cdx_key).boxed();
        }
        lines = if exact {
            let end = format!("{prefix}{EXACT_MATCH_SENTINEL}");
            filters::prefix_bound(lines, end, false, cdx_key).boxed()
        } else {
            filters::prefix_match(lines, prefix.to_string(), cdx_key).boxed()
        };
        CdxLines::new(Self::dedup_lines(lines, params), ctx)
    }

    fn count_lines(&self, range: &KeyRange) -> u64 {
        if self.summary.is_empty() {
            return 0;
        }
        let Some(end_offset) = self.bracket_end(&range.end) else {
            return 0;
        };
        let start_offset = self.bracket_start(&range.start);
        match (self.line_count_at(start_offset), self.line_count_at(end_offset)) {
            (Some(start), Some(end)) => end.saturating_sub(start),
            _ => 0,
        }
    }

    fn get_page(
        &self,
        range: &KeyRange,
        page: u64,
        page_size: u64,
        count_only: bool,
        params: &QueryParams,
    ) -> Page {
        if count_only {
            let total = self.count_lines(range);
            return Page::Count(total / page_size.max(1) + 1);
        }

        let ctx = QueryContext::new(*params);
        debug!(query = ctx.id, page, page_size, start = %range.start, end = %range.end, "get_page");
        let Some((start, end)) = self.page_span(range, page, page_size) else {
            return Page::Lines(CdxLines::new(stream::empty().boxed(), ctx));
        };

        let blocks = self.summary.lines_between(start, end);
        let lines = self.blocks_to_lines(blocks, &ctx);
        let lines = Self::bound_lines(lines, &range.start, &range.end);
        Page::Lines(CdxLines::new(Self::dedup_lines(lines, params), ctx))
    }

    fn default_params(&self) -> QueryParams {
        self.params
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    fn gzip(text: &str) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(text.as_bytes()).unwrap();
        enc.finish().unwrap()
    }

    /// Writes one part file holding `blocks` (each a list of CDX lines) and
    /// a summary beside it. Returns the opened index.
    fn build_index(dir: &TempDir, blocks: &[&[&str]]) -> ZipNumIndex {
        let keyed: Vec<(&str, &[&str])> = blocks.iter().map(|lines| (lines[0], *lines)).collect();
        build_keyed_index(dir, &keyed)
    }

    /// Like [`build_index`], with an explicit summary key per block.
    fn build_keyed_index(dir: &TempDir, blocks: &[(&str, &[&str])]) -> ZipNumIndex {
        let mut part = Vec::new();
        let mut summary = String::new();
        for (i, (key, lines)) in blocks.iter().enumerate() {
            let mut text = lines.join("\n");
            text.push('\n');
            let member = gzip(&text);
            summary.push_str(&format!(
                "{}\tpart-0\t{}\t{}\t{}\n",
                key,
                part.len(),
                member.len(),
                i
            ));
            part.extend_from_slice(&member);
        }
        std::fs::write(dir.path().join("part-0.gz"), part).unwrap();
        let summary_path = dir.path().join("ALL.summary");
        std::fs::write(&summary_path, summary).unwrap();
        ZipNumIndex::open(&IndexConfig::new(summary_path)).unwrap()
    }

    fn sample(dir: &TempDir) -> ZipNumIndex {
        build_index(
            dir,
            &[
                &["com,a)/ 20100101000000 a", "com,a)/ 20110101000000 b"],
                &["com,a)/x 20100101000000 c", "com,b)/ 20100101000000 d"],
                &["com,b)/ 20120101000000 e", "com,c)/ 20100101000000 f"],
                &["com,d)/ 20100101000000 g"],
            ],
        )
    }

    fn tags(lines: CdxLines) -> String {
        lines
            .map(|l| l.rsplit(' ').next().unwrap_or("").to_string())
            .collect::<Vec<_>>()
            .join("")
    }

    #[test]
    fn test_static_locations() {
        let r = StaticLocations::beside(Path::new("/data/cdx/ALL.summary"), ".gz");
        assert_eq!(r.locations("part-00003"), vec!["/data/cdx/part-00003.gz"]);
        let bare = StaticLocations::beside(Path::new("ALL.summary"), ".cdx.gz");
        assert_eq!(bare.locations("p"), vec!["./p.cdx.gz"]);
    }

    #[test]
    fn test_lookup_le_whole_index() {
        let dir = TempDir::new().unwrap();
        let index = sample(&dir);
        let lines = index.lookup_le("", &KeyRange::all(), &QueryParams::default());
        assert_eq!(tags(lines), "abcdefg");
    }

    #[test]
    fn test_lookup_le_bounds_lines() {
        let dir = TempDir::new().unwrap();
        let index = sample(&dir);
        let range = KeyRange::new("com,a)/x", "com,c)/");
        let lines = index.lookup_le("com,a)/x", &range, &QueryParams::default());
        assert_eq!(tags(lines), "cde");
    }

    #[test]
    fn test_lookup_starts_mid_block() {
        let dir = TempDir::new().unwrap();
        let index = sample(&dir);
        // Key falls inside the second block; the scan starts at that block.
        let range = KeyRange::starting_at("com,b)/");
        let lines = index.lookup_le("com,b)/", &range, &QueryParams::default());
        assert_eq!(tags(lines), "defg");
    }

    #[test]
    fn test_lookup_prefix_exact_and_contains() {
        let dir = TempDir::new().unwrap();
        let index = sample(&dir);
        let params = QueryParams::default();

        let exact = index.lookup_prefix("com,a)/", "com,a)/", true, &params);
        assert_eq!(tags(exact), "ab");

        let contains = index.lookup_prefix("com,a)/", "com,a)/", false, &params);
        assert_eq!(tags(contains), "abc");

        let none = index.lookup_prefix("com,zz)/", "com,zz)/", true, &params);
        assert_eq!(none.count(), 0);
    }

    #[test]
    fn test_duplicate_key_across_block_boundary() {
        let dir = TempDir::new().unwrap();
        let index = build_keyed_index(
            &dir,
            &[
                (
                    "com,a)/ 20100101000000",
                    &["com,a)/ 20100101000000 a", "com,b)/ 20100101000000 b"],
                ),
                (
                    "com,b)/ 20100101000000",
                    &["com,b)/ 20100101000000 c", "com,c)/ 20100101000000 d"],
                ),
            ],
        );
        let params = QueryParams::default();
        let key = "com,b)/ 20100101000000";

        let lines = index.lookup_le(key, &KeyRange::starting_at(key), &params);
        assert_eq!(tags(lines), "bcd");

        let exact = index.lookup_prefix(key, "com,b)/", true, &params);
        assert_eq!(tags(exact), "bc");

        let by_urlkey = index.lookup_prefix("com,b)/", "com,b)/", true, &params);
        assert_eq!(tags(by_urlkey), "bc");
    }

    #[test]
    fn test_max_blocks_limits_fetches() {
        let dir = TempDir::new().unwrap();
        let index = sample(&dir);
        let params = QueryParams::default().with_max_blocks(2);
        let lines = index.lookup_le("", &KeyRange::all(), &params);
        assert_eq!(tags(lines), "abcd");
    }

    #[test]
    fn test_aggregated_lookup_matches_unaggregated() {
        let dir = TempDir::new().unwrap();
        let index = sample(&dir);
        let one = index.lookup_le("", &KeyRange::all(), &QueryParams::default());
        let many = index.lookup_le(
            "",
            &KeyRange::all(),
            &QueryParams::default().with_max_aggregate_blocks(0),
        );
        assert_eq!(tags(one), tags(many));
        assert_eq!(index.loader().metrics().snapshot().blocks_lost, 0);
    }

    #[test]
    fn test_summary_dedup_skips_blocks() {
        let dir = TempDir::new().unwrap();
        let index = build_index(
            &dir,
            &[
                &["com,a)/ 20100101000000 a"],
                &["com,a)/ 20100601000000 b"],
                &["com,a)/ 20110101000000 c"],
            ],
        );
        let params = QueryParams::default().with_timestamp_dedup_length(4);
        let lines = index.lookup_le("", &KeyRange::all(), &params);
        assert_eq!(tags(lines), "ac");
    }

    #[test]
    fn test_best_status_dedup_keeps_lowest_status() {
        let dir = TempDir::new().unwrap();
        let index = build_index(
            &dir,
            &[&[
                "com,a)/ 20100101000000 http://a/ text/html 302 - a",
                "com,a)/ 20100601000000 http://a/ text/html 200 - b",
                "com,a)/ 20101201000000 http://a/ text/html 404 - c",
                "com,a)/ 20110101000000 http://a/ warc/revisit - - d",
                "com,b)/ 20100101000000 http://b/ text/html 200 - e",
            ]],
        );
        let yearly = QueryParams::default().with_timestamp_dedup_length(4);
        let all = index.lookup_le("", &KeyRange::all(), &yearly);
        assert_eq!(tags(all), "abcde");

        let best = yearly.with_best_status_dedup(true);
        let lines = index.lookup_le("", &KeyRange::all(), &best);
        assert_eq!(tags(lines), "bde");

        let prefix = index.lookup_prefix("com,a)/", "com,a)/", true, &best);
        assert_eq!(tags(prefix), "bd");

        let page = index.get_page(&KeyRange::all(), 0, 10, false, &best).into_lines().unwrap();
        assert_eq!(tags(page), "bde");

        // Without a dedup length the flag does nothing.
        let off = QueryParams::default().with_best_status_dedup(true);
        assert_eq!(tags(index.lookup_le("", &KeyRange::all(), &off)), "abcde");
    }

    #[test]
    fn test_count_lines_and_estimate() {
        let dir = TempDir::new().unwrap();
        let index = sample(&dir);
        assert_eq!(index.count_lines(&KeyRange::all()), 3);
        assert_eq!(index.count_lines(&KeyRange::new("com,a)/x", "com,d)/")), 2);
        assert_eq!(index.count_lines(&KeyRange::new("com,d)/", "com,a)/")), 0);
        assert_eq!(
            index.estimate_captures(&KeyRange::all()),
            3 * crate::config::DEFAULT_CDX_LINES_PER_BLOCK
        );
    }

    #[test]
    fn test_count_lines_empty_summary() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ALL.summary");
        std::fs::write(&path, "").unwrap();
        let index = ZipNumIndex::open(&IndexConfig::new(path)).unwrap();
        assert_eq!(index.count_lines(&KeyRange::all()), 0);
        assert_eq!(index.lookup_le("x", &KeyRange::all(), &QueryParams::default()).count(), 0);
        assert!(index.page_blocks(&KeyRange::all(), 0, 10).is_empty());
    }

    #[test]
    fn test_open_missing_summary_fails() {
        let dir = TempDir::new().unwrap();
        let config = IndexConfig::new(dir.path().join("missing.summary"));
        let err = ZipNumIndex::open(&config).err().unwrap();
        assert_eq!(err.code(), "IO_ERROR");
    }

    #[test]
    fn test_pagination_over_line_counts() {
        let mut summary = String::new();
        for i in 0..=10u64 {
            summary.push_str(&format!("k{:02}\tpart-0\t{}\t10\t{}\n", i, i * 10, i * 100));
        }
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ALL.summary");
        std::fs::write(&path, summary).unwrap();
        let index = ZipNumIndex::open(&IndexConfig::new(path)).unwrap();
        let range = KeyRange::all();

        let pages = index
            .get_page(&range, 0, 150, true, &QueryParams::default())
            .count()
            .unwrap();
        assert_eq!(pages, 7);

        let mut seen = Vec::new();
        for page in 0..pages {
            let blocks = index.page_blocks(&range, page, 150);
            assert!(!blocks.is_empty(), "page {page} is empty");
            seen.extend(blocks.iter().map(|l| crate::filters::summary_key(l).to_string()));
        }
        let expected: Vec<String> = (0..=10).map(|i| format!("k{i:02}")).collect();
        assert_eq!(seen, expected, "pages are disjoint, contiguous and exhaustive");

        let last = index.page_blocks(&range, 6, 150);
        assert_eq!(last.len(), 2);
        assert!(last[1].starts_with("k10\t"));
        assert!(index.page_blocks(&range, 7, 150).is_empty());
    }

    #[test]
    fn test_get_page_fetches_lines() {
        let dir = TempDir::new().unwrap();
        let index = sample(&dir);
        let params = QueryParams::default();
        let range = KeyRange::all();

        let Page::Count(pages) = index.get_page(&range, 0, 2, true, &params) else {
            panic!("expected a page count");
        };
        assert_eq!(pages, 2);

        let first = index.get_page(&range, 0, 2, false, &params).into_lines().unwrap();
        let second = index.get_page(&range, 1, 2, false, &params).into_lines().unwrap();
        assert_eq!(tags(first), "abcd");
        assert_eq!(tags(second), "efg");

        let past = index.get_page(&range, 5, 2, false, &params).into_lines().unwrap();
        assert_eq!(past.count(), 0);
    }

    #[test]
    fn test_close_releases_handles() {
        let dir = TempDir::new().unwrap();
        let index = sample(&dir);
        let mut lines = index.lookup_le("", &KeyRange::all(), &QueryParams::default());
        assert!(lines.next().is_some());
        assert_eq!(lines.open_handles(), 1);
        lines.close();
        assert_eq!(lines.open_handles(), 0);
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_leaked_reader_sweep() {
        let dir = TempDir::new().unwrap();
        let index = sample(&dir);
        let mut lines = index.lookup_le("", &KeyRange::all(), &QueryParams::default());
        assert!(lines.next().is_some());
        assert_eq!(lines.close_all_open_readers(), 1);
        assert_eq!(lines.open_handles(), 0);
    }

    #[test]
    fn test_unresolvable_part_loses_blocks_not_query() {
        let dir = TempDir::new().unwrap();
        let index = sample(&dir);
        let resolver: Arc<dyn LocationResolver> = Arc::new(|_: &str| Vec::<String>::new());
        let rerouted = ZipNumIndex::with_resolver(
            index.summary().clone(),
            Arc::clone(index.loader()),
            resolver,
        );
        let lines = rerouted.lookup_le("", &KeyRange::all(), &QueryParams::default());
        assert_eq!(lines.count(), 0);
        assert_eq!(index.loader().metrics().snapshot().blocks_lost, 4);
    }
}
