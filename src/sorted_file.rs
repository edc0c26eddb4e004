//! Sorted, line-oriented text files with binary search.
//!
//! `SortedTextFile` holds a memory-mapped (or in-memory) text file whose
//! lines are sorted ascending by their first tab-delimited field, and
//! answers positional queries against it:
//!
//! - `iter_from(key, include_less)` -- scan forward from the first line
//!   whose key is `>= key`, or from the greatest line whose key is
//!   `<= key` when `include_less` is set
//! - `iter_less_than(key)` -- scan forward from the greatest line whose
//!   key is strictly `< key`
//! - `binary_find_offset(extractor, target, order)` -- O(log N) search on
//!   any monotonic field, not just the key
//! - `line_reader()` -- raw `seek` + `read_line` access
//!
//! Search works directly on byte offsets: a probe lands mid-line and is
//! advanced to the next line start, so no line index is ever built.

use std::cmp::Ordering;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;

use crate::error::{IndexError, Result};
use crate::stream::CloseableIterator;

// ── Backing Storage ────────────────────────────────────────────────

/// Bytes of a mapped file, shared between a file and its readers.
#[derive(Debug)]
pub(crate) enum Backing {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Backing {
    /// Map a file read-only. Empty files are held as an empty buffer.
    pub(crate) fn map_file(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(IndexError::Io)?;
        let len = file.metadata().map_err(IndexError::Io)?.len();
        if len == 0 {
            return Ok(Backing::Owned(Vec::new()));
        }
        let mmap = unsafe { Mmap::map(&file) }.map_err(IndexError::Io)?;
        Ok(Backing::Mapped(mmap))
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        match self {
            Backing::Mapped(m) => m,
            Backing::Owned(v) => v,
        }
    }
}

// ── Field Extraction ───────────────────────────────────────────────

/// Selects one delimited field of a line.
#[derive(Debug, Clone, Copy)]
pub struct FieldExtractor {
    delimiter: char,
    index: usize,
}

impl FieldExtractor {
    pub fn new(delimiter: char, index: usize) -> Self {
        Self { delimiter, index }
    }

    /// Tab-delimited field `index` (0-based).
    pub fn tab(index: usize) -> Self {
        Self::new('\t', index)
    }

    pub fn extract<'a>(&self, line: &'a str) -> Option<&'a str> {
        line.split(self.delimiter).nth(self.index)
    }
}

/// How extracted field values are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOrder {
    Lexicographic,
    /// Unsigned integer comparison. Unparseable values sort after every number.
    Numeric,
}

impl FieldOrder {
    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        match self {
            FieldOrder::Lexicographic => a.cmp(b),
            FieldOrder::Numeric => {
                match (a.trim().parse::<u64>(), b.trim().parse::<u64>()) {
                    (Ok(x), Ok(y)) => x.cmp(&y),
                    (Ok(_), Err(_)) => Ordering::Less,
                    (Err(_), Ok(_)) => Ordering::Greater,
                    (Err(_), Err(_)) => Ordering::Equal,
                }
            }
        }
    }
}

/// The sort key of a line: everything before the first tab.
#[inline]
pub fn line_key(line: &str) -> &str {
    match line.find('\t') {
        Some(i) => &line[..i],
        None => line,
    }
}

// ── SortedTextFile ─────────────────────────────────────────────────

/// Read-only sorted text file supporting binary search by byte offset.
#[derive(Debug, Clone)]
pub struct SortedTextFile {
    data: Arc<Backing>,
    path: Option<PathBuf>,
}

impl SortedTextFile {
    /// Open a sorted file from disk (memory-mapped).
    pub fn open(path: &Path) -> Result<Self> {
        let data = Backing::map_file(path)?;
        Ok(Self {
            data: Arc::new(data),
            path: Some(path.to_path_buf()),
        })
    }

    /// Build from in-memory bytes (for testing / embedding).
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            data: Arc::new(Backing::Owned(bytes)),
            path: None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Size in bytes.
    pub fn len(&self) -> u64 {
        self.bytes().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes().is_empty()
    }

    fn bytes(&self) -> &[u8] {
        self.data.as_bytes()
    }

    /// Offset of the first line starting at or after `pos`.
    fn next_line_start(&self, pos: usize) -> usize {
        let data = self.bytes();
        if pos == 0 {
            return 0;
        }
        if pos > data.len() {
            return data.len();
        }
        match data[pos - 1..].iter().position(|&b| b == b'\n') {
            Some(i) => pos + i,
            None => data.len(),
        }
    }

    /// Offset just past the line starting at `start` (including its newline).
    fn line_end(&self, start: usize) -> usize {
        let data = self.bytes();
        match data[start..].iter().position(|&b| b == b'\n') {
            Some(i) => start + i + 1,
            None => data.len(),
        }
    }

    /// Offset of the line preceding the line that starts at `start`.
    fn prev_line_start(&self, start: usize) -> usize {
        if start == 0 {
            return 0;
        }
        let data = self.bytes();
        // data[start - 1] is the previous line's terminator.
        match data[..start - 1].iter().rposition(|&b| b == b'\n') {
            Some(i) => i + 1,
            None => 0,
        }
    }

    /// Offset of the last line in the file, or `None` if empty.
    pub fn last_line_offset(&self) -> Option<u64> {
        let data = self.bytes();
        if data.is_empty() {
            return None;
        }
        let mut end = data.len();
        if data[end - 1] == b'\n' {
            end -= 1;
        }
        let start = match data[..end].iter().rposition(|&b| b == b'\n') {
            Some(i) => i + 1,
            None => 0,
        };
        Some(start as u64)
    }

    /// Line starting at `start`, without its terminator.
    pub(crate) fn line_at(&self, start: usize) -> Option<String> {
        let data = self.bytes();
        if start >= data.len() {
            return None;
        }
        let mut end = self.line_end(start);
        while end > start && matches!(data[end - 1], b'\n' | b'\r') {
            end -= 1;
        }
        Some(String::from_utf8_lossy(&data[start..end]).into_owned())
    }

    /// Offset of the first line for which `below` is false.
    ///
    /// `below` must be true for a (possibly empty) prefix of the file's
    /// lines and false for the rest, as with `slice::partition_point`.
    pub fn partition_point<F>(&self, mut below: F) -> u64
    where
        F: FnMut(&str) -> bool,
    {
        let data = self.bytes();
        // Invariant: `lo` is a line start; the answer lies in [lo, hi].
        let mut lo = 0usize;
        let mut hi = data.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let probe = {
                let start = self.next_line_start(mid);
                if start >= hi {
                    lo
                } else {
                    start
                }
            };
            let end = self.line_end(probe);
            let line = String::from_utf8_lossy(&data[probe..end]);
            let line = line.trim_end_matches(|c| c == '\n' || c == '\r');
            if below(line) {
                lo = end;
            } else {
                hi = probe;
            }
        }
        lo as u64
    }

    /// Offset of the first line whose extracted field compares `>= target`.
    ///
    /// Lines missing the field stop the search (they are treated as not
    /// below the target).
    pub fn binary_find_offset(
        &self,
        extractor: &FieldExtractor,
        target: &str,
        order: FieldOrder,
    ) -> u64 {
        self.partition_point(|line| match extractor.extract(line) {
            Some(value) => order.compare(value, target) == Ordering::Less,
            None => false,
        })
    }

    /// Offset of the first line whose key is `>= key`.
    pub fn lower_bound(&self, key: &str) -> u64 {
        self.partition_point(|line| line_key(line) < key)
    }

    /// Offset of the greatest line whose key is `<= key`, or of the first
    /// line when every key is greater.
    pub fn floor_offset(&self, key: &str) -> u64 {
        let lb = self.lower_bound(key) as usize;
        if let Some(line) = self.line_at(lb) {
            if line_key(&line) == key {
                return lb as u64;
            }
        }
        self.prev_line_start(lb) as u64
    }

    /// Offset of the greatest line whose key is `< key`, or of the first
    /// line when no key is smaller.
    pub fn less_than_offset(&self, key: &str) -> u64 {
        let lb = self.lower_bound(key) as usize;
        self.prev_line_start(lb) as u64
    }

    /// Scan forward starting at `key`.
    pub fn iter_from(&self, key: &str, include_less: bool) -> SortedLines {
        let start = if include_less {
            self.floor_offset(key)
        } else {
            self.lower_bound(key)
        };
        self.lines_between(start, self.len())
    }

    /// Scan forward from the greatest line strictly less than `key`.
    pub fn iter_less_than(&self, key: &str) -> SortedLines {
        self.lines_between(self.less_than_offset(key), self.len())
    }

    /// Lines starting in `[start, end)`. Both offsets should be line starts.
    pub fn lines_between(&self, start: u64, end: u64) -> SortedLines {
        let len = self.len();
        SortedLines {
            data: Arc::clone(&self.data),
            pos: start.min(len) as usize,
            end: end.min(len) as usize,
        }
    }

    /// Raw seek + read-line access.
    pub fn line_reader(&self) -> LineReader {
        LineReader {
            file: self.clone(),
            pos: 0,
        }
    }
}

// ── SortedLines ────────────────────────────────────────────────────

/// Forward scan over a byte range of a sorted file.
pub struct SortedLines {
    data: Arc<Backing>,
    pos: usize,
    end: usize,
}

impl Iterator for SortedLines {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let data = self.data.as_bytes();
        if self.pos >= self.end {
            return None;
        }
        let start = self.pos;
        let mut line_end = match data[start..].iter().position(|&b| b == b'\n') {
            Some(i) => start + i,
            None => data.len(),
        };
        self.pos = (line_end + 1).min(data.len());
        while line_end > start && data[line_end - 1] == b'\r' {
            line_end -= 1;
        }
        Some(String::from_utf8_lossy(&data[start..line_end]).into_owned())
    }
}

impl CloseableIterator for SortedLines {
    fn close(&mut self) {
        self.pos = self.end;
    }
}

// ── LineReader ─────────────────────────────────────────────────────

/// Seekable line reader over a sorted file.
pub struct LineReader {
    file: SortedTextFile,
    pos: u64,
}

impl LineReader {
    /// Position the reader at `offset`. Reading resumes from the first
    /// line starting at or after `offset`.
    pub fn seek(&mut self, offset: u64) {
        self.pos = self.file.next_line_start(offset.min(self.file.len()) as usize) as u64;
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Read the line at the current position and advance past it.
    pub fn read_line(&mut self) -> Option<String> {
        let start = self.pos as usize;
        let line = self.file.line_at(start)?;
        self.pos = self.file.line_end(start) as u64;
        Some(line)
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> SortedTextFile {
        let text = "\
b 1\tp0\t0\t10\t0
d 1\tp0\t10\t10\t1
d 2\tp0\t20\t10\t2
f 1\tp1\t0\t10\t3
h 1\tp1\t10\t10\t4
";
        SortedTextFile::from_bytes(text.as_bytes().to_vec())
    }

    fn keys(lines: SortedLines) -> Vec<String> {
        lines.map(|l| line_key(&l).to_string()).collect()
    }

    #[test]
    fn test_iter_from_exact_and_between() {
        let f = sample();
        assert_eq!(keys(f.iter_from("d 1", false)), vec!["d 1", "d 2", "f 1", "h 1"]);
        assert_eq!(keys(f.iter_from("e", false)), vec!["f 1", "h 1"]);
        assert!(keys(f.iter_from("z", false)).is_empty());
    }

    #[test]
    fn test_iter_from_include_less() {
        let f = sample();
        // Exact key match starts at the match.
        assert_eq!(keys(f.iter_from("d 2", true)), vec!["d 2", "f 1", "h 1"]);
        // Between keys starts at the greatest smaller key.
        assert_eq!(keys(f.iter_from("e", true)), vec!["d 2", "f 1", "h 1"]);
        // Before every key falls back to the first line.
        assert_eq!(keys(f.iter_from("a", true)).len(), 5);
        // Past every key yields the last line.
        assert_eq!(keys(f.iter_from("z", true)), vec!["h 1"]);
    }

    #[test]
    fn test_iter_less_than() {
        let f = sample();
        assert_eq!(keys(f.iter_less_than("d 2")), vec!["d 1", "d 2", "f 1", "h 1"]);
        assert_eq!(keys(f.iter_less_than("b 1")).len(), 5);
    }

    #[test]
    fn test_binary_find_offset_numeric() {
        let f = sample();
        let counts = FieldExtractor::tab(4);
        let off = f.binary_find_offset(&counts, "3", FieldOrder::Numeric);
        let mut reader = f.line_reader();
        reader.seek(off);
        assert_eq!(line_key(&reader.read_line().unwrap()), "f 1");

        // Past the last value lands at EOF.
        let off = f.binary_find_offset(&counts, "100", FieldOrder::Numeric);
        assert_eq!(off, f.len());
    }

    #[test]
    fn test_numeric_order_is_not_lexicographic() {
        let text = "a\t9\nb\t10\nc\t100\n";
        let f = SortedTextFile::from_bytes(text.as_bytes().to_vec());
        let off = f.binary_find_offset(&FieldExtractor::tab(1), "10", FieldOrder::Numeric);
        assert_eq!(f.line_at(off as usize).unwrap(), "b\t10");
    }

    #[test]
    fn test_line_reader_seek_mid_line() {
        let f = sample();
        let mut reader = f.line_reader();
        reader.seek(3); // inside the first line
        assert_eq!(line_key(&reader.read_line().unwrap()), "d 1");
        assert_eq!(line_key(&reader.read_line().unwrap()), "d 2");
    }

    #[test]
    fn test_last_line_offset() {
        let f = sample();
        let off = f.last_line_offset().unwrap();
        assert_eq!(line_key(&f.line_at(off as usize).unwrap()), "h 1");

        let no_trailing_newline = SortedTextFile::from_bytes(b"a\t1\nb\t2".to_vec());
        let off = no_trailing_newline.last_line_offset().unwrap();
        assert_eq!(no_trailing_newline.line_at(off as usize).unwrap(), "b\t2");

        assert!(SortedTextFile::from_bytes(Vec::new()).last_line_offset().is_none());
    }

    #[test]
    fn test_empty_file_searches() {
        let f = SortedTextFile::from_bytes(Vec::new());
        assert_eq!(f.lower_bound("x"), 0);
        assert_eq!(f.iter_from("x", true).count(), 0);
    }

    #[test]
    fn test_open_mapped_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ALL.summary");
        std::fs::write(&path, "a 1\tp\t0\t5\t0\r\nb 1\tp\t5\t5\t1\r\n").unwrap();

        let f = SortedTextFile::open(&path).unwrap();
        assert_eq!(f.path(), Some(path.as_path()));
        let lines: Vec<String> = f.iter_from("b", true).collect();
        assert_eq!(lines, vec!["a 1\tp\t0\t5\t0", "b 1\tp\t5\t5\t1"]);
    }

    #[test]
    fn test_open_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let err = SortedTextFile::open(&dir.path().join("missing")).unwrap_err();
        assert_eq!(err.code(), "IO_ERROR");
    }
}
