//! Line-level bounding and dedup filters.
//!
//! Each filter is a thin composition of the combinators in
//! [`crate::stream`]; close propagation comes from there. Filters take a
//! [`KeyFn`] selecting the sortable part of a line: [`cdx_key`] for CDX
//! record lines, [`summary_key`] for summary lines.

use crate::sorted_file::line_key;
use crate::stream::{CloseableExt, CloseableIterator};

/// Extracts the sortable key of a line.
pub type KeyFn = fn(&str) -> &str;

/// Default column of the HTTP status in a CDX line, counted from the
/// timestamp (`timestamp original mimetype status ...`).
pub const DEFAULT_STATUS_FIELD_INDEX: usize = 3;

/// CDX record lines sort on the whole line (`urlkey timestamp ...`).
pub fn cdx_key(line: &str) -> &str {
    line
}

/// Summary lines sort on the field before the first tab.
pub fn summary_key(line: &str) -> &str {
    line_key(line)
}

/// True if `key` is below `end` (or, when `inclusive`, starts with `end`).
///
/// Byte-wise comparison, matching the sort order of the index files.
pub fn below_end(key: &str, end: &str, inclusive: bool) -> bool {
    if inclusive {
        let n = end.len().min(key.len());
        key.as_bytes()[..n] <= *end.as_bytes()
    } else {
        key.as_bytes() < end.as_bytes()
    }
}

/// `urlkey ` plus at most `len` leading timestamp digits.
///
/// Keys without a space have no timestamp and are returned whole.
pub fn truncated_timestamp_key(key: &str, len: usize) -> &str {
    let Some(space) = key.find(' ') else {
        return key;
    };
    let ts_start = space + 1;
    let ts_end = key[ts_start..]
        .find([' ', '\t'])
        .map(|i| ts_start + i)
        .unwrap_or(key.len());
    let end = (ts_start + len).min(ts_end);
    key.get(..end).unwrap_or(key)
}

/// Numeric status of a CDX line, counting fields after the urlkey.
///
/// Missing or non-numeric statuses (e.g. `-` for revisits) rank last.
pub fn status_rank(line: &str, status_field_index: usize) -> u64 {
    let Some(space) = line.find(' ') else {
        return u64::MAX;
    };
    line[space + 1..]
        .split(' ')
        .nth(status_field_index)
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(u64::MAX)
}

// ── Bounds ─────────────────────────────────────────────────────────

/// Yield lines while their key is below `end_key` (or equal to it when
/// `inclusive`). An empty `end_key` disables the bound.
pub fn prefix_bound<I>(
    inner: I,
    end_key: String,
    inclusive: bool,
    key: KeyFn,
) -> impl CloseableIterator<Item = String>
where
    I: CloseableIterator<Item = String>,
{
    inner.bound_by(move |line| end_key.is_empty() || below_end(key(line), &end_key, inclusive))
}

/// Yield lines while their key starts with `prefix`.
///
/// Lines sorting before `prefix` are let through as well: a scan that was
/// started from the entry preceding the prefix must not stop on it.
pub fn prefix_match<I>(inner: I, prefix: String, key: KeyFn) -> impl CloseableIterator<Item = String>
where
    I: CloseableIterator<Item = String>,
{
    inner.bound_by(move |line| {
        let k = key(line);
        k.starts_with(prefix.as_str()) || k < prefix.as_str()
    })
}

/// Skip leading lines whose key is below `start_key`.
pub fn start_bound<I>(inner: I, start_key: String, key: KeyFn) -> impl CloseableIterator<Item = String>
where
    I: CloseableIterator<Item = String>,
{
    inner.skip_until(move |line| key(line) >= start_key.as_str())
}

/// Hard cap on how many lines leave this stage.
pub fn buffer_cap<I>(inner: I, max_lines: usize) -> impl CloseableIterator<Item = String>
where
    I: CloseableIterator<Item = String>,
{
    inner.buffer_cap(max_lines)
}

// ── Dedup ──────────────────────────────────────────────────────────

/// Collapse runs of lines sharing `urlkey` and the first `key_prefix_len`
/// timestamp digits, keeping the first line of each run.
pub fn timestamp_dedup<I>(
    inner: I,
    key_prefix_len: usize,
    key: KeyFn,
) -> impl CloseableIterator<Item = String>
where
    I: CloseableIterator<Item = String>,
{
    inner.dedup_runs(move |line| truncated_timestamp_key(key(line), key_prefix_len).to_string())
}

/// Same grouping as [`timestamp_dedup`], but keeps the line of each run
/// with the lowest numeric status. Ties go to the later line.
pub fn timestamp_best_pick_dedup<I>(
    inner: I,
    key_prefix_len: usize,
    status_field_index: usize,
) -> impl CloseableIterator<Item = String>
where
    I: CloseableIterator<Item = String>,
{
    inner.best_of_runs(
        move |line| truncated_timestamp_key(line, key_prefix_len).to_string(),
        move |line| status_rank(line, status_field_index),
    )
}

// ── Tests ──────────────────────────────────────────────────────────
