//! Summary entries: one line per gzip block of a part file.
//!
//! ```text
//! <first key of block>\t<partId>\t<offset>\t<length>\t<lineCount>
//! ```
//!
//! `lineCount` is a running count that never decreases down the file, so
//! it can be binary-searched numerically (pagination relies on this).

use tracing::error;

use crate::error::{IndexError, Result};
use crate::stream::{CloseableExt, CloseableIterator};

/// Tab column holding the running line count.
pub const LINE_COUNT_FIELD: usize = 4;

/// A parsed summary line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryEntry {
    pub key: String,
    pub part_id: String,
    pub offset: u64,
    pub length: u32,
    pub line_count: u64,
}

impl SummaryEntry {
    /// Parse a summary line. Extra trailing fields are ignored.
    pub fn parse(line: &str) -> Result<Self> {
        let mut fields = line.split('\t');
        let mut next = |name: &str| {
            fields.next().ok_or_else(|| {
                IndexError::InvalidFormat(format!("summary line missing {name}: {line:?}"))
            })
        };

        let key = next("key")?.to_string();
        let part_id = next("part id")?.to_string();
        let offset = next("offset")?;
        let length = next("length")?;
        let line_count = next("line count")?;

        let number = |name: &str, value: &str| {
            IndexError::InvalidFormat(format!("summary {name} {value:?} is not a number: {line:?}"))
        };

        Ok(Self {
            key,
            part_id,
            offset: offset.trim().parse().map_err(|_| number("offset", offset))?,
            length: length.trim().parse().map_err(|_| number("length", length))?,
            line_count: line_count
                .trim()
                .parse()
                .map_err(|_| number("line count", line_count))?,
        })
    }

    /// Offset just past this block.
    pub fn end_offset(&self) -> u64 {
        self.offset + u64::from(self.length)
    }

    /// True if `next` is the block stored immediately after this one in
    /// the same part file.
    pub fn is_contiguous_with(&self, next: &SummaryEntry) -> bool {
        self.part_id == next.part_id && self.end_offset() == next.offset
    }
}

/// Parse a stream of summary lines.
///
/// A malformed line is logged and ends the stream; earlier entries are
/// still delivered.
pub fn parse_entries<I>(lines: I) -> impl CloseableIterator<Item = SummaryEntry>
where
    I: CloseableIterator<Item = String>,
{
    lines.parse_while(|line| match SummaryEntry::parse(&line) {
        Ok(entry) => Some(entry),
        Err(e) => {
            error!(error = %e, "Malformed summary line, ending scan");
            None
        }
    })
}
