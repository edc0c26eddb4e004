//! LineFlattener: one ordered line stream out of a stream of blocks.
//!
//! Holds at most one open block at a time. An exhausted block is closed
//! before the next one is fetched; unavailable blocks are skipped and
//! counted.

use crate::aggregator::{BlockFetch, BlockLines};
use crate::stream::CloseableIterator;

pub struct LineFlattener<B> {
    blocks: B,
    current: Option<BlockLines>,
    lost_blocks: u64,
    done: bool,
}

impl<B> LineFlattener<B>
where
    B: CloseableIterator<Item = BlockFetch>,
{
    pub fn new(blocks: B) -> Self {
        Self {
            blocks,
            current: None,
            lost_blocks: 0,
            done: false,
        }
    }

    /// Blocks skipped because no location could serve them.
    pub fn lost_blocks(&self) -> u64 {
        self.lost_blocks
    }
}

impl<B> Iterator for LineFlattener<B>
where
    B: CloseableIterator<Item = BlockFetch>,
{
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            if let Some(block) = self.current.as_mut() {
                if let Some(line) = block.next() {
                    return Some(line);
                }
                block.close();
                self.current = None;
            }
            if self.done {
                return None;
            }
            match self.blocks.next() {
                Some(BlockFetch::Found(lines)) => self.current = Some(lines),
                Some(BlockFetch::Unavailable { .. }) => self.lost_blocks += 1,
                None => {
                    self.done = true;
                    return None;
                }
            }
        }
    }
}

impl<B> CloseableIterator for LineFlattener<B>
where
    B: CloseableIterator<Item = BlockFetch>,
{
    fn close(&mut self) {
        if let Some(mut block) = self.current.take() {
            block.close();
        }
        self.done = true;
        self.blocks.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{Block, BlockAggregator, LocationResolver};
    use crate::config::QueryParams;
    use crate::loader::{BlockLoader, HandleTracker};
    use crate::stream::closeable;
    use crate::summary::SummaryEntry;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn gzip(text: &str) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(text.as_bytes()).unwrap();
        enc.finish().unwrap()
    }

    struct Fixture {
        _dir: TempDir,
        entries: Vec<SummaryEntry>,
        resolver: Arc<dyn LocationResolver>,
    }

    /// One part per block so individual parts can be made to fail.
    fn fixture(blocks: &[(&str, &str)], missing: &[&str]) -> Fixture {
        let dir = TempDir::new().unwrap();
        let mut entries = Vec::new();
        for (i, (part, text)) in blocks.iter().enumerate() {
            let member = gzip(text);
            if !missing.contains(part) {
                std::fs::write(dir.path().join(part), &member).unwrap();
            }
            entries.push(SummaryEntry {
                key: format!("k{i}"),
                part_id: part.to_string(),
                offset: 0,
                length: member.len() as u32,
                line_count: i as u64,
            });
        }
        let root = dir.path().to_path_buf();
        let resolver: Arc<dyn LocationResolver> =
            Arc::new(move |part: &str| vec![root.join(part).to_string_lossy().to_string()]);
        Fixture {
            _dir: dir,
            entries,
            resolver,
        }
    }

    fn flatten(
        fx: &Fixture,
        handles: &Arc<HandleTracker>,
    ) -> LineFlattener<BlockAggregator<crate::stream::Plain<std::vec::IntoIter<SummaryEntry>>>> {
        LineFlattener::new(BlockAggregator::new(
            closeable(fx.entries.clone()),
            &QueryParams::default(),
            Arc::new(BlockLoader::default()),
            Arc::clone(&fx.resolver),
            Arc::clone(handles),
        ))
    }

    #[test]
    fn test_flattens_in_order() {
        let fx = fixture(&[("p0", "a 1\na 2\n"), ("p1", "b 1\n"), ("p2", "c 1\nc 2\n")], &[]);
        let handles = Arc::new(HandleTracker::new());
        let lines: Vec<String> = flatten(&fx, &handles).collect();
        assert_eq!(lines, vec!["a 1", "a 2", "b 1", "c 1", "c 2"]);
        assert_eq!(handles.open_count(), 0);
    }

    #[test]
    fn test_skips_unavailable_blocks() {
        let fx = fixture(&[("p0", "a 1\n"), ("p1", "b 1\n"), ("p2", "c 1\n")], &["p1"]);
        let handles = Arc::new(HandleTracker::new());
        let mut flat = flatten(&fx, &handles);
        let lines: Vec<String> = flat.by_ref().collect();
        assert_eq!(lines, vec!["a 1", "c 1"]);
        assert_eq!(flat.lost_blocks(), 1);
    }

    #[test]
    fn test_at_most_one_block_open() {
        let fx = fixture(&[("p0", "a 1\na 2\n"), ("p1", "b 1\nb 2\n")], &[]);
        let handles = Arc::new(HandleTracker::new());
        let mut flat = flatten(&fx, &handles);
        while let Some(_line) = flat.next() {
            assert!(handles.open_count() <= 1);
        }
        assert_eq!(handles.open_count(), 0);
    }

    #[test]
    fn test_close_mid_block_releases_reader() {
        let fx = fixture(&[("p0", "a 1\na 2\na 3\n"), ("p1", "b 1\n")], &[]);
        let handles = Arc::new(HandleTracker::new());
        let mut flat = flatten(&fx, &handles);
        assert_eq!(flat.next().as_deref(), Some("a 1"));
        assert_eq!(handles.open_count(), 1);
        flat.close();
        assert_eq!(handles.open_count(), 0);
        assert_eq!(flat.next(), None);
    }

    #[test]
    fn test_unavailable_block_reports_range() {
        let fx = fixture(&[("p0", "a 1\n")], &["p0"]);
        let handles = Arc::new(HandleTracker::new());
        let mut agg = BlockAggregator::new(
            closeable(fx.entries.clone()),
            &QueryParams::default(),
            Arc::new(BlockLoader::default()),
            Arc::clone(&fx.resolver),
            handles,
        );
        match agg.next() {
            Some(BlockFetch::Unavailable { block, .. }) => {
                assert_eq!(
                    block,
                    Block {
                        part_id: "p0".into(),
                        start_offset: 0,
                        total_length: u64::from(fx.entries[0].length),
                        entry_count: 1,
                    }
                );
            }
            _ => panic!("expected p0 to be unavailable"),
        }
    }
}
