//! Shared fixture: a small zipnum index written to a temp dir.
//!
//! Layout:
//!
//! ```text
//! <dir>/ALL.summary
//! <dir>/part-00000.gz, part-00001.gz, ...
//! <dir>/ALL.loc          (written on demand)
//! ```
//!
//! Line `i` of the index is `com,s{i:05})/ 20120101000000 ...`, so lines
//! sort by `i` and every line has its own urlkey.

#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::TempDir;
use zipnum::{IndexConfig, ZipNumIndex};

pub fn gzip(text: &str) -> Vec<u8> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(text.as_bytes()).unwrap();
    enc.finish().unwrap()
}

pub fn urlkey(i: usize) -> String {
    format!("com,s{i:05})/")
}

pub fn cdx_line(i: usize) -> String {
    format!("{} 20120101000000 http://s{i}.com/ text/html 200 -", urlkey(i))
}

pub struct Fixture {
    pub dir: TempDir,
    pub summary_path: PathBuf,
    pub parts: Vec<String>,
    pub lines: Vec<String>,
    pub blocks: usize,
}

impl Fixture {
    /// `parts` part files of `blocks_per_part` gzip members, each holding
    /// `lines_per_block` lines.
    pub fn build(parts: usize, blocks_per_part: usize, lines_per_block: usize) -> Self {
        let dir = TempDir::new().unwrap();
        let mut summary = String::new();
        let mut all_lines = Vec::new();
        let mut part_ids = Vec::new();
        let mut block = 0;

        for p in 0..parts {
            let part_id = format!("part-{p:05}");
            let mut bytes = Vec::new();
            for _ in 0..blocks_per_part {
                let first = all_lines.len();
                let lines: Vec<String> = (first..first + lines_per_block).map(cdx_line).collect();
                let member = gzip(&format!("{}\n", lines.join("\n")));
                summary.push_str(&format!(
                    "{} 20120101000000\t{part_id}\t{}\t{}\t{block}\n",
                    urlkey(first),
                    bytes.len(),
                    member.len()
                ));
                bytes.extend_from_slice(&member);
                all_lines.extend(lines);
                block += 1;
            }
            std::fs::write(dir.path().join(format!("{part_id}.gz")), bytes).unwrap();
            part_ids.push(part_id);
        }

        let summary_path = dir.path().join("ALL.summary");
        std::fs::write(&summary_path, summary).unwrap();
        Self {
            dir,
            summary_path,
            parts: part_ids,
            lines: all_lines,
            blocks: block,
        }
    }

    pub fn part_path(&self, part_id: &str) -> String {
        self.dir
            .path()
            .join(format!("{part_id}.gz"))
            .to_string_lossy()
            .into_owned()
    }

    /// A location that will never open.
    pub fn missing_path(&self, name: &str) -> String {
        self.dir.path().join("gone").join(name).to_string_lossy().into_owned()
    }

    pub fn loc_path(&self) -> PathBuf {
        self.dir.path().join("ALL.loc")
    }

    /// Location table mapping every part to its local file.
    pub fn local_loc(&self) -> String {
        self.parts
            .iter()
            .map(|p| format!("{p}\t{}\n", self.part_path(p)))
            .collect()
    }

    pub fn write_loc(&self, body: &str) -> PathBuf {
        let path = self.loc_path();
        write_atomically(&path, body);
        path
    }

    pub fn index(&self) -> ZipNumIndex {
        ZipNumIndex::open(&IndexConfig::new(&self.summary_path)).unwrap()
    }

    /// Cluster config over `ALL.loc` with background reloading off.
    pub fn cluster_config(&self) -> IndexConfig {
        let mut config = IndexConfig::new(&self.summary_path);
        config.loc_path = Some(self.loc_path());
        config.check_interval_ms = 0;
        config
    }
}

/// Replace `path` via rename so readers never see a half-written file.
pub fn write_atomically(path: &Path, body: &str) {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, body).unwrap();
    std::fs::rename(&tmp, path).unwrap();
}
