//! Local part files.
//!
//! One [`FileReaderFactory`] per distinct path, cached by the loader. The
//! factory maps the file on first use and hands each reader its own cursor
//! over the shared mapping, so readers never share mutable state.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{IndexError, Result};
use crate::sorted_file::Backing;

use super::handles::TrackedHandle;
use super::RangeReader;

/// Shared, lazily mapped view of one part file.
#[derive(Debug)]
pub struct FileReaderFactory {
    path: PathBuf,
    data: Mutex<Option<Arc<Backing>>>,
}

impl FileReaderFactory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            data: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True once the file has been mapped.
    pub fn is_mapped(&self) -> bool {
        self.data.lock().unwrap().is_some()
    }

    fn backing(&self) -> Result<Arc<Backing>> {
        let mut data = self.data.lock().unwrap();
        if let Some(existing) = data.as_ref() {
            return Ok(Arc::clone(existing));
        }
        let mapped = Arc::new(Backing::map_file(&self.path)?);
        *data = Some(Arc::clone(&mapped));
        Ok(mapped)
    }

    /// Open a new reader positioned at offset 0. Nothing is mapped until
    /// the first seek or read.
    pub fn reader(self: &Arc<Self>, location: &str, handle: TrackedHandle) -> FileRangeReader {
        FileRangeReader {
            location: location.to_string(),
            factory: Arc::clone(self),
            data: None,
            closed: false,
            pos: 0,
            handle,
        }
    }
}

/// Cursor over a mapped part file.
///
/// Holds its own reference to the factory and, once mapped, to the
/// mapping, so it stays valid after the factory is evicted from the loader
/// cache.
pub struct FileRangeReader {
    location: String,
    factory: Arc<FileReaderFactory>,
    data: Option<Arc<Backing>>,
    closed: bool,
    pos: u64,
    handle: TrackedHandle,
}

impl FileRangeReader {
    fn mapping(&mut self) -> Result<Arc<Backing>> {
        if self.closed || self.handle.is_closed() {
            return Err(IndexError::ReaderClosed(self.location.clone()));
        }
        if let Some(data) = &self.data {
            return Ok(Arc::clone(data));
        }
        let data = self.factory.backing()?;
        self.data = Some(Arc::clone(&data));
        Ok(data)
    }

    pub fn position(&self) -> u64 {
        self.pos
    }
}

impl RangeReader for FileRangeReader {
    fn location(&self) -> &str {
        &self.location
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        let len = self.mapping()?.as_bytes().len() as u64;
        if offset > len {
            return Err(IndexError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("seek to {offset} past end of {} ({len} bytes)", self.location),
            )));
        }
        self.pos = offset;
        Ok(())
    }

    fn read_range(&mut self, offset: u64, max_len: u64) -> Result<Vec<u8>> {
        let mapping = self.mapping()?;
        let data = mapping.as_bytes();
        let len = data.len() as u64;
        if offset >= len && max_len > 0 {
            return Err(IndexError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("read at {offset} past end of {} ({len} bytes)", self.location),
            )));
        }
        let end = offset.saturating_add(max_len).min(len);
        let bytes = data[offset as usize..end as usize].to_vec();
        self.pos = end;
        Ok(bytes)
    }

    fn close(&mut self) {
        self.closed = true;
        self.data = None;
        self.handle.mark_closed();
    }

    fn is_open(&self) -> bool {
        !self.closed && !self.handle.is_closed()
    }
}
