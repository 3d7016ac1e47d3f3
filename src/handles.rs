//! Producer-side table of open local files, keyed by path.
//!
//! The map itself sits behind a reader/writer lock: lookups share it, inserts
//! and removals take it exclusively. Each entry has its own mutex so that a
//! seek followed by a read is one atomic unit per call, and callers only ever
//! touch a handle inside `with_handle`.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use crate::error::{FileError, FileResult};

/// Open file plus its lifecycle flag.
pub struct FileHandleEntry {
    file: Option<File>,
    pub is_open: bool,
}

impl FileHandleEntry {
    fn close(&mut self) {
        // dropping the File releases the descriptor
        self.file = None;
        self.is_open = false;
    }
}

/// Result of an `open` that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    Opened,
    /// The path was already open; the existing entry is reused.
    AlreadyOpen,
}

#[derive(Default)]
pub struct FileHandleTable {
    entries: RwLock<HashMap<String, Arc<Mutex<FileHandleEntry>>>>,
}

impl FileHandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open `path` read-only and record it. A second open of a path that is
    /// still open keeps the first handle and reports `AlreadyOpen`.
    pub fn open(&self, path: &str) -> FileResult<OpenOutcome> {
        if self.contains(path) {
            return Ok(OpenOutcome::AlreadyOpen);
        }

        let file = File::open(path).map_err(|e| FileError::OpenFailed {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        if file.metadata().map(|m| m.is_dir()).unwrap_or(false) {
            return Err(FileError::OpenFailed {
                path: path.to_string(),
                reason: "is a directory".to_string(),
            });
        }

        let mut entries = self.entries.write();
        // Lost a race with another open of the same path: keep theirs.
        if entries.contains_key(path) {
            return Ok(OpenOutcome::AlreadyOpen);
        }
        entries.insert(
            path.to_string(),
            Arc::new(Mutex::new(FileHandleEntry {
                file: Some(file),
                is_open: true,
            })),
        );
        Ok(OpenOutcome::Opened)
    }

    /// Close and forget `path`.
    pub fn close(&self, path: &str) -> FileResult<()> {
        let entry = self
            .entries
            .write()
            .remove(path)
            .ok_or_else(|| FileError::NotOpen {
                path: path.to_string(),
            })?;
        let mut entry = entry.lock();
        if !entry.is_open {
            return Err(FileError::AlreadyClosed {
                path: path.to_string(),
            });
        }
        entry.close();
        Ok(())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.read().contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn paths(&self) -> Vec<String> {
        let mut v: Vec<String> = self.entries.read().keys().cloned().collect();
        v.sort();
        v
    }

    /// Run `f` with exclusive access to the open file for `path`.
    pub fn with_handle<R>(
        &self,
        path: &str,
        f: impl FnOnce(&mut File) -> std::io::Result<R>,
    ) -> FileResult<R> {
        let entry = self
            .entries
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| FileError::NotFound {
                path: path.to_string(),
            })?;
        let mut entry = entry.lock();
        let closed = || FileError::AlreadyClosed {
            path: path.to_string(),
        };
        if !entry.is_open {
            return Err(closed());
        }
        let file = entry.file.as_mut().ok_or_else(closed)?;
        f(file).map_err(|e| FileError::Io {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    /// Seek to `offset` and read up to `len` bytes. Short only at end of file.
    pub fn read_at(&self, path: &str, offset: u64, len: usize) -> FileResult<Vec<u8>> {
        self.with_handle(path, |file| {
            file.seek(SeekFrom::Start(offset))?;
            let mut buf = Vec::with_capacity(len);
            file.by_ref().take(len as u64).read_to_end(&mut buf)?;
            Ok(buf)
        })
    }

    /// Force every entry closed and clear the table. Does not wait for
    /// callers that already hold an entry; their next access sees it closed.
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = self.entries.write().drain().collect();
        let n = drained.len();
        for (_, entry) in drained {
            entry.lock().close();
        }
        n
    }
}

impl Drop for FileHandleTable {
    fn drop(&mut self) {
        self.close_all();
    }
}
