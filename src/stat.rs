//! Fixed-size file status structure shipped in stat responses.

use serde::{Deserialize, Serialize};
use std::fs::Metadata;
use std::path::Path;

use crate::error::{FileError, FileResult};

/// Encoded size in bytes; every stat payload has exactly this length.
pub const ENCODED_LEN: usize = 116;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub dev: u64,
    pub ino: u64,
    pub mode: u32,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub size: u64,
    pub blksize: u64,
    pub blocks: u64,
    pub atime: i64,
    pub atime_nsec: i64,
    pub mtime: i64,
    pub mtime_nsec: i64,
    pub ctime: i64,
    pub ctime_nsec: i64,
}

impl FileStat {
    /// Status of `path`, following symlinks.
    pub fn of(path: &Path) -> std::io::Result<Self> {
        Ok(Self::from_metadata(&std::fs::metadata(path)?))
    }

    #[cfg(unix)]
    pub fn from_metadata(md: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        FileStat {
            dev: md.dev(),
            ino: md.ino(),
            mode: md.mode(),
            nlink: md.nlink(),
            uid: md.uid(),
            gid: md.gid(),
            rdev: md.rdev(),
            size: md.size(),
            blksize: md.blksize(),
            blocks: md.blocks(),
            atime: md.atime(),
            atime_nsec: md.atime_nsec(),
            mtime: md.mtime(),
            mtime_nsec: md.mtime_nsec(),
            ctime: md.ctime(),
            ctime_nsec: md.ctime_nsec(),
        }
    }

    #[cfg(not(unix))]
    pub fn from_metadata(md: &Metadata) -> Self {
        use std::time::UNIX_EPOCH;
        let secs = |t: std::io::Result<std::time::SystemTime>| {
            t.ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| (d.as_secs() as i64, d.subsec_nanos() as i64))
                .unwrap_or((0, 0))
        };
        let (atime, atime_nsec) = secs(md.accessed());
        let (mtime, mtime_nsec) = secs(md.modified());
        let (ctime, ctime_nsec) = secs(md.created());
        FileStat {
            mode: if md.is_dir() { 0o040755 } else { 0o100644 },
            nlink: 1,
            size: md.len(),
            atime,
            atime_nsec,
            mtime,
            mtime_nsec,
            ctime,
            ctime_nsec,
            ..Default::default()
        }
    }

    pub fn is_dir(&self) -> bool {
        self.mode & 0o170000 == 0o040000
    }

    /// Fixed-size wire form. `path` only labels the error.
    pub fn to_bytes(&self, path: &str) -> FileResult<Vec<u8>> {
        let bytes = bincode::serialize(self).map_err(|e| FileError::Io {
            path: path.to_string(),
            reason: format!("encode stat: {e}"),
        })?;
        if bytes.len() != ENCODED_LEN {
            return Err(FileError::Io {
                path: path.to_string(),
                reason: format!("stat encoded to {} bytes, expected {}", bytes.len(), ENCODED_LEN),
            });
        }
        Ok(bytes)
    }

    pub fn from_bytes(name: &str, bytes: &[u8]) -> FileResult<Self> {
        let malformed = |reason: String| FileError::MalformedPeerResponse {
            name: name.to_string(),
            reason,
        };
        if bytes.len() != ENCODED_LEN {
            return Err(malformed(format!(
                "stat payload is {} bytes, expected {}",
                bytes.len(),
                ENCODED_LEN
            )));
        }
        bincode::deserialize(bytes).map_err(|e| malformed(e.to_string()))
    }
}
