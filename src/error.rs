//! Error taxonomy for remote file operations.
//!
//! Every variant maps to a negative return code so that a producer can carry
//! the failure inside a well-formed integer response, and a consumer can turn
//! that integer back into a variant for diagnostics.

use thiserror::Error;

/// Return code for a successful control operation.
pub const SUCCESS: i64 = 0;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FileError {
    /// Path has no entry in the producer's handle table.
    #[error("not found: {path}")]
    NotFound { path: String },

    /// The producer could not open the local file.
    #[error("failed to open {path}: {reason}")]
    OpenFailed { path: String, reason: String },

    /// Close on a path that was never opened.
    #[error("not open: {path}")]
    NotOpen { path: String },

    /// Entry existed but its handle had already been released.
    #[error("already closed: {path}")]
    AlreadyClosed { path: String },

    /// Local I/O failed on an open handle (seek, read or stat).
    #[error("i/o error on {path}: {reason}")]
    Io { path: String, reason: String },

    /// Timeouts or negative acknowledgments exhausted the retry budget.
    #[error("delivery failed for {name} after {attempts} attempt(s)")]
    TransientDelivery { name: String, attempts: u32 },

    /// A read call ran past its overall deadline.
    #[error("read of {path} timed out after {timeout_ms} ms")]
    DeadlineExceeded { path: String, timeout_ms: u64 },

    /// Response content did not have the expected type or shape.
    #[error("malformed response for {name}: {reason}")]
    MalformedPeerResponse { name: String, reason: String },

    /// A read delivered some segments, then hit an unrecoverable one.
    #[error("read of {path} failed at segment {segment} after {delivered} byte(s) (code {code})")]
    PartialSegmentFailure {
        path: String,
        segment: u64,
        delivered: usize,
        code: i64,
    },
}

impl FileError {
    /// Negative return code mirroring the errno of the local analogue.
    pub fn code(&self) -> i64 {
        match self {
            FileError::OpenFailed { .. } => -1,
            FileError::NotFound { .. } => -2,
            FileError::Io { .. } | FileError::PartialSegmentFailure { .. } => -5,
            FileError::NotOpen { .. } | FileError::AlreadyClosed { .. } => -9,
            FileError::MalformedPeerResponse { .. } => -71,
            FileError::TransientDelivery { .. } | FileError::DeadlineExceeded { .. } => -110,
        }
    }

    /// Rebuild an error from a negative code received from a producer.
    pub fn from_code(code: i64, path: &str) -> Self {
        let path = path.to_string();
        match code {
            -1 => FileError::OpenFailed {
                path,
                reason: "remote open failed".to_string(),
            },
            -2 => FileError::NotFound { path },
            -9 => FileError::NotOpen { path },
            _ => FileError::Io {
                path,
                reason: format!("remote error code {code}"),
            },
        }
    }

    /// True for failures worth retrying at the transport level.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FileError::TransientDelivery { .. } | FileError::DeadlineExceeded { .. }
        )
    }
}

pub type FileResult<T> = std::result::Result<T, FileError>;
