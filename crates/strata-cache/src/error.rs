//! Cache error taxonomy.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Cache result type
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors from object cache operations.
///
/// Every raw `io::Error` is wrapped together with the path it concerns so
/// nothing OS-level escapes the cache boundary unlabelled.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache directory does not exist: {0}")]
    DirectoryMissing(PathBuf),

    #[error("cache directory is not writable: {0}")]
    Unwritable(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("corrupt cache index {path}: {reason}")]
    CorruptIndex { path: PathBuf, reason: String },

    #[error("cannot encode cache object {id}: {reason}")]
    Encode { id: String, reason: String },

    #[error("cannot decode cache object {id}: {reason}")]
    Decode { id: String, reason: String },

    #[error("unknown cache object: {0}")]
    EntryMissing(String),

    #[error("timed out after {timeout:?} waiting for cache lock {path}")]
    LockTimeout { path: PathBuf, timeout: Duration },
}

impl CacheError {
    /// Wrap an `io::Error` with the path it occurred on.
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
