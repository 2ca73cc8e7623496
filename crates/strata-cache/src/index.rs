//! Persisted cache index (`cacheinfo.json`).
//!
//! Layout:
//!
//! ```json
//! {"cache": {"objects": {"<object id>": {"store": "<hash>", "expiry": 1700000000}}}}
//! ```
//!
//! `expiry` is a unix timestamp in seconds, or `null` for entries that never
//! expire.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CacheError, CacheResult};
use crate::store::write_atomic;

/// Index entry for one cached object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Blob name under the objects directory
    pub store: String,
    /// When the entry stops being served, `None` for never
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub expiry: Option<DateTime<Utc>>,
}

impl CacheEntry {
    pub fn new(object_id: &str, expiry: Option<DateTime<Utc>>) -> Self {
        Self {
            store: storage_hash(object_id),
            expiry,
        }
    }

    /// An entry is expired once `now` reaches its expiry.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|expiry| expiry <= now)
    }
}

/// Blob name for an object id.
///
/// Derived from the id rather than the value so an object keeps its blob
/// while its contents change.
pub fn storage_hash(object_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(object_id.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    cache: CacheIndex,
}

/// Mapping of object id to entry, as stored on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheIndex {
    #[serde(default)]
    pub objects: BTreeMap<String, CacheEntry>,
}

impl CacheIndex {
    /// Read and parse an index file.
    pub fn read(path: &Path) -> CacheResult<Self> {
        let contents = fs::read_to_string(path).map_err(|e| CacheError::io(path, e))?;
        let file: IndexFile =
            serde_json::from_str(&contents).map_err(|e| CacheError::CorruptIndex {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        Ok(file.cache)
    }

    /// Replace the index file at `path` with this index.
    pub fn write(&self, path: &Path) -> CacheResult<()> {
        let body = serde_json::to_vec(&IndexFileRef { cache: self }).map_err(|e| {
            CacheError::io(path, io::Error::new(io::ErrorKind::InvalidData, e))
        })?;
        write_atomic(path, &body)
    }
}

#[derive(Serialize)]
struct IndexFileRef<'a> {
    cache: &'a CacheIndex,
}
