//! Blob storage for cached objects.
//!
//! One JSON file per object under `<cache>/objects/<hash>`. All writes go
//! through write-to-temp-then-rename so a reader never observes a partial
//! blob.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde_json::Value;

use crate::error::{CacheError, CacheResult};

/// Directory of object blobs.
#[derive(Debug, Clone)]
pub struct BlobStore {
    objects_dir: PathBuf,
}

impl BlobStore {
    pub fn new(objects_dir: PathBuf) -> Self {
        Self { objects_dir }
    }

    pub fn path(&self, hash: &str) -> PathBuf {
        self.objects_dir.join(hash)
    }

    pub fn exists(&self, hash: &str) -> bool {
        self.path(hash).is_file()
    }

    pub fn write(&self, hash: &str, value: &Value) -> CacheResult<()> {
        let path = self.path(hash);
        let bytes = serde_json::to_vec(value)
            .map_err(|e| CacheError::io(&path, io::Error::new(io::ErrorKind::InvalidData, e)))?;
        write_atomic(&path, &bytes)
    }

    pub fn read(&self, hash: &str) -> CacheResult<Value> {
        let path = self.path(hash);
        let bytes = fs::read(&path).map_err(|e| CacheError::io(&path, e))?;
        serde_json::from_slice(&bytes).map_err(|e| CacheError::Decode {
            id: hash.to_string(),
            reason: e.to_string(),
        })
    }

    /// Delete a blob. A blob that is already gone is not an error.
    pub fn remove(&self, hash: &str) -> CacheResult<()> {
        let path = self.path(hash);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::io(path, e)),
        }
    }
}

/// Write `bytes` to `path` via a temp file in the same directory and a rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> CacheResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = dir.join(format!(
        ".tmp.{}.{}.{}",
        file_name,
        std::process::id(),
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0)
    ));

    let written = File::create(&temp_path).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });
    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(CacheError::io(&temp_path, e));
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(CacheError::io(path, e));
    }
    Ok(())
}
