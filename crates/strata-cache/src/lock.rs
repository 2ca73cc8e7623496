//! Cross-process write guard for one cache root.
//!
//! Blob and index writes happen while an exclusive `flock` on
//! `<cache>/.strata.lock` is held. Without `flock` a create-exclusive marker
//! file stands in.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{CacheError, CacheResult};

pub(crate) const LOCK_FILENAME: &str = ".strata.lock";

const RETRY_EVERY: Duration = Duration::from_millis(20);
const REPORT_AFTER: Duration = Duration::from_millis(250);

/// Held for the span of a write; dropping it lets other writers in.
#[derive(Debug)]
pub(crate) struct WriteGuard {
    file: File,
    #[cfg(not(unix))]
    marker: std::path::PathBuf,
}

impl WriteGuard {
    /// Wait until `root` can be written, giving up after `timeout`.
    pub(crate) fn wait(root: &Path, timeout: Duration) -> CacheResult<Self> {
        let path = root.join(LOCK_FILENAME);
        let started = Instant::now();
        let mut reported = false;

        loop {
            if let Some(guard) = Self::try_take(&path).map_err(|e| CacheError::io(&path, e))? {
                if reported {
                    debug!(path = %path.display(), "cache write lock released by other writer");
                }
                return Ok(guard);
            }

            let waited = started.elapsed();
            if waited >= timeout {
                return Err(CacheError::LockTimeout { path, timeout });
            }
            if !reported && waited >= REPORT_AFTER {
                warn!(path = %path.display(), "another process is writing the cache, waiting");
                reported = true;
            }
            thread::sleep(RETRY_EVERY.min(timeout - waited));
        }
    }

    #[cfg(unix)]
    fn try_take(path: &Path) -> io::Result<Option<Self>> {
        use std::os::unix::io::AsRawFd;

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;

        // SAFETY: `file` owns the descriptor for the duration of the call.
        if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } == 0 {
            return Ok(Some(Self { file }));
        }
        match io::Error::last_os_error() {
            e if e.raw_os_error() == Some(libc::EWOULDBLOCK) => Ok(None),
            e => Err(e),
        }
    }

    #[cfg(not(unix))]
    fn try_take(path: &Path) -> io::Result<Option<Self>> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => Ok(Some(Self {
                file,
                marker: path.to_path_buf(),
            })),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            // SAFETY: `self.file` still owns the descriptor.
            unsafe {
                libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = std::fs::remove_file(&self.marker);
        }
    }
}
