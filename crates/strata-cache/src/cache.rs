//! Write-back object cache.
//!
//! Values are held in an in-memory hot layer and reach disk only when the
//! owner flushes (or when saved with `immediate`). Layout under the var
//! directory:
//!
//! ```text
//! <var>/cache/cacheinfo.json   index of object id -> {store, expiry}
//! <var>/cache/objects/<hash>   one JSON blob per object
//! <var>/cache/.strata.lock     advisory lock for cross-process writers
//! ```
//!
//! One owner drives a cache through `&mut self` and flushes it once at the
//! end of its scope. Sharing an instance between overlapping scopes is the
//! caller's responsibility.

use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{CacheError, CacheResult};
use crate::index::{CacheEntry, CacheIndex};
use crate::lock::WriteGuard;
use crate::store::BlobStore;

/// Cache behaviour switches.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Surface recoverable I/O and lookup failures as errors instead of
    /// degrading to defaults.
    pub strict: bool,
    /// Maximum wait for the cross-process write lock
    pub lock_timeout: Duration,
    /// Time source for expiry
    pub clock: Arc<dyn Clock>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            strict: false,
            lock_timeout: Duration::from_secs(10),
            clock: Arc::new(SystemClock),
        }
    }
}

impl CacheOptions {
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }
}

/// Outcome of a flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    /// Blobs written to disk
    pub written: usize,
    /// Dirty objects that could not be written (non-strict only)
    pub dropped: usize,
    /// Whether the index file was rewritten
    pub index_written: bool,
}

/// Keyed object cache with deferred persistence.
pub struct ObjectCache {
    root: PathBuf,
    store: BlobStore,
    options: CacheOptions,
    /// Live index, including unflushed changes
    index: CacheIndex,
    /// Index as last written to disk
    persisted: CacheIndex,
    /// Deserialized values by object id
    hot: HashMap<String, Value>,
    dirty: BTreeSet<String>,
    index_dirty: bool,
}

impl ObjectCache {
    pub const CACHE_DIRNAME: &'static str = "cache";
    pub const OBJECTS_DIRNAME: &'static str = "objects";
    pub const INDEX_FILENAME: &'static str = "cacheinfo.json";

    /// Open the cache stored under `var_dir`.
    ///
    /// `var_dir` must exist and be writable. The cache layout is created on
    /// first use. An unreadable index is an error in strict mode and an
    /// empty cache otherwise.
    pub fn open(var_dir: impl AsRef<Path>, options: CacheOptions) -> CacheResult<Self> {
        let var_dir = var_dir.as_ref();
        if !var_dir.is_dir() {
            return Err(CacheError::DirectoryMissing(var_dir.to_path_buf()));
        }
        Self::check_writable(var_dir)?;

        let root = var_dir.join(Self::CACHE_DIRNAME);
        let objects_dir = root.join(Self::OBJECTS_DIRNAME);
        let index_path = root.join(Self::INDEX_FILENAME);

        let index = if root.is_dir() {
            if !objects_dir.is_dir() {
                fs::create_dir_all(&objects_dir).map_err(|e| CacheError::io(&objects_dir, e))?;
            }
            match CacheIndex::read(&index_path) {
                Ok(index) => index,
                Err(e) if options.strict => return Err(e),
                Err(e) => {
                    warn!(error = %e, "cache index unreadable, starting empty");
                    CacheIndex::default()
                }
            }
        } else {
            Self::prepare(&objects_dir, &index_path)?;
            CacheIndex::default()
        };

        debug!(
            root = %root.display(),
            objects = index.objects.len(),
            strict = options.strict,
            "opened object cache"
        );

        Ok(Self {
            store: BlobStore::new(objects_dir),
            root,
            options,
            persisted: index.clone(),
            index,
            hot: HashMap::new(),
            dirty: BTreeSet::new(),
            index_dirty: false,
        })
    }

    /// Open a cache, run `f` against it, then flush.
    ///
    /// The flush happens whether or not `f` succeeded; an error from `f`
    /// takes precedence over a flush error.
    pub fn scope<R, E, F>(var_dir: impl AsRef<Path>, options: CacheOptions, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut ObjectCache) -> Result<R, E>,
        E: From<CacheError>,
    {
        let mut cache = Self::open(var_dir, options)?;
        let result = f(&mut cache);
        let flushed = cache.close();
        match (result, flushed) {
            (Err(e), _) => Err(e),
            (Ok(_), Err(e)) => Err(e.into()),
            (Ok(value), Ok(_)) => Ok(value),
        }
    }

    fn check_writable(var_dir: &Path) -> CacheResult<()> {
        let probe = var_dir.join(".strata_write_test");
        File::create(&probe).map_err(|_| CacheError::Unwritable(var_dir.to_path_buf()))?;
        fs::remove_file(&probe).map_err(|e| CacheError::io(&probe, e))
    }

    fn prepare(objects_dir: &Path, index_path: &Path) -> CacheResult<()> {
        fs::create_dir_all(objects_dir).map_err(|e| CacheError::io(objects_dir, e))?;
        CacheIndex::default().write(index_path)?;
        info!(path = %index_path.display(), "initialised object cache");
        Ok(())
    }

    /// Route a recoverable failure: strict mode returns it, non-strict mode
    /// logs it and continues with `T::default()`.
    fn degrade<T: Default>(&self, result: CacheResult<T>, context: &str) -> CacheResult<T> {
        match result {
            Ok(value) => Ok(value),
            Err(e) if self.options.strict => Err(e),
            Err(e) => {
                warn!(error = %e, "{}", context);
                Ok(T::default())
            }
        }
    }

    /// Current time according to the configured clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.options.clock.now()
    }

    /// Expiry timestamp `ttl` from now, or `None` (never expires) when that
    /// lies beyond the representable range.
    pub fn expires_in(&self, ttl: chrono::Duration) -> Option<DateTime<Utc>> {
        self.now().checked_add_signed(ttl)
    }

    /// Exclusive cross-process write access to the cache root.
    fn lock(&self) -> CacheResult<WriteGuard> {
        WriteGuard::wait(&self.root, self.options.lock_timeout)
    }

    /// Forget an unwritten change to `object_id`: fall back to the last
    /// persisted entry, or drop the object when it never reached disk.
    fn discard(&mut self, object_id: &str) {
        self.hot.remove(object_id);
        self.dirty.remove(object_id);
        match self.persisted.objects.get(object_id) {
            Some(entry) => {
                self.index.objects.insert(object_id.to_string(), entry.clone());
            }
            None => {
                self.index.objects.remove(object_id);
            }
        }
    }

    /// Store `value` under `object_id`.
    ///
    /// An `expiry` that is not in the future is stored as "never expires".
    /// Expiries are kept in whole seconds, rounded up.
    /// Without `immediate` the value is only durable after [`flush`].
    ///
    /// [`flush`]: ObjectCache::flush
    pub fn save<T: Serialize + ?Sized>(
        &mut self,
        object_id: &str,
        value: &T,
        expiry: Option<DateTime<Utc>>,
        immediate: bool,
    ) -> CacheResult<()> {
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                let err = CacheError::Encode {
                    id: object_id.to_string(),
                    reason: e.to_string(),
                };
                return self.degrade(Err(err), "dropping unserializable cache object");
            }
        };

        let now = self.now();
        let expiry = expiry.filter(|at| *at > now).and_then(whole_seconds);
        let entry = CacheEntry::new(object_id, expiry);

        self.index.objects.insert(object_id.to_string(), entry.clone());
        self.hot.insert(object_id.to_string(), value);
        self.index_dirty = true;

        if immediate {
            let persisted = self.persist_now(object_id, &entry);
            if persisted.is_err() {
                self.dirty.insert(object_id.to_string());
            }
            self.degrade(persisted, "immediate cache write failed, deferred to flush")
        } else {
            self.dirty.insert(object_id.to_string());
            Ok(())
        }
    }

    /// Write one object and an index that includes it, under the lock.
    fn persist_now(&mut self, object_id: &str, entry: &CacheEntry) -> CacheResult<()> {
        let value = self
            .hot
            .get(object_id)
            .ok_or_else(|| CacheError::EntryMissing(object_id.to_string()))?;
        let _guard = self.lock()?;

        self.store.write(&entry.store, value)?;
        self.persisted
            .objects
            .insert(object_id.to_string(), entry.clone());
        self.persisted.write(&self.index_path())?;
        self.dirty.remove(object_id);

        debug!(id = object_id, "cache object persisted immediately");
        Ok(())
    }

    /// Load the object stored under `object_id`.
    ///
    /// Returns `None` for unknown or expired ids (expired entries are
    /// evicted). Blob read and decode failures are errors in strict mode and
    /// `None` otherwise.
    pub fn load<T: DeserializeOwned>(&mut self, object_id: &str) -> CacheResult<Option<T>> {
        let Some(entry) = self.index.objects.get(object_id).cloned() else {
            return Ok(None);
        };

        if entry.is_expired(self.now()) {
            debug!(id = object_id, "cache object expired");
            self.evict(object_id)?;
            return Ok(None);
        }

        if !self.hot.contains_key(object_id) {
            let read = self.store.read(&entry.store).map(Some);
            match self.degrade(read, "cache object unreadable")? {
                Some(value) => {
                    self.hot.insert(object_id.to_string(), value);
                }
                None => return Ok(None),
            }
        }

        let Some(value) = self.hot.get(object_id) else {
            return Ok(None);
        };
        let decoded = serde_json::from_value::<T>(value.clone())
            .map(Some)
            .map_err(|e| CacheError::Decode {
                id: object_id.to_string(),
                reason: e.to_string(),
            });
        self.degrade(decoded, "cache object has an unexpected shape")
    }

    /// Load `object_id`, falling back to `default`.
    pub fn load_or<T: DeserializeOwned>(&mut self, object_id: &str, default: T) -> CacheResult<T> {
        Ok(self.load(object_id)?.unwrap_or(default))
    }

    /// Remove `object_id` from the cache and delete its blob.
    ///
    /// Unknown ids are an error in strict mode and `Ok(false)` otherwise.
    /// The index change is written at the next flush.
    pub fn evict(&mut self, object_id: &str) -> CacheResult<bool> {
        let Some(entry) = self.index.objects.remove(object_id) else {
            let missing = Err(CacheError::EntryMissing(object_id.to_string()));
            return self.degrade(missing, "evicting unknown cache object");
        };

        self.hot.remove(object_id);
        self.dirty.remove(object_id);
        self.persisted.objects.remove(object_id);
        self.index_dirty = true;

        let removed = self.store.remove(&entry.store);
        self.degrade(removed, "cache blob could not be deleted")?;
        debug!(id = object_id, "cache object evicted");
        Ok(true)
    }

    /// Evict every entry whose expiry has passed. Returns the number evicted.
    ///
    /// Expiry is otherwise only enforced when an entry is read; this sweep
    /// runs only when called.
    pub fn purge_expired(&mut self) -> CacheResult<usize> {
        let now = self.now();
        let expired: Vec<String> = self
            .index
            .objects
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(id, _)| id.clone())
            .collect();

        let mut evicted = 0;
        for id in expired {
            if self.evict(&id)? {
                evicted += 1;
            }
        }
        if evicted > 0 {
            info!(evicted, "purged expired cache objects");
        }
        Ok(evicted)
    }

    /// Persist every dirty object and rewrite the index.
    pub fn flush(&mut self) -> CacheResult<FlushStats> {
        let mut stats = FlushStats::default();
        if !self.has_unflushed_changes() {
            return Ok(stats);
        }

        let guard = match self.lock() {
            Ok(guard) => guard,
            Err(e) if self.options.strict => return Err(e),
            Err(e) => {
                let pending: Vec<String> = self.dirty.iter().cloned().collect();
                stats.dropped = pending.len();
                warn!(error = %e, dropped = stats.dropped, "cache flush skipped, lock unavailable");
                for id in &pending {
                    self.discard(id);
                }
                return Ok(stats);
            }
        };

        let pending: Vec<String> = self.dirty.iter().cloned().collect();
        for id in pending {
            let (Some(entry), Some(value)) = (self.index.objects.get(&id), self.hot.get(&id))
            else {
                self.dirty.remove(&id);
                continue;
            };

            match self.store.write(&entry.store, value) {
                Ok(()) => stats.written += 1,
                Err(e) if self.options.strict => return Err(e),
                Err(e) => {
                    warn!(id = %id, error = %e, "dropping cache object that could not be written");
                    self.discard(&id);
                    stats.dropped += 1;
                    continue;
                }
            }
            self.dirty.remove(&id);
        }

        let written = self.index.write(&self.index_path());
        stats.index_written = written.is_ok();
        self.degrade(written, "cache index could not be written")?;
        if stats.index_written {
            self.persisted = self.index.clone();
        }
        self.index_dirty = false;
        drop(guard);

        debug!(
            written = stats.written,
            dropped = stats.dropped,
            "cache flushed"
        );
        Ok(stats)
    }

    /// Flush and release the cache.
    pub fn close(mut self) -> CacheResult<FlushStats> {
        self.flush()
    }

    /// Root of the cache layout (`<var>/cache`).
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(Self::INDEX_FILENAME)
    }

    pub fn is_strict(&self) -> bool {
        self.options.strict
    }

    pub fn contains(&self, object_id: &str) -> bool {
        self.index.objects.contains_key(object_id)
    }

    pub fn entry(&self, object_id: &str) -> Option<&CacheEntry> {
        self.index.objects.get(object_id)
    }

    /// Known object ids in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.index.objects.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.index.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.objects.is_empty()
    }

    /// Whether `object_id` has changes that have not reached disk.
    pub fn is_dirty(&self, object_id: &str) -> bool {
        self.dirty.contains(object_id)
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    /// Whether a flush would write anything: dirty objects or index changes
    /// such as evictions.
    pub fn has_unflushed_changes(&self) -> bool {
        !self.dirty.is_empty() || self.index_dirty
    }
}

/// Round an expiry up to the whole second the index can represent.
fn whole_seconds(at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let carry = i64::from(at.timestamp_subsec_nanos() > 0);
    DateTime::from_timestamp(at.timestamp().checked_add(carry)?, 0)
}

impl Drop for ObjectCache {
    fn drop(&mut self) {
        if self.has_unflushed_changes() {
            warn!(
                unflushed = self.dirty.len(),
                index_changed = self.index_dirty,
                root = %self.root.display(),
                "object cache dropped without flush, changes discarded"
            );
        }
    }
}

impl std::fmt::Debug for ObjectCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectCache")
            .field("root", &self.root)
            .field("objects", &self.index.objects.len())
            .field("dirty", &self.dirty.len())
            .field("strict", &self.options.strict)
            .finish()
    }
}
