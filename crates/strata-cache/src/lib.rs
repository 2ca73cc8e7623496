//! Keyed object cache with an in-memory hot layer and deferred, batched
//! persistence to disk.
//!
//! Objects are identified by a string id, stored as JSON blobs named by the
//! SHA-256 of that id, and may carry an expiry that is enforced when the
//! object is read. Changes reach disk when the owner calls
//! [`ObjectCache::flush`] (or [`ObjectCache::close`]), or right away for
//! saves flagged `immediate`.
//!
//! ```no_run
//! use strata_cache::{CacheOptions, ObjectCache};
//!
//! # fn main() -> Result<(), strata_cache::CacheError> {
//! let mut cache = ObjectCache::open("var", CacheOptions::default())?;
//! cache.save("greeting", "hello", None, false)?;
//! let greeting: Option<String> = cache.load("greeting")?;
//! cache.close()?;
//! # Ok(())
//! # }
//! ```

mod cache;
mod clock;
mod error;
mod index;
mod lock;
mod store;

pub use cache::{CacheOptions, FlushStats, ObjectCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CacheError, CacheResult};
pub use index::{storage_hash, CacheEntry, CacheIndex};
