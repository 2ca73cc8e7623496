//! Layered configuration tree
//!
//! Builds one tree out of every pool under the configuration directory:
//! 1. Pools are read in priority order (later pools override earlier ones)
//! 2. Within a pool, fragments are read in file-name order, with same-named
//!    directories extending a fragment's subtree
//! 3. The merged tree is memoized in the object cache under [`CACHE_ENTRY_ID`]
//!
//! Reads go through [`Config::get_config`] and friends, which evaluate
//! `strata_path` expressions against the tree.

mod loader;
mod merge;

pub use loader::{discover_pools, load_pool, FRAGMENT_EXTENSION};
pub use merge::{merge_into, merge_layers, NAME_KEY};

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strata_cache::{CacheError, ObjectCache};
use strata_path::{ConfigPath, QueryError};
use tracing::{debug, info};

/// Object cache id of the memoized tree.
pub const CACHE_ENTRY_ID: &str = "config";

/// How long a memoized tree is served before the pools are read again.
pub const DEFAULT_CACHE_TTL_SECONDS: i64 = 300;

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration directory does not exist: {0}")]
    DirectoryMissing(PathBuf),

    #[error("configuration directory for pool {pool} is missing: {path}")]
    SourceMissing { pool: String, path: PathBuf },

    #[error("invalid configuration fragment {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("cannot read {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("invalid configuration path: {0}")]
    QuerySyntax(#[from] QueryError),

    #[error("no configuration value at {0}")]
    MissingKey(String),

    #[error("configuration value at {path} has an unexpected shape: {reason}")]
    Decode { path: String, reason: String },

    #[error("object cache error: {0}")]
    Cache(#[from] CacheError),
}

/// Options for building a [`Config`].
#[derive(Debug, Clone)]
pub struct ConfigOptions {
    /// Fail on malformed fragments and path syntax errors instead of
    /// skipping them / returning nothing.
    pub strict: bool,
    /// Lifetime of the memoized tree in the object cache
    pub cache_ttl: Duration,
}

impl Default for ConfigOptions {
    fn default() -> Self {
        Self {
            strict: false,
            cache_ttl: Duration::seconds(DEFAULT_CACHE_TTL_SECONDS),
        }
    }
}

/// Where the tree of a [`Config`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeOrigin {
    Cache,
    Sources,
}

/// Memoized tree, tagged with the inputs it was built from.
#[derive(Debug, Serialize, Deserialize)]
struct CachedTree {
    config_dir: PathBuf,
    pools: Vec<String>,
    tree: Value,
}

/// Merged configuration with path lookups.
#[derive(Debug, Clone)]
pub struct Config {
    config_dir: PathBuf,
    pools: Vec<String>,
    strict: bool,
    tree: Value,
    origin: TreeOrigin,
    bindings: HashMap<String, String>,
}

impl Config {
    /// Build the configuration for `pools` under `config_dir`.
    ///
    /// With a cache, a memoized tree for the same directory and pool list is
    /// reused; otherwise the pools are read and the result is saved back
    /// (deferred until the cache is flushed).
    pub fn load(
        config_dir: impl AsRef<Path>,
        pools: Vec<String>,
        cache: Option<&mut ObjectCache>,
        options: ConfigOptions,
    ) -> ConfigResult<Self> {
        let config_dir = config_dir.as_ref();
        let config_dir = config_dir
            .canonicalize()
            .map_err(|_| ConfigError::DirectoryMissing(config_dir.to_path_buf()))?;
        if !config_dir.is_dir() {
            return Err(ConfigError::DirectoryMissing(config_dir));
        }

        let (tree, origin) = match cache {
            Some(cache) => Self::load_cached(&config_dir, &pools, cache, &options)?,
            None => (
                build_tree(&config_dir, &pools, options.strict)?,
                TreeOrigin::Sources,
            ),
        };

        Ok(Self {
            config_dir,
            pools,
            strict: options.strict,
            tree,
            origin,
            bindings: HashMap::new(),
        })
    }

    fn load_cached(
        config_dir: &Path,
        pools: &[String],
        cache: &mut ObjectCache,
        options: &ConfigOptions,
    ) -> ConfigResult<(Value, TreeOrigin)> {
        if let Some(cached) = cache.load::<CachedTree>(CACHE_ENTRY_ID)? {
            if cached.config_dir == config_dir && cached.pools == pools && cached.tree.is_object() {
                debug!("configuration tree served from cache");
                return Ok((cached.tree, TreeOrigin::Cache));
            }
            debug!("cached configuration tree was built from other sources, rebuilding");
        }

        let tree = build_tree(config_dir, pools, options.strict)?;
        let entry = CachedTree {
            config_dir: config_dir.to_path_buf(),
            pools: pools.to_vec(),
            tree,
        };
        let expiry = cache.expires_in(options.cache_ttl);
        cache.save(CACHE_ENTRY_ID, &entry, expiry, false)?;
        Ok((entry.tree, TreeOrigin::Sources))
    }

    /// Wrap an already built tree.
    pub fn from_tree(tree: Value, strict: bool) -> Self {
        Self {
            config_dir: PathBuf::new(),
            pools: Vec::new(),
            strict,
            tree,
            origin: TreeOrigin::Sources,
            bindings: HashMap::new(),
        }
    }

    /// Look up `path` in the tree, or in `scope` when given.
    ///
    /// Without a path the whole tree (or scope) is returned. A malformed
    /// path is an error in strict mode and `None` otherwise. The result is a
    /// copy; the shared tree is never handed out mutably.
    pub fn get_config(&self, path: Option<&str>, scope: Option<&Value>) -> ConfigResult<Option<Value>> {
        let root = scope.unwrap_or(&self.tree);
        let Some(path) = path.filter(|p| !p.is_empty()) else {
            return Ok(Some(root.clone()));
        };

        match ConfigPath::parse(path) {
            Ok(parsed) => Ok(parsed.resolve_with(root, &self.bindings).cloned()),
            Err(e) if self.strict => Err(e.into()),
            Err(e) => {
                debug!(path, error = %e, "ignoring malformed configuration path");
                Ok(None)
            }
        }
    }

    /// Borrowing lookup. Malformed paths read as missing.
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.get_in(path, &self.tree)
    }

    /// Borrowing lookup relative to `scope`, typically a subtree returned
    /// by an earlier lookup.
    pub fn get_in<'a>(&'a self, path: &str, scope: &'a Value) -> Option<&'a Value> {
        ConfigPath::parse(path)
            .ok()?
            .resolve_with(scope, &self.bindings)
    }

    /// Lookup that treats a missing value as an error, in any mode.
    pub fn require(&self, path: &str) -> ConfigResult<&Value> {
        let parsed = ConfigPath::parse(path)?;
        parsed
            .resolve_with(&self.tree, &self.bindings)
            .ok_or_else(|| ConfigError::MissingKey(path.to_string()))
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.get(path).and_then(Value::as_bool)
    }

    pub fn get_u64(&self, path: &str) -> Option<u64> {
        self.get(path).and_then(Value::as_u64)
    }

    /// Deserialize the subtree at `path`.
    pub fn get_as<T: DeserializeOwned>(&self, path: &str) -> ConfigResult<Option<T>> {
        let Some(value) = self.get_config(Some(path), None)? else {
            return Ok(None);
        };
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| ConfigError::Decode {
                path: path.to_string(),
                reason: e.to_string(),
            })
    }

    /// Register a runtime value for `{name}` predicate placeholders, e.g. the
    /// current route once a request has been matched.
    pub fn bind(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.bindings.insert(name.into(), value.into());
    }

    pub fn unbind(&mut self, name: &str) {
        self.bindings.remove(name);
    }

    pub fn set_bindings(&mut self, bindings: HashMap<String, String>) {
        self.bindings = bindings;
    }

    pub fn tree(&self) -> &Value {
        &self.tree
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_dir
    }

    pub fn pools(&self) -> &[String] {
        &self.pools
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn origin(&self) -> TreeOrigin {
        self.origin
    }
}

/// Read and merge every pool, first to last, into a fresh tree.
pub fn build_tree(config_dir: &Path, pools: &[String], strict: bool) -> ConfigResult<Value> {
    let mut tree = Value::Object(Map::new());
    for pool in pools {
        let pool_tree = load_pool(&config_dir.join(pool), strict)?;
        merge_into(&mut tree, pool_tree);
    }
    info!(pools = pools.len(), dir = %config_dir.display(), "configuration tree built");
    Ok(tree)
}
