//! One resolver session: settings, object cache and configuration tree,
//! opened together and flushed together.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use strata_cache::{CacheOptions, Clock, FlushStats, ObjectCache, SystemClock};
use tracing::{debug, info};

use crate::config::{discover_pools, Config, ConfigError, ConfigOptions, ConfigResult};
use crate::settings::Settings;

/// Owns the cache for the length of a session and hands out the
/// configuration built through it.
#[derive(Debug)]
pub struct Runtime {
    settings: Settings,
    cache: Option<ObjectCache>,
    config: Config,
}

impl Runtime {
    pub fn open(settings: Settings) -> ConfigResult<Self> {
        Self::open_with_clock(settings, Arc::new(SystemClock))
    }

    /// Open with a custom time source for cache expiry.
    pub fn open_with_clock(settings: Settings, clock: Arc<dyn Clock>) -> ConfigResult<Self> {
        let config_dir = settings.config_dir();
        if !config_dir.is_dir() {
            return Err(ConfigError::DirectoryMissing(config_dir.to_path_buf()));
        }

        let pools = if settings.pools().is_empty() {
            discover_pools(config_dir)?
        } else {
            settings.pools().to_vec()
        };
        debug!(?pools, "configuration pools");

        let mut cache = if settings.cache_enabled() {
            Some(open_cache(&settings, clock)?)
        } else {
            None
        };

        let options = ConfigOptions {
            strict: settings.strict(),
            cache_ttl: settings.config_ttl(),
        };
        let config = Config::load(config_dir, pools, cache.as_mut(), options)?;
        info!(origin = ?config.origin(), pools = config.pools().len(), "configuration ready");

        Ok(Self {
            settings,
            cache,
            config,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Mutable access for placeholder bindings.
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn pools(&self) -> &[String] {
        self.config.pools()
    }

    /// The session cache, unless caching is disabled.
    pub fn cache_mut(&mut self) -> Option<&mut ObjectCache> {
        self.cache.as_mut()
    }

    /// End the session, writing pending cache changes to disk.
    pub fn finish(self) -> ConfigResult<Option<FlushStats>> {
        match self.cache {
            Some(cache) => Ok(Some(cache.close()?)),
            None => Ok(None),
        }
    }
}

fn open_cache(settings: &Settings, clock: Arc<dyn Clock>) -> ConfigResult<ObjectCache> {
    let var_dir = settings.var_dir();
    ensure_dir(var_dir)?;

    let options = CacheOptions::default()
        .strict(settings.strict())
        .with_lock_timeout(settings.lock_timeout())
        .with_clock(clock);
    Ok(ObjectCache::open(var_dir, options)?)
}

fn ensure_dir(dir: &Path) -> ConfigResult<()> {
    fs::create_dir_all(dir).map_err(|e| ConfigError::Io {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    })
}
