//! Effective settings with provenance
//!
//! Layers, lowest precedence first:
//! 1. built-in defaults
//! 2. `<base>/strata.toml`, when present
//! 3. command line overrides
//!
//! Layers deep-merge by key; arrays and scalars from a later layer replace
//! the earlier value outright.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::defaults::BuiltinDefaults;
use super::{SettingsError, SettingsResult};

/// Settings file looked up in the base directory.
pub const SETTINGS_FILENAME: &str = "strata.toml";

/// Upper bound for the cache durations (one year).
pub const MAX_DURATION_SECONDS: u64 = 365 * 24 * 60 * 60;

/// Where a settings layer came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SettingsOrigin {
    Builtin,
    File,
    Cli,
}

/// A contributing layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsSource {
    pub origin: SettingsOrigin,

    /// File path (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 digest of raw file bytes (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CacheSection {
    enabled: bool,
    config_ttl_seconds: u64,
    lock_timeout_seconds: u64,
}

#[derive(Debug, Deserialize)]
struct SettingsLayer {
    config_dir: PathBuf,
    var_dir: PathBuf,
    strict: bool,
    pools: Vec<String>,
    cache: CacheSection,
}

/// Resolved settings for one base directory.
#[derive(Debug, Clone)]
pub struct Settings {
    base_dir: PathBuf,
    config_dir: PathBuf,
    var_dir: PathBuf,
    strict: bool,
    pools: Vec<String>,
    cache_enabled: bool,
    config_ttl_seconds: u64,
    lock_timeout_seconds: u64,
    merged: Value,
    sources: Vec<SettingsSource>,
}

impl Settings {
    /// Resolve settings for `base_dir`, reading `strata.toml` when it exists.
    pub fn build(base_dir: impl AsRef<Path>, cli_overrides: Option<Value>) -> SettingsResult<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        let mut layers = Vec::new();
        let mut sources = Vec::new();

        layers.push(BuiltinDefaults::default().to_value());
        sources.push(SettingsSource {
            origin: SettingsOrigin::Builtin,
            path: None,
            digest: None,
        });

        let file = base_dir.join(SETTINGS_FILENAME);
        if file.exists() {
            let (value, digest) = load_toml_file(&file)?;
            debug!(path = %file.display(), %digest, "settings file loaded");
            layers.push(value);
            sources.push(SettingsSource {
                origin: SettingsOrigin::File,
                path: Some(file.to_string_lossy().to_string()),
                digest: Some(digest),
            });
        }

        if let Some(cli) = cli_overrides {
            layers.push(cli);
            sources.push(SettingsSource {
                origin: SettingsOrigin::Cli,
                path: None,
                digest: None,
            });
        }

        let merged = layers.into_iter().fold(Value::Null, overlay);
        let layer: SettingsLayer = serde_json::from_value(merged.clone())
            .map_err(|e| SettingsError::Invalid(e.to_string()))?;
        validate(&layer)?;

        Ok(Self {
            config_dir: base_dir.join(&layer.config_dir),
            var_dir: base_dir.join(&layer.var_dir),
            base_dir,
            strict: layer.strict,
            pools: layer.pools,
            cache_enabled: layer.cache.enabled,
            config_ttl_seconds: layer.cache.config_ttl_seconds,
            lock_timeout_seconds: layer.cache.lock_timeout_seconds,
            merged,
            sources,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn var_dir(&self) -> &Path {
        &self.var_dir
    }

    pub fn strict(&self) -> bool {
        self.strict
    }

    /// Explicit pool order. Empty means every directory under the
    /// configuration directory, in name order.
    pub fn pools(&self) -> &[String] {
        &self.pools
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache_enabled
    }

    pub fn config_ttl(&self) -> Duration {
        i64::try_from(self.config_ttl_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or_else(|| Duration::seconds(MAX_DURATION_SECONDS as i64))
    }

    pub fn lock_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.lock_timeout_seconds)
    }

    /// The merged layers, as deserialized.
    pub fn merged(&self) -> &Value {
        &self.merged
    }

    /// Contributing layers in precedence order
    pub fn sources(&self) -> &[SettingsSource] {
        &self.sources
    }
}

/// Deep merge `top` over `base`: objects merge by key, everything else is
/// replaced.
fn overlay(base: Value, top: Value) -> Value {
    match (base, top) {
        (Value::Object(mut base_map), Value::Object(top_map)) => {
            for (key, value) in top_map {
                let merged = match base_map.remove(&key) {
                    Some(existing) => overlay(existing, value),
                    None => value,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, top) => top,
    }
}

fn validate(layer: &SettingsLayer) -> SettingsResult<()> {
    let durations = [
        ("cache.config_ttl_seconds", layer.cache.config_ttl_seconds),
        ("cache.lock_timeout_seconds", layer.cache.lock_timeout_seconds),
    ];
    for (key, seconds) in durations {
        if seconds == 0 || seconds > MAX_DURATION_SECONDS {
            return Err(SettingsError::Invalid(format!(
                "{key} must be in (0, {MAX_DURATION_SECONDS}]"
            )));
        }
    }
    if let Some(pool) = layer
        .pools
        .iter()
        .find(|p| p.is_empty() || p.contains(['/', '\\']) || p.as_str() == "..")
    {
        return Err(SettingsError::Invalid(format!(
            "pool name {pool:?} must be a plain directory name"
        )));
    }
    Ok(())
}

/// Load a TOML file, returning it as JSON plus the digest of its bytes.
fn load_toml_file(path: &Path) -> SettingsResult<(Value, String)> {
    let bytes = fs::read(path).map_err(|e| SettingsError::Io {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let digest = hex::encode(Sha256::digest(&bytes));

    let contents = String::from_utf8(bytes).map_err(|e| SettingsError::Parse {
        path: path.to_path_buf(),
        reason: format!("invalid UTF-8: {e}"),
    })?;
    let table: toml::Value = toml::from_str(&contents).map_err(|e| SettingsError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    Ok((toml_to_json(table), digest))
}

fn toml_to_json(toml: toml::Value) -> Value {
    match toml {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Number(i.into()),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}
