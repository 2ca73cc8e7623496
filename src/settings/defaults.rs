//! Built-in defaults (layer 1)

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Built-in values for every setting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Configuration directory, relative to the base directory (default: "config")
    pub config_dir: String,

    /// Variable data directory holding the cache (default: "var")
    pub var_dir: String,

    /// Fail on recoverable errors (default: false)
    pub strict: bool,

    /// Use the object cache (default: true)
    pub cache: bool,

    /// Lifetime of the cached configuration tree (default: 300 = 5 minutes)
    pub config_ttl_seconds: u64,

    /// Cache lock timeout in seconds (default: 10)
    pub lock_timeout_seconds: u64,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            config_dir: "config".to_string(),
            var_dir: "var".to_string(),
            strict: false,
            cache: true,
            config_ttl_seconds: 300,
            lock_timeout_seconds: 10,
        }
    }
}

impl BuiltinDefaults {
    /// Convert to a JSON layer. An empty pool list means "discover".
    pub fn to_value(&self) -> Value {
        json!({
            "config_dir": self.config_dir,
            "var_dir": self.var_dir,
            "strict": self.strict,
            "pools": [],
            "cache": {
                "enabled": self.cache,
                "config_ttl_seconds": self.config_ttl_seconds,
                "lock_timeout_seconds": self.lock_timeout_seconds
            }
        })
    }
}
