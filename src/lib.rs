//! Strata - layered configuration resolver
//!
//! Merges JSON configuration fragments from an ordered list of pools into a
//! single tree, answers path queries against it (`layout/routes/*/name=home`),
//! and memoizes the tree in a write-back object cache between runs.

pub mod config;
pub mod runtime;
pub mod settings;

pub use config::{Config, ConfigError, ConfigOptions, ConfigResult, TreeOrigin};
pub use runtime::Runtime;
pub use settings::{Settings, SettingsError};

pub use strata_cache::{CacheError, CacheOptions, ObjectCache};
pub use strata_path::{Bindings, ConfigPath, QueryError};
