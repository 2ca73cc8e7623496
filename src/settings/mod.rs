//! Settings for the resolver itself
//!
//! Where the configuration and cache directories live, which pools to read
//! and in what order, and whether to run strict. Not to be confused with the
//! configuration tree the resolver builds.

mod defaults;
mod effective;

pub use defaults::BuiltinDefaults;
pub use effective::{Settings, SettingsOrigin, SettingsSource, SETTINGS_FILENAME};

use std::path::PathBuf;

pub type SettingsResult<T> = Result<T, SettingsError>;

/// Settings errors
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("cannot read {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("invalid settings file {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("invalid settings: {0}")]
    Invalid(String),
}
