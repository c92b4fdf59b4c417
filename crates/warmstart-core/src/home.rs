//! Canonical home directory resolution for warmstart
//!
//! The global configuration lives under `<home>/.config/warmstart/`. Tests
//! and custom deployments point `WARMSTART_HOME` at a scratch directory.
//!
//! # Precedence
//!
//! 1. `WARMSTART_HOME` environment variable (if set and non-empty)
//! 2. `dirs::home_dir()` platform default

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Environment variable overriding the home directory.
pub const HOME_ENV: &str = "WARMSTART_HOME";

/// Get the home directory for warmstart configuration lookups.
///
/// # Errors
///
/// Returns an error if `WARMSTART_HOME` is unset and the platform home
/// directory cannot be determined.
pub fn get_home_dir() -> Result<PathBuf> {
    if let Ok(home) = std::env::var(HOME_ENV) {
        let trimmed = home.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed));
        }
    }

    dirs::home_dir().context("Could not determine home directory")
}

/// Directory holding the global `config.toml`.
pub fn global_config_dir(home: &std::path::Path) -> PathBuf {
    home.join(".config").join("warmstart")
}
