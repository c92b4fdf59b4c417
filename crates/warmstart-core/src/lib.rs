//! Core types shared by the warmstart crates.
//!
//! This crate owns the pieces every other warmstart crate needs but which
//! carry no restart semantics of their own:
//! - Configuration types and layered resolution (`[restart]`, `[cache]`)
//! - Process-level logging initialization
//! - Home directory resolution used to locate the global config file

pub mod config;
pub mod home;
pub mod logging;

pub use config::{CacheConfig, Config, ConfigError, ConfigOverrides, RestartConfig};

// Re-export toml so embedders can read raw config sections
pub use toml;
