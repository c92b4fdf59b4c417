//! Configuration discovery and resolution

use super::types::{Config, parse_duration};
use crate::home::global_config_dir;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Name of the repo-local configuration file.
pub const REPO_CONFIG_FILE: &str = ".warmstart.toml";

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Duration string could not be parsed
    #[error("Invalid duration '{value}' (expected e.g. \"500ms\", \"5s\" or \"1m\")")]
    InvalidDuration { value: String },
}

/// Command-line overrides for configuration
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    /// Override the restart delay (duration string)
    pub restart_delay: Option<String>,
    /// Replace the watched roots
    pub watch_roots: Vec<PathBuf>,
    /// Override the cache session key
    pub cache_key: Option<String>,
    /// Disable restarts entirely
    pub disable_restart: bool,
    /// Path to config file override
    pub config_path: Option<PathBuf>,
}

/// Resolve configuration from all sources
///
/// Priority (highest to lowest):
/// 1. Command-line overrides
/// 2. Environment variables
/// 3. Explicit config file, or repo-local config (.warmstart.toml in current dir or up to the git root)
/// 4. Global config (~/.config/warmstart/config.toml)
/// 5. Defaults
///
/// Unparseable files are skipped with a warning; an invalid delay in the
/// final result is an error.
pub fn resolve_config(
    overrides: &ConfigOverrides,
    current_dir: &Path,
    home_dir: &Path,
) -> Result<Config, ConfigError> {
    let mut config = Config::default();

    // 4. Try global config
    let global_config_path = global_config_dir(home_dir).join("config.toml");
    if global_config_path.exists() {
        match load_config_file(&global_config_path) {
            Ok(file_config) => merge_config(&mut config, file_config),
            Err(e) => warn!("Failed to parse global config at {global_config_path:?}: {e}"),
        }
    }

    // 3. Explicit file wins over repo discovery
    let local_config = overrides
        .config_path
        .clone()
        .or_else(|| find_repo_local_config(current_dir));
    if let Some(path) = local_config {
        match load_config_file(&path) {
            Ok(file_config) => {
                debug!("Loaded config from {}", path.display());
                merge_config(&mut config, file_config);
            }
            Err(e) => warn!("Failed to parse config at {path:?}: {e}"),
        }
    }

    // 2. Apply environment variables
    apply_env_overrides(&mut config);

    // 1. Apply command-line overrides
    apply_cli_overrides(&mut config, overrides);

    if let Some(raw) = config.restart.restart_delay.as_deref() {
        parse_duration(raw)?;
    }

    Ok(config)
}

/// Find repo-local config file
///
/// Searches current directory and parent directories up to git root
fn find_repo_local_config(current_dir: &Path) -> Option<PathBuf> {
    let mut dir = current_dir;

    loop {
        let config_path = dir.join(REPO_CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        // Stop at git root
        if dir.join(".git").exists() {
            break;
        }

        dir = dir.parent()?;
    }

    None
}

/// Load config from a TOML file
fn load_config_file(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents)?;
    Ok(config)
}

/// Merge file config into base config. Only values the file sets override.
fn merge_config(base: &mut Config, file: Config) {
    if file.restart.enabled.is_some() {
        base.restart.enabled = file.restart.enabled;
    }
    if file.restart.restart_delay.is_some() {
        base.restart.restart_delay = file.restart.restart_delay;
    }
    if !file.restart.watch_roots.is_empty() {
        base.restart.watch_roots = file.restart.watch_roots;
    }
    // Ignore patterns accumulate across layers
    for pattern in file.restart.ignore {
        if !base.restart.ignore.contains(&pattern) {
            base.restart.ignore.push(pattern);
        }
    }

    if file.cache.key.is_some() {
        base.cache.key = file.cache.key;
    }
}

/// Apply environment variable overrides
fn apply_env_overrides(config: &mut Config) {
    if let Ok(delay) = std::env::var("WARMSTART_RESTART_DELAY") {
        config.restart.restart_delay = Some(delay);
    }

    if let Some(roots) = std::env::var_os("WARMSTART_WATCH_ROOTS") {
        let roots: Vec<PathBuf> = std::env::split_paths(&roots)
            .filter(|p| !p.as_os_str().is_empty())
            .collect();
        if !roots.is_empty() {
            config.restart.watch_roots = roots;
        }
    }

    if let Ok(key) = std::env::var("WARMSTART_CACHE_KEY") {
        let key = key.trim();
        if !key.is_empty() {
            config.cache.key = Some(key.to_string());
        }
    }

    if let Ok(enabled) = std::env::var("WARMSTART_RESTART_ENABLED") {
        match enabled.to_ascii_lowercase().as_str() {
            "0" | "false" | "no" | "off" => config.restart.enabled = Some(false),
            "1" | "true" | "yes" | "on" => config.restart.enabled = Some(true),
            other => warn!("Ignoring WARMSTART_RESTART_ENABLED={other:?}"),
        }
    }
}

/// Apply command-line overrides
fn apply_cli_overrides(config: &mut Config, overrides: &ConfigOverrides) {
    if let Some(ref delay) = overrides.restart_delay {
        config.restart.restart_delay = Some(delay.clone());
    }

    if !overrides.watch_roots.is_empty() {
        config.restart.watch_roots = overrides.watch_roots.clone();
    }

    if let Some(ref key) = overrides.cache_key {
        config.cache.key = Some(key.clone());
    }

    if overrides.disable_restart {
        config.restart.enabled = Some(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::time::Duration;
    use tempfile::TempDir;

    const ENV_VARS: [&str; 4] = [
        "WARMSTART_RESTART_DELAY",
        "WARMSTART_WATCH_ROOTS",
        "WARMSTART_CACHE_KEY",
        "WARMSTART_RESTART_ENABLED",
    ];

    fn clear_env() {
        for var in ENV_VARS {
            unsafe { std::env::remove_var(var) };
        }
    }

    #[test]
    #[serial]
    fn test_resolve_defaults_without_files() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join(".git")).unwrap();

        let config =
            resolve_config(&ConfigOverrides::default(), temp_dir.path(), temp_dir.path()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    #[serial]
    fn test_repo_config_overrides_global_per_field() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        let home_dir = temp_dir.path().join("home");
        let repo_dir = temp_dir.path().join("repo");
        std::fs::create_dir_all(repo_dir.join(".git")).unwrap();

        let global_dir = global_config_dir(&home_dir);
        std::fs::create_dir_all(&global_dir).unwrap();
        std::fs::write(
            global_dir.join("config.toml"),
            "[restart]\nrestart_delay = \"5s\"\nignore = [\"**/*.tmp\"]\n\n[cache]\nkey = \"global\"\n",
        )
        .unwrap();
        std::fs::write(
            repo_dir.join(REPO_CONFIG_FILE),
            "[restart]\nignore = [\"**/*.swp\"]\n\n[cache]\nkey = \"shard-0\"\n",
        )
        .unwrap();

        let config = resolve_config(&ConfigOverrides::default(), &repo_dir, &home_dir).unwrap();
        assert_eq!(config.restart.restart_delay().unwrap(), Duration::from_secs(5));
        assert_eq!(config.cache.key.as_deref(), Some("shard-0"));
        assert_eq!(
            config.restart.ignore,
            vec!["**/*.tmp".to_string(), "**/*.swp".to_string()]
        );
    }

    #[test]
    #[serial]
    fn test_repo_config_found_from_subdirectory() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join(".git")).unwrap();
        let sub_dir = temp_dir.path().join("src/bin");
        std::fs::create_dir_all(&sub_dir).unwrap();
        std::fs::write(
            temp_dir.path().join(REPO_CONFIG_FILE),
            "[restart]\nrestart_delay = \"250ms\"\n",
        )
        .unwrap();

        let config = resolve_config(&ConfigOverrides::default(), &sub_dir, temp_dir.path()).unwrap();
        assert_eq!(
            config.restart.restart_delay().unwrap(),
            Duration::from_millis(250)
        );
    }

    #[test]
    #[serial]
    fn test_env_and_cli_priority() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join(".git")).unwrap();

        unsafe {
            std::env::set_var("WARMSTART_RESTART_DELAY", "3s");
            std::env::set_var("WARMSTART_CACHE_KEY", "from-env");
            std::env::set_var("WARMSTART_RESTART_ENABLED", "off");
        }

        let overrides = ConfigOverrides {
            cache_key: Some("from-cli".to_string()),
            ..Default::default()
        };
        let config = resolve_config(&overrides, temp_dir.path(), temp_dir.path()).unwrap();
        clear_env();

        assert_eq!(config.restart.restart_delay().unwrap(), Duration::from_secs(3));
        assert_eq!(config.cache.key.as_deref(), Some("from-cli"));
        assert!(!config.restart.is_enabled());
    }

    #[test]
    #[serial]
    fn test_invalid_delay_is_an_error() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join(".git")).unwrap();

        let overrides = ConfigOverrides {
            restart_delay: Some("soon".to_string()),
            ..Default::default()
        };
        let result = resolve_config(&overrides, temp_dir.path(), temp_dir.path());
        assert!(matches!(result, Err(ConfigError::InvalidDuration { .. })));
    }

    #[test]
    fn test_malformed_config_handled_gracefully() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("malformed.toml");
        std::fs::write(&config_path, "invalid toml [[[").unwrap();

        assert!(load_config_file(&config_path).is_err());
    }

    #[test]
    #[serial]
    fn test_explicit_config_path_wins_over_discovery() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join(".git")).unwrap();
        std::fs::write(
            temp_dir.path().join(REPO_CONFIG_FILE),
            "[cache]\nkey = \"repo\"\n",
        )
        .unwrap();
        let explicit = temp_dir.path().join("custom.toml");
        std::fs::write(&explicit, "[cache]\nkey = \"explicit\"\n").unwrap();

        let overrides = ConfigOverrides {
            config_path: Some(explicit),
            ..Default::default()
        };
        let config = resolve_config(&overrides, temp_dir.path(), temp_dir.path()).unwrap();
        assert_eq!(config.cache.key.as_deref(), Some("explicit"));
    }
}
