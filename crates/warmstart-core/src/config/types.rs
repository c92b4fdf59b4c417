//! Configuration types

use super::discovery::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Restart delay used when none is configured.
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(1);

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Restart orchestration and file watching
    #[serde(default)]
    pub restart: RestartConfig,
    /// Connection continuity across restarts
    #[serde(default)]
    pub cache: CacheConfig,
}

/// `[restart]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestartConfig {
    /// Whether source changes trigger restarts (default: true)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Trailing debounce window (duration string: "500ms", "2s", "1m")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_delay: Option<String>,
    /// Directories to watch. Empty means the process resource roots.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub watch_roots: Vec<PathBuf>,
    /// Glob patterns for paths that never trigger a restart
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore: Vec<String>,
}

impl RestartConfig {
    /// Whether restarts are enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    /// Parsed restart delay, or [`DEFAULT_RESTART_DELAY`] when unset.
    pub fn restart_delay(&self) -> Result<Duration, ConfigError> {
        match self.restart_delay.as_deref() {
            Some(raw) => parse_duration(raw),
            None => Ok(DEFAULT_RESTART_DELAY),
        }
    }
}

/// `[cache]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Session key identifying the cached connection across restarts.
    /// Connections without a key are never cached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// Parse a duration string such as `"250ms"`, `"5s"` or `"2m"`.
pub fn parse_duration(raw: &str) -> Result<Duration, ConfigError> {
    let s = raw.trim();
    let invalid = || ConfigError::InvalidDuration {
        value: raw.to_string(),
    };

    let idx = s.find(|c: char| !c.is_ascii_digit()).ok_or_else(invalid)?;
    let (num_part, unit) = s.split_at(idx);
    let num: u64 = num_part.parse().map_err(|_| invalid())?;

    match unit.trim() {
        "ms" => Ok(Duration::from_millis(num)),
        "s" => Ok(Duration::from_secs(num)),
        "m" => Ok(Duration::from_secs(num.checked_mul(60).ok_or_else(invalid)?)),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert!(config.restart.is_enabled());
        assert_eq!(config.restart.restart_delay().unwrap(), DEFAULT_RESTART_DELAY);
        assert!(config.restart.watch_roots.is_empty());
        assert!(config.cache.key.is_none());
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration(" 2m ").unwrap(), Duration::from_secs(120));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("5h").is_err());
        assert!(matches!(
            parse_duration("fast"),
            Err(ConfigError::InvalidDuration { .. })
        ));
    }

    #[test]
    fn test_parse_duration_rejects_minute_overflow() {
        assert!(matches!(
            parse_duration("307445734561825862m"),
            Err(ConfigError::InvalidDuration { .. })
        ));
        assert_eq!(
            parse_duration("307445734561825860m").unwrap(),
            Duration::from_secs(307445734561825860 * 60)
        );
    }

    #[test]
    fn test_config_toml_sections() {
        let toml_str = r#"
[restart]
restart_delay = "5s"
watch_roots = ["target/debug/assets"]
ignore = ["**/*.swp"]

[cache]
key = "shard-0"
"#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.restart.restart_delay().unwrap(), Duration::from_secs(5));
        assert_eq!(
            config.restart.watch_roots,
            vec![PathBuf::from("target/debug/assets")]
        );
        assert_eq!(config.restart.ignore, vec!["**/*.swp".to_string()]);
        assert_eq!(config.cache.key.as_deref(), Some("shard-0"));
    }

    #[test]
    fn test_config_serialization_skips_unset_fields() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, deserialized);
        assert!(!toml_str.contains("restart_delay"));
    }
}
