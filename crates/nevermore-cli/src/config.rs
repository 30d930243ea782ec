//! Configuration file management.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use nevermore_core::{ConnectionConfig, ScanOptions};
use serde::{Deserialize, Serialize};

use crate::cli::{OutputFormat, RequestArgs};

/// Scan timeout used when neither the command line nor the config sets one.
pub const DEFAULT_SCAN_TIMEOUT_SECS: u64 = 30;

/// Configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Device name prefix to request
    #[serde(default)]
    pub name_prefix: Option<String>,

    /// Default output format
    #[serde(default)]
    pub format: Option<OutputFormat>,

    /// Scan timeout in seconds
    #[serde(default)]
    pub scan_timeout: Option<u64>,

    /// Connection timeout in seconds
    #[serde(default)]
    pub connect_timeout: Option<u64>,

    /// Per-operation read/write timeout in seconds
    #[serde(default)]
    pub operation_timeout: Option<u64>,
}

impl Config {
    /// Get the config file path
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nevermore")
            .join("config.toml")
    }

    /// Load config from the default path, or return default if not found
    pub fn load() -> Self {
        Self::load_from(&Self::path())
    }

    /// Load config from `path`, or return default if missing or unreadable
    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        eprintln!("Warning: Failed to parse config: {}", e);
                    }
                },
                Err(e) => {
                    eprintln!("Warning: Failed to read config: {}", e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the default path
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::path())
    }

    /// Save config to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// A config with every default spelled out, for `config init`.
    pub fn with_defaults() -> Self {
        let connection = ConnectionConfig::default();
        Self {
            name_prefix: Some(nevermore_core::uuids::DEVICE_NAME_PREFIX.to_string()),
            format: Some(OutputFormat::Text),
            scan_timeout: Some(DEFAULT_SCAN_TIMEOUT_SECS),
            connect_timeout: Some(connection.connection_timeout.as_secs()),
            operation_timeout: Some(connection.read_timeout.as_secs()),
        }
    }

    /// Scan options: explicit flags override config values.
    pub fn scan_options(&self, args: &RequestArgs) -> ScanOptions {
        let mut options = ScanOptions::default().timeout_secs(resolve_timeout(
            args.timeout,
            self.scan_timeout,
            DEFAULT_SCAN_TIMEOUT_SECS,
        ));
        if let Some(prefix) = args.name.as_ref().or(self.name_prefix.as_ref()) {
            options = options.name_prefix(prefix.clone());
        }
        options
    }

    /// Connection timeouts: explicit flags override config values.
    pub fn connection_config(&self, args: &RequestArgs) -> ConnectionConfig {
        let defaults = ConnectionConfig::default();
        let mut config = defaults.clone().connection_timeout(Duration::from_secs(resolve_timeout(
            args.connect_timeout,
            self.connect_timeout,
            defaults.connection_timeout.as_secs(),
        )));
        if let Some(secs) = self.operation_timeout {
            config = config
                .read_timeout(Duration::from_secs(secs))
                .write_timeout(Duration::from_secs(secs));
        }
        config
    }

    /// Output format: `--json`, then `--format`, then config.
    pub fn resolve_format(&self, json: bool, format: Option<OutputFormat>) -> OutputFormat {
        if json {
            OutputFormat::Json
        } else {
            format.or(self.format).unwrap_or_default()
        }
    }
}

/// Resolve a timeout: explicit value, then config, then default.
pub fn resolve_timeout(explicit: Option<u64>, configured: Option<u64>, default: u64) -> u64 {
    explicit.or(configured).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> RequestArgs {
        RequestArgs {
            name: None,
            timeout: None,
            connect_timeout: None,
        }
    }

    #[test]
    fn test_resolve_timeout_uses_explicit_value() {
        assert_eq!(resolve_timeout(Some(5), Some(20), 30), 5);
    }

    #[test]
    fn test_resolve_timeout_uses_config_when_unset() {
        assert_eq!(resolve_timeout(None, Some(20), 30), 20);
    }

    #[test]
    fn test_resolve_timeout_uses_default_when_no_config() {
        assert_eq!(resolve_timeout(None, None, 30), 30);
    }

    #[test]
    fn test_scan_options_prefers_flags() {
        let config = Config {
            name_prefix: Some("Nevermore Garage".into()),
            scan_timeout: Some(12),
            ..Default::default()
        };
        let options = config.scan_options(&args());
        assert_eq!(options.name_prefix.as_deref(), Some("Nevermore Garage"));
        assert_eq!(options.timeout, Duration::from_secs(12));

        let mut explicit = args();
        explicit.name = Some("Nevermore Office".into());
        explicit.timeout = Some(3);
        let options = config.scan_options(&explicit);
        assert_eq!(options.name_prefix.as_deref(), Some("Nevermore Office"));
        assert_eq!(options.timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_scan_options_default_prefix() {
        let options = Config::default().scan_options(&args());
        assert_eq!(options.name_prefix.as_deref(), Some("Nevermore"));
        assert_eq!(options.timeout, Duration::from_secs(DEFAULT_SCAN_TIMEOUT_SECS));
    }

    #[test]
    fn test_connection_config() {
        let config = Config {
            connect_timeout: Some(4),
            operation_timeout: Some(2),
            ..Default::default()
        };
        let connection = config.connection_config(&args());
        assert_eq!(connection.connection_timeout, Duration::from_secs(4));
        assert_eq!(connection.read_timeout, Duration::from_secs(2));
        assert_eq!(connection.write_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_resolve_format() {
        let config = Config {
            format: Some(OutputFormat::Json),
            ..Default::default()
        };
        assert_eq!(config.resolve_format(false, None), OutputFormat::Json);
        assert_eq!(
            config.resolve_format(false, Some(OutputFormat::Text)),
            OutputFormat::Text
        );
        assert_eq!(
            Config::default().resolve_format(true, Some(OutputFormat::Text)),
            OutputFormat::Json
        );
        assert_eq!(Config::default().resolve_format(false, None), OutputFormat::Text);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::with_defaults();
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path), config);

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("name_prefix = \"Nevermore\""));
        assert!(content.contains("format = \"text\""));
    }

    #[test]
    fn test_load_missing_or_invalid_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        assert_eq!(Config::load_from(&path), Config::default());

        fs::write(&path, "scan_timeout = \"soon\"").unwrap();
        assert_eq!(Config::load_from(&path), Config::default());
    }
}
