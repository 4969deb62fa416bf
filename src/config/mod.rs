//! Configuration management
//!
//! Handles loading, validation, and merging of configuration from:
//! - TOML files
//! - CLI arguments

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub mod types;

pub use types::{ClipboardConfig, LoggingConfig};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Clipboard configuration
    #[serde(default)]
    pub clipboard: ClipboardConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, otherwise fall back to defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let clipboard = &self.clipboard;

        if clipboard.render_timeout_ms == 0 {
            anyhow::bail!("clipboard.render_timeout_ms must be greater than zero");
        }
        if clipboard.open_retry_attempts == 0 {
            anyhow::bail!("clipboard.open_retry_attempts must be at least 1");
        }
        if clipboard.max_data_size == 0 {
            anyhow::bail!("clipboard.max_data_size must be greater than zero");
        }
        if clipboard.open_retry_delay_ms > clipboard.open_retry_max_delay_ms {
            anyhow::bail!(
                "open_retry_delay_ms ({}) cannot be greater than open_retry_max_delay_ms ({})",
                clipboard.open_retry_delay_ms,
                clipboard.open_retry_max_delay_ms
            );
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Invalid log level: {}", self.logging.level),
        }

        match self.logging.format.as_str() {
            "pretty" | "compact" | "json" => {}
            _ => anyhow::bail!("Invalid log format: {}", self.logging.format),
        }

        Ok(())
    }

    /// Override config with CLI arguments
    pub fn with_overrides(mut self, log_format: Option<String>, verbose: u8) -> Self {
        if let Some(format) = log_format {
            self.logging.format = format;
        }

        match verbose {
            0 => {}
            1 => self.logging.level = "debug".to_string(),
            _ => self.logging.level = "trace".to_string(),
        }

        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.clipboard.enabled);
        assert_eq!(config.clipboard.render_timeout_ms, 3000);
        assert_eq!(config.clipboard.max_data_size, 16 * 1024 * 1024);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[clipboard]\nrender_timeout_ms = 750\n\n[logging]\nformat = \"json\"").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.clipboard.render_timeout_ms, 750);
        assert_eq!(config.clipboard.open_retry_attempts, 5);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(dir.path().join("absent.toml")).is_err());
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[clipboard]\nrender_timeout_ms = 0").unwrap();
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_config_validation_invalid_log_format() {
        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_attempts() {
        let mut config = Config::default();
        config.clipboard.open_retry_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let config = Config::default().with_overrides(Some("compact".to_string()), 2);
        assert_eq!(config.logging.format, "compact");
        assert_eq!(config.logging.level, "trace");
    }

    #[test]
    fn test_retry_config_from_clipboard_config() {
        let retry = ClipboardConfig::default().retry_config();
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.delay_for_attempt(0).as_millis(), 10);
        assert_eq!(retry.delay_for_attempt(9).as_millis(), 200);
    }
}
