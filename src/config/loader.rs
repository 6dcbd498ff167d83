use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::types::Config;
use crate::rules::RuleSet;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },
}

impl Config {
    /// Returns the path to the configuration file.
    ///
    /// Uses `~/.config/bundlerwatch/config.toml` on Unix/macOS,
    /// or equivalent on other platforms via `dirs::config_dir()`.
    /// Falls back to current directory if config_dir is unavailable.
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        config_dir.join("bundlerwatch").join("config.toml")
    }

    /// Loads configuration from the default config file.
    ///
    /// If the file doesn't exist, returns `Config::default()`.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path();

        if !path.exists() {
            return Ok(Config::default());
        }

        Self::load_from(&path)
    }

    /// Loads and validates configuration from an explicit path.
    ///
    /// Unlike [`Config::load`], a missing file is an error here.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config = Self::parse(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Parse TOML without validating.
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Validates the configuration.
    ///
    /// Checks:
    /// - The command has a program
    /// - The port range is non-empty and does not start at 0
    /// - At least one attempt is allowed and timeouts are non-zero
    /// - The backoff base does not exceed its cap
    /// - Every configured rule compiles
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command.program.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                message: "command.program must not be empty".to_string(),
            });
        }

        if self.ports.start == 0 || self.ports.start > self.ports.end {
            return Err(ConfigError::ValidationError {
                message: format!(
                    "Invalid port range {}-{}: start must be non-zero and not exceed end",
                    self.ports.start, self.ports.end
                ),
            });
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError {
                message: "retry.max_attempts must be at least 1".to_string(),
            });
        }

        if self.timeouts.attempt_timeout_seconds == 0 || self.timeouts.heartbeat_seconds == 0 {
            return Err(ConfigError::ValidationError {
                message: "Timeouts must be greater than zero".to_string(),
            });
        }

        if self.retry.backoff_base_seconds > self.retry.backoff_max_seconds {
            return Err(ConfigError::ValidationError {
                message: format!(
                    "retry.backoff_base_seconds ({}) exceeds retry.backoff_max_seconds ({})",
                    self.retry.backoff_base_seconds, self.retry.backoff_max_seconds
                ),
            });
        }

        if !self.resources.disk_path.exists() {
            return Err(ConfigError::ValidationError {
                message: format!(
                    "resources.disk_path {} does not exist",
                    self.resources.disk_path.display()
                ),
            });
        }

        RuleSet::from_config(&self.rules, false).map_err(|e| ConfigError::ValidationError {
            message: e.to_string(),
        })?;

        Ok(())
    }
}
