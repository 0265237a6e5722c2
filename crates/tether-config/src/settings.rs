//! Bridge settings (tether.toml)
//!
//! The same schema is used for the project file and the global file; the
//! loader merges them section by section.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default number of host worker threads
pub const DEFAULT_WORKERS: usize = 2;

/// Default ceiling for a single encoded result (16 MiB)
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Default `tracing` filter directive
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Bridge configuration from tether.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// Managed-side host settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<HostConfig>,

    /// Logging settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// Host settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    /// Number of threads that run command handlers (default: 2)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,

    /// Largest success payload the encoder will hand off, in bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_payload_bytes: Option<usize>,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. "tether_bridge=debug"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,

    /// Colorize output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ansi: Option<bool>,
}

impl BridgeConfig {
    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                }
            }
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            file: path.to_path_buf(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate value ranges
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(host) = &self.host {
            if host.workers == Some(0) {
                return Err(ConfigError::InvalidValue {
                    field: "host.workers".to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
            if host.max_payload_bytes == Some(0) {
                return Err(ConfigError::InvalidValue {
                    field: "host.max_payload_bytes".to_string(),
                    reason: "must be greater than 0".to_string(),
                });
            }
        }

        if let Some(filter) = self.logging.as_ref().and_then(|l| l.filter.as_deref()) {
            if filter.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "logging.filter".to_string(),
                    reason: "must not be empty".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Merge another config into this one, field by field.
    /// Other config takes precedence for non-None values
    pub fn merge(&mut self, other: &BridgeConfig) {
        if let Some(other_host) = &other.host {
            let host = self.host.get_or_insert_with(HostConfig::default);
            if other_host.workers.is_some() {
                host.workers = other_host.workers;
            }
            if other_host.max_payload_bytes.is_some() {
                host.max_payload_bytes = other_host.max_payload_bytes;
            }
        }

        if let Some(other_logging) = &other.logging {
            let logging = self.logging.get_or_insert_with(LoggingConfig::default);
            if other_logging.filter.is_some() {
                logging.filter = other_logging.filter.clone();
            }
            if other_logging.ansi.is_some() {
                logging.ansi = other_logging.ansi;
            }
        }
    }

    /// Effective worker count
    pub fn workers(&self) -> usize {
        self.host
            .as_ref()
            .and_then(|h| h.workers)
            .unwrap_or(DEFAULT_WORKERS)
    }

    /// Effective payload ceiling
    pub fn max_payload_bytes(&self) -> usize {
        self.host
            .as_ref()
            .and_then(|h| h.max_payload_bytes)
            .unwrap_or(DEFAULT_MAX_PAYLOAD_BYTES)
    }

    /// Effective log filter
    pub fn log_filter(&self) -> &str {
        self.logging
            .as_ref()
            .and_then(|l| l.filter.as_deref())
            .unwrap_or(DEFAULT_LOG_FILTER)
    }

    /// Whether log output is colorized
    pub fn log_ansi(&self) -> bool {
        self.logging.as_ref().and_then(|l| l.ansi).unwrap_or(true)
    }
}
