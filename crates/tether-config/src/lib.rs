//! Settings for the tether bridge host
//!
//! Three layers, later ones winning field by field:
//! 1. `~/.tether/config.toml`
//! 2. the nearest `tether.toml` at or above the start directory
//! 3. `TETHER_WORKERS`, `TETHER_MAX_PAYLOAD_BYTES`, `TETHER_LOG`
//!
//! The merged result is validated once, after all layers are applied.
//!
//! ```no_run
//! use std::path::Path;
//! use tether_config::ConfigLoader;
//!
//! # fn main() -> tether_config::ConfigResult<()> {
//! let config = ConfigLoader::new().load_from_directory(Path::new("."))?;
//! println!("workers: {}", config.bridge.workers());
//! # Ok(())
//! # }
//! ```

pub mod loader;
pub mod settings;

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while locating, reading or validating settings
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{} does not exist", .0.display())]
    NotFound(PathBuf),

    #[error("could not read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is not valid TOML: {error}", file.display())]
    TomlParseError {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("{field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("{var}={value} is not a valid override: {reason}")]
    EnvOverride {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("cannot locate the home directory for ~/.tether")]
    HomeNotFound,
}

pub type ConfigResult<T> = Result<T, ConfigError>;

pub use loader::{Config, ConfigLoader, CONFIG_FILE_NAME};
pub use settings::{
    BridgeConfig, HostConfig, LoggingConfig, DEFAULT_LOG_FILTER, DEFAULT_MAX_PAYLOAD_BYTES,
    DEFAULT_WORKERS,
};
