//! Log subscriber installation
//!
//! `RUST_LOG` wins when set; otherwise the `[logging]` filter from config
//! (itself overridable through `TETHER_LOG`) is used.

use crate::error::{BridgeError, BridgeResult};
use tether_config::BridgeConfig;
use tracing_subscriber::EnvFilter;

/// Filter the subscriber would be installed with
pub fn filter(config: &BridgeConfig) -> BridgeResult<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(config.log_filter())
            .map_err(|e| BridgeError::LogFilter(format!("{}: {}", config.log_filter(), e))),
    }
}

/// Install the global fmt subscriber
///
/// Returns `Ok(false)` when a subscriber was already installed.
pub fn init(config: &BridgeConfig) -> BridgeResult<bool> {
    let filter = filter(config)?;
    Ok(tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.log_ansi())
        .with_target(true)
        .try_init()
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_config::LoggingConfig;
    use tracing_subscriber::filter::LevelFilter;

    fn config(filter: &str) -> BridgeConfig {
        BridgeConfig {
            host: None,
            logging: Some(LoggingConfig {
                filter: Some(filter.to_string()),
                ansi: Some(false),
            }),
        }
    }

    #[test]
    fn test_filter_from_config() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let filter = filter(&config("tether_bridge=debug")).unwrap();
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));
    }

    #[test]
    fn test_invalid_filter() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        assert!(matches!(
            filter(&config("tether_bridge=notalevel")),
            Err(BridgeError::LogFilter(_))
        ));
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = config("warn");
        init(&config).unwrap();
        assert!(!init(&config).unwrap());
    }
}
