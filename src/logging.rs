//! Logging initialization

use anyhow::Context;
use mech_config::{LogFormat, LoggingConfig};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Returns `Ok(false)`
/// when a subscriber was already installed.
pub fn init_tracing(config: &LoggingConfig) -> anyhow::Result<bool> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .with_context(|| format!("invalid log level `{}`", config.level))?,
    };

    let installed = match config.format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true))
            .try_init(),
    };

    match installed {
        Ok(()) => {
            tracing::info!(level = %config.level, format = ?config.format, "Logging initialized");
            Ok(true)
        }
        Err(_) => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_initialization_is_not_an_error() {
        let config = LoggingConfig::default();
        let first = init_tracing(&config).unwrap();
        let second = init_tracing(&config).unwrap();
        assert!(first || !second);
        assert!(!second);
    }
}
