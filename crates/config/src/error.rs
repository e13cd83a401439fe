//! Error types for configuration loading and validation.

use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A value failed validation.
    #[error("Invalid configuration: {message}")]
    Invalid {
        /// What is wrong.
        message: String,
    },

    /// The TOML document could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No subscription constants exist for the chain.
    #[error("No subscription configuration for chain {0}")]
    UnsupportedChain(String),
}

impl ConfigError {
    /// Create an invalid configuration error.
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
