//! Error types for primitive parsing.

use thiserror::Error;

/// Errors raised while parsing primitive values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// Wrong byte length.
    #[error("Invalid address length: expected {expected} bytes, got {got}")]
    InvalidLength {
        /// Expected number of bytes.
        expected: usize,
        /// Actual number of bytes.
        got: usize,
    },

    /// Not valid hex.
    #[error("Invalid hex '{value}': {message}")]
    InvalidHex {
        /// The offending input.
        value: String,
        /// Decoder message.
        message: String,
    },

    /// Unknown chain name.
    #[error("Unknown chain: {0}")]
    UnknownChain(String),
}

/// Result type for primitive operations.
pub type AddressResult<T> = std::result::Result<T, AddressError>;
