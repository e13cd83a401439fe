//! Error types for the mech interaction skill.
//!
//! ## Error Categories
//!
//! | Error | Handling |
//! |-------|----------|
//! | `DetectionFailure` | Terminal, routed to `FailedMechInformationRound` |
//! | `AgreementTimeout` | Round retried up to the attempt cap, then degraded |
//! | `ResponseInvalid` | Mech penalized and re-selected |
//! | `RegistryUnavailable` | Last agreed mech list reused |
//! | `SubscriptionRequired` | Transition to the purchase round |
//!
//! ## Example
//!
//! ```rust
//! use mech_interact::MechInteractError;
//!
//! let err = MechInteractError::registry_unavailable("subgraph returned 502");
//! assert!(err.to_string().contains("Mech registry unavailable"));
//! ```

use mech_config::ConfigError;
use mech_consensus::ConsensusError;
use mech_primitives::{Address, AddressError};
use thiserror::Error;

/// Errors raised while interacting with mechs.
#[derive(Error, Debug)]
pub enum MechInteractError {
    /// No dialect probe gave a definitive answer.
    #[error("Dialect detection failed: {message}")]
    DetectionFailure {
        /// Last probe error.
        message: String,
    },

    /// A round did not agree within its attempts.
    #[error("Round {round} did not reach agreement after {attempts} attempts")]
    AgreementTimeout {
        /// Round name.
        round: String,
        /// Attempts made.
        attempts: u32,
    },

    /// The mech response is missing or malformed.
    #[error("Invalid response from mech {mech}: {reason}")]
    ResponseInvalid {
        /// Delivering mech.
        mech: Address,
        /// What is wrong with the response.
        reason: String,
    },

    /// Registry could not be queried.
    #[error("Mech registry unavailable: {message}")]
    RegistryUnavailable {
        /// Error message.
        message: String,
    },

    /// The subscription balance does not cover the mech's delivery rate.
    #[error("Subscription required for mech {mech}: balance {balance}, required {required}")]
    SubscriptionRequired {
        /// Mech charging via subscription.
        mech: Address,
        /// Current subscription balance.
        balance: u128,
        /// Mech max delivery rate.
        required: u128,
    },

    /// The contract answered but the call reverted or the method does not exist.
    #[error("Call to {method} on {contract} reverted")]
    ContractReverted {
        /// Called contract.
        contract: Address,
        /// Called method.
        method: String,
    },

    /// The contract layer failed.
    #[error("Contract error: {message}")]
    Contract {
        /// Error message.
        message: String,
    },

    /// The content store failed.
    #[error("Content store error: {message}")]
    ContentStore {
        /// Error message.
        message: String,
    },

    /// A value required by the current step is absent.
    #[error("Missing {0}")]
    MissingData(String),

    /// A contract returned a value of an unexpected shape.
    #[error("Unexpected value for {field}: {value}")]
    UnexpectedValue {
        /// What was read.
        field: String,
        /// Received value.
        value: String,
    },

    /// A round was started outside the initial states.
    #[error("{0} is not an initial state")]
    InvalidInitialState(String),

    /// An agreed payload does not belong to the current round.
    #[error("Payload for {payload} delivered in {round}")]
    UnexpectedPayload {
        /// Current round.
        round: String,
        /// Round the payload belongs to.
        payload: String,
    },

    /// A round is still collecting payloads.
    #[error("{0} is still in progress")]
    RoundInProgress(String),

    /// The state machine already reached a terminal state.
    #[error("State machine finished in {0}")]
    Finished(String),

    /// Event channel closed.
    #[error("Event channel closed")]
    ChannelClosed,

    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Agreement layer error.
    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    /// Address parsing error.
    #[error(transparent)]
    Address(#[from] AddressError),

    /// JSON error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MechInteractError {
    /// Create a contract error.
    pub fn contract<S: Into<String>>(message: S) -> Self {
        Self::Contract {
            message: message.into(),
        }
    }

    /// Create a content store error.
    pub fn content_store<S: Into<String>>(message: S) -> Self {
        Self::ContentStore {
            message: message.into(),
        }
    }

    /// Create a registry error.
    pub fn registry_unavailable<S: Into<String>>(message: S) -> Self {
        Self::RegistryUnavailable {
            message: message.into(),
        }
    }

    /// Create a detection error.
    pub fn detection<S: Into<String>>(message: S) -> Self {
        Self::DetectionFailure {
            message: message.into(),
        }
    }

    /// Create an unexpected value error.
    pub fn unexpected<F: Into<String>, V: ToString>(field: F, value: V) -> Self {
        Self::UnexpectedValue {
            field: field.into(),
            value: value.to_string(),
        }
    }

    /// Returns true when the contract answered with a revert.
    pub fn is_revert(&self) -> bool {
        matches!(self, Self::ContractReverted { .. })
    }
}

/// Result type for mech interaction operations.
pub type MechInteractResult<T> = std::result::Result<T, MechInteractError>;
