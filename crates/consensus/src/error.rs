//! Error types for payload aggregation.
//!
//! ## Error Categories
//!
//! | Error | Description |
//! |-------|-------------|
//! | `UnknownParticipant` | Payload from outside the participant set |
//! | `InvalidThreshold` | Threshold cannot guarantee a single agreed value |
//! | `EmptyParticipantSet` | No participants registered |
//! | `WrongRound` | Payload addressed to another round |
//! | `Transport` | The transport layer refused a payload |
//!
//! ## Example
//!
//! ```rust
//! use mech_consensus::ConsensusError;
//!
//! let err = ConsensusError::transport("peer disconnected");
//! assert!(err.to_string().contains("Transport error"));
//! ```

use mech_primitives::Address;
use thiserror::Error;

/// Errors that can occur while collecting payloads.
#[derive(Error, Debug)]
pub enum ConsensusError {
    /// Payload from an address outside the participant set.
    #[error("Unknown participant: {0}")]
    UnknownParticipant(Address),

    /// Threshold outside `(n/2, n]`.
    #[error("Invalid threshold {threshold} for {participants} participants")]
    InvalidThreshold {
        /// Requested threshold.
        threshold: usize,
        /// Number of participants.
        participants: usize,
    },

    /// No participants registered.
    #[error("Participant set is empty")]
    EmptyParticipantSet,

    /// Payload for a different round.
    #[error("Payload from wrong round: expected {expected}, got {got}")]
    WrongRound {
        /// Round the collector belongs to.
        expected: u64,
        /// Round the payload was addressed to.
        got: u64,
    },

    /// Transport failure.
    #[error("Transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
    },

    /// Payload could not be serialized for hashing.
    #[error("Serialization error")]
    Serialization(#[from] serde_json::Error),
}

impl ConsensusError {
    /// Create a transport error.
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }
}

/// Result type for consensus operations.
pub type ConsensusResult<T> = std::result::Result<T, ConsensusError>;
