//! # Mech Consensus
//!
//! Agreement primitives for the mech interaction rounds.
//!
//! Every round asks each participant for one payload. The [`PayloadCollector`]
//! records those votes and reports the value once enough participants submitted
//! the same one.
//!
//! ## Quorum
//!
//! With `n` participants the layer tolerates `f = (n-1)/3` byzantine ones and
//! requires `m = n - f` identical payloads, unless a deployment configures its
//! own threshold. A configured threshold must still be a strict majority so two
//! different values can never both be agreed.
//!
//! ## Round Flow
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  Payload Aggregation                      │
//! │                                                           │
//! │  Participant A ── submit(v) ──┐                           │
//! │  Participant B ── submit(v) ──┼──> Collector ──> Agreed(v)│
//! │  Participant C ── submit(w) ──┘        │                  │
//! │                                        ▼                  │
//! │                          Pending / NoMajority             │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use mech_consensus::{ParticipantSet, PayloadCollector, RoundOutcome};
//! use mech_primitives::Address;
//!
//! let participants = ParticipantSet::from_iter((1u8..=4).map(|i| {
//!     let mut bytes = [0u8; 20];
//!     bytes[19] = i;
//!     Address::new(bytes)
//! }));
//! let members: Vec<Address> = participants.iter().copied().collect();
//!
//! let mut collector = PayloadCollector::new(1, participants, None).unwrap();
//! for member in &members[..3] {
//!     collector.submit(*member, "v2".to_string()).unwrap();
//! }
//! assert_eq!(collector.result(), RoundOutcome::Agreed("v2".to_string()));
//! ```

pub mod collector;
pub mod error;
pub mod participants;
pub mod quorum;
pub mod transport;

// Re-exports
pub use collector::{PayloadCollector, PayloadDigest, RoundOutcome, SubmitStatus};
pub use error::{ConsensusError, ConsensusResult};
pub use participants::ParticipantSet;
pub use quorum::{byzantine_threshold, max_faulty, resolve_threshold};
pub use transport::{ConsensusTransport, RecordingTransport, SubmittedPayload};

/// Identifier of one round attempt as seen by the transport layer.
pub type RoundId = u64;
