//! # Mech Interact
//!
//! Round-transition state machine through which a group of mutually distrusting
//! agents agrees on how to call a mech, waits for its answer and recovers when
//! the mech or the contract dialect misbehaves.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                     MechInteractService                        │
//! │                                                                │
//! │  commands ──> PayloadCollector ──> MechInteractApp ──> events  │
//! │                     ▲                     │                    │
//! │                     │ local payload       │ agreed update      │
//! │  ┌──────────────────┴───────────┐         ▼                    │
//! │  │ MechInteractBehaviours       │    SyncedState               │
//! │  │  VersionDetector             │                              │
//! │  │  MechRegistry                │                              │
//! │  │  RequestBuilder              │                              │
//! │  │  SubscriptionPurchaser       │                              │
//! │  │  ResponseCollector           │                              │
//! │  └──────────────────────────────┘                              │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Components only compute payloads. The state machine is the only writer of
//! [`SyncedState`] and only acts on agreed outcomes.
//!
//! ## Example
//!
//! ```rust
//! use mech_config::MechInteractConfig;
//! use mech_interact::{Dialect, MechInteractApp, MechPayload, Round, SyncedState, TerminalState};
//! use mech_primitives::Address;
//! use std::sync::Arc;
//!
//! let config = Arc::new(MechInteractConfig::new(
//!     Address::new([1u8; 20]),
//!     Address::new([2u8; 20]),
//!     Address::new([3u8; 20]),
//! ));
//! let mut app = MechInteractApp::new(config, Round::MechVersionDetection, SyncedState::new()).unwrap();
//!
//! app.process_agreed(MechPayload::VersionDetection(Some(Dialect::LegacyDirect)), 0).unwrap();
//! assert_eq!(app.terminal(), Some(TerminalState::FinishedMechLegacyDetected));
//! ```

pub mod behaviours;
pub mod clock;
pub mod contracts;
pub mod dialect;
pub mod error;
pub mod fsm;
pub mod multisend;
pub mod payloads;
pub mod penalty;
pub mod registry;
pub mod request;
pub mod response;
pub mod retry;
pub mod rounds;
pub mod service;
pub mod subscription;
pub mod synced_state;
pub mod types;
pub mod version;

// Re-exports
pub use behaviours::{Collaborators, MechInteractBehaviours};
pub use clock::{Clock, ManualClock, SystemClock};
pub use contracts::{ContentStore, ContractApi, MechRegistryClient, MechResponseSource};
pub use dialect::{Dialect, DialectHandler, MechPrice, PaymentType};
pub use error::{MechInteractError, MechInteractResult};
pub use fsm::{MechInteractApp, Transition};
pub use multisend::SafeTransaction;
pub use payloads::{InformationVote, MechPayload, RequestVote, ResponseVote};
pub use penalty::PenaltyBook;
pub use registry::{select_priority_mech, MechRegistry, RegistrySnapshot, SnapshotSource};
pub use request::{PreparedRequest, RequestBuilder, RequestPlan};
pub use response::{AcnInbox, ResponseCollector, ResponseOutcome};
pub use retry::RetryPolicy;
pub use rounds::{AppState, Event, Round, TerminalState};
pub use service::{ConsensusCommand, MechInteractEvent, MechInteractService};
pub use subscription::SubscriptionPurchaser;
pub use synced_state::{SyncedState, SyncedStateUpdate};
pub use types::{ContentId, Delivery, MechInfo, MechInteractionResponse, MechMetadata};
pub use version::VersionDetector;

/// Longest payload excerpt written to the logs.
pub const MAX_LOG_SIZE: usize = 1000;

/// Cuts `text` to [`MAX_LOG_SIZE`] characters for logging.
pub fn truncate_for_log(text: &str) -> &str {
    match text.char_indices().nth(MAX_LOG_SIZE) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}
