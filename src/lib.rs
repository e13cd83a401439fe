//! # mech-interact-rs
//!
//! Byzantine-fault-tolerant state machine for calling mechs from a group of
//! cooperating agents.
//!
//! ## Crates
//!
//! | Crate | Content |
//! |-------|---------|
//! | [`primitives`] | addresses, chain ids, hex helpers |
//! | [`config`] | configuration, TOML loading, subscription constants |
//! | [`consensus`] | payload aggregation and quorum arithmetic |
//! | [`interact`] | rounds, state machine, components, service |
//!
//! ## Example
//!
//! ```rust
//! use mech_interact_rs::config::LoggingConfig;
//!
//! mech_interact_rs::init_tracing(&LoggingConfig::default()).unwrap();
//! ```

pub mod logging;

pub use logging::init_tracing;

pub use mech_config as config;
pub use mech_consensus as consensus;
pub use mech_interact as interact;
pub use mech_primitives as primitives;

pub use mech_config::MechInteractConfig;
pub use mech_interact::{
    MechInteractApp, MechInteractError, MechInteractEvent, MechInteractService, MechPayload,
    Round, SyncedState, TerminalState,
};
