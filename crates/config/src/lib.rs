//! Mech Configuration Module
//!
//! This module provides configuration types for the mech interaction state machine:
//! the recognized options, their defaults, TOML loading and validation, and the
//! per-chain subscription constants.
//!
//! ## Example
//!
//! ```rust
//! use mech_config::MechInteractConfig;
//!
//! let config = MechInteractConfig::from_toml_str(r#"
//!     mech_contract_address = "0x77af31de935740567cf4ff1986d04b2c964a786a"
//!     multisend_address = "0x40a2accbd92bca938b02010e17a5b8929b49130d"
//!     safe_contract_address = "0x5e1d1eb61e1164d5a50b28c575da73a29595dff7"
//! "#).unwrap();
//!
//! assert!(!config.use_mech_marketplace);
//! assert_eq!(config.multisend_batch_size, 1);
//! ```

pub mod error;
pub mod logging;
pub mod mech;
pub mod nvm;

pub use error::{ConfigError, ConfigResult};
pub use logging::{LogFormat, LoggingConfig};
pub use mech::{MechInteractConfig, MechMarketplaceConfig};
pub use nvm::{NvmConfig, PLAN_DID_PREFIX};

/// Default per-round deadline in seconds, enforced by the host.
pub const DEFAULT_ROUND_TIMEOUT_SECS: u64 = 30;

/// Default number of attempts a round gets before degrading to a failure state.
pub const DEFAULT_MAX_ROUND_ATTEMPTS: u32 = 3;

/// Default bounded retries for polls and contract steps.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default delay between retried steps in seconds.
pub const DEFAULT_REQUEST_RETRY_DELAY_SECS: u64 = 5;

/// Default penalization window in seconds (one hour).
pub const DEFAULT_PENALIZE_MECH_TIME_WINDOW_SECS: u64 = 3600;

/// Default number of requests batched into one multisend.
pub const DEFAULT_MULTISEND_BATCH_SIZE: usize = 1;

/// Default marketplace response timeout in seconds.
pub const DEFAULT_RESPONSE_TIMEOUT_SECS: u64 = 300;

/// Service id used for the priority mech when none is configured.
pub const DEFAULT_PRIORITY_MECH_SERVICE_ID: u64 = 975;
