//! Mech interaction configuration.
//!
//! Every option recognized by the mech interaction state machine lives here.
//! Durations are stored in whole seconds, matching how deployments write them.

use crate::{
    ConfigError, ConfigResult, LoggingConfig, NvmConfig, DEFAULT_MAX_ROUND_ATTEMPTS,
    DEFAULT_MULTISEND_BATCH_SIZE, DEFAULT_PENALIZE_MECH_TIME_WINDOW_SECS,
    DEFAULT_PRIORITY_MECH_SERVICE_ID, DEFAULT_REQUEST_RETRY_DELAY_SECS,
    DEFAULT_RESPONSE_TIMEOUT_SECS, DEFAULT_RETRY_ATTEMPTS, DEFAULT_ROUND_TIMEOUT_SECS,
};
use mech_primitives::{Address, ChainId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Marketplace configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MechMarketplaceConfig {
    /// Marketplace contract
    pub mech_marketplace_address: Address,
    /// Statically configured priority mech
    pub priority_mech_address: Address,
    /// Staking instance of the priority mech (legacy marketplace only)
    pub priority_mech_staking_instance_address: Address,
    /// Service id of the priority mech (legacy marketplace only)
    pub priority_mech_service_id: u64,
    /// Staking instance of the requester (legacy marketplace only)
    pub requester_staking_instance_address: Address,
    /// Seconds the mech has to deliver before the request can be re-routed
    pub response_timeout: u64,
    /// Pick the priority mech from the registry instead of the static address
    pub use_dynamic_mech_selection: bool,
}

impl Default for MechMarketplaceConfig {
    fn default() -> Self {
        Self {
            mech_marketplace_address: Address::ZERO,
            priority_mech_address: Address::ZERO,
            priority_mech_staking_instance_address: Address::ZERO,
            priority_mech_service_id: DEFAULT_PRIORITY_MECH_SERVICE_ID,
            requester_staking_instance_address: Address::ZERO,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT_SECS,
            use_dynamic_mech_selection: false,
        }
    }
}

impl MechMarketplaceConfig {
    /// Validates the marketplace section on its own.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.mech_marketplace_address.is_zero() {
            return Err(ConfigError::invalid(
                "mech_marketplace_address cannot be empty",
            ));
        }
        if self.priority_mech_address.is_zero() {
            return Err(ConfigError::invalid("priority_mech_address cannot be empty"));
        }
        if self.response_timeout == 0 {
            return Err(ConfigError::invalid("response_timeout must be positive"));
        }
        Ok(())
    }
}

/// Complete mech interaction configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MechInteractConfig {
    /// Legacy direct mech contract
    pub mech_contract_address: Address,
    /// Probe marketplace dialects
    #[serde(default)]
    pub use_mech_marketplace: bool,
    /// Marketplace section
    #[serde(default)]
    pub mech_marketplace_config: MechMarketplaceConfig,
    /// Mechs excluded from the registry query
    #[serde(default)]
    pub ignored_mechs: Vec<Address>,
    /// Seconds a failing mech stays excluded from selection
    #[serde(default = "default_penalize_mech_time_window")]
    pub penalize_mech_time_window: u64,
    /// Tools that make no mech relevant on their own
    #[serde(default)]
    pub irrelevant_tools: BTreeSet<String>,
    /// Multisend batching contract
    pub multisend_address: Address,
    /// Maximum requests per multisend
    #[serde(default = "default_multisend_batch_size")]
    pub multisend_batch_size: usize,
    /// Seconds between retried steps and polls
    #[serde(default = "default_request_retry_delay")]
    pub request_retry_delay: u64,
    /// Bounded retries for polls, tool fetches and contract steps
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Accept out-of-band deliveries in addition to polling
    #[serde(default)]
    pub use_acn_for_delivers: bool,
    /// Chain the mechs live on
    #[serde(default)]
    pub mech_chain_id: ChainId,
    /// Requester service id, passed to the legacy marketplace
    #[serde(default)]
    pub on_chain_service_id: Option<u64>,
    /// Multisig submitting the transactions
    pub safe_contract_address: Address,
    /// Nevermined balance tracker, required for subscription-paid mechs
    #[serde(default)]
    pub nvm_balance_tracker_address: Option<Address>,
    /// Attempts a round gets on no-majority or timeout
    #[serde(default = "default_max_round_attempts")]
    pub max_round_attempts: u32,
    /// Per-round deadline in seconds
    #[serde(default = "default_round_timeout")]
    pub round_timeout: u64,
    /// Matching payloads required for agreement; byzantine quorum when unset
    #[serde(default)]
    pub consensus_threshold: Option<usize>,
    /// Logging section
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_penalize_mech_time_window() -> u64 {
    DEFAULT_PENALIZE_MECH_TIME_WINDOW_SECS
}

fn default_multisend_batch_size() -> usize {
    DEFAULT_MULTISEND_BATCH_SIZE
}

fn default_request_retry_delay() -> u64 {
    DEFAULT_REQUEST_RETRY_DELAY_SECS
}

fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}

fn default_max_round_attempts() -> u32 {
    DEFAULT_MAX_ROUND_ATTEMPTS
}

fn default_round_timeout() -> u64 {
    DEFAULT_ROUND_TIMEOUT_SECS
}

impl MechInteractConfig {
    /// Creates a configuration with defaults for every optional field.
    pub fn new(
        mech_contract_address: Address,
        multisend_address: Address,
        safe_contract_address: Address,
    ) -> Self {
        Self {
            mech_contract_address,
            use_mech_marketplace: false,
            mech_marketplace_config: MechMarketplaceConfig::default(),
            ignored_mechs: Vec::new(),
            penalize_mech_time_window: DEFAULT_PENALIZE_MECH_TIME_WINDOW_SECS,
            irrelevant_tools: BTreeSet::new(),
            multisend_address,
            multisend_batch_size: DEFAULT_MULTISEND_BATCH_SIZE,
            request_retry_delay: DEFAULT_REQUEST_RETRY_DELAY_SECS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            use_acn_for_delivers: false,
            mech_chain_id: ChainId::default(),
            on_chain_service_id: None,
            safe_contract_address,
            nvm_balance_tracker_address: None,
            max_round_attempts: DEFAULT_MAX_ROUND_ATTEMPTS,
            round_timeout: DEFAULT_ROUND_TIMEOUT_SECS,
            consensus_threshold: None,
            logging: LoggingConfig::default(),
        }
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading mech interaction configuration");
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Validates the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.use_mech_marketplace {
            self.mech_marketplace_config.validate()?;

            if self.mech_contract_address != self.mech_marketplace_config.priority_mech_address {
                return Err(ConfigError::invalid(
                    "The mech contract address must be the same as the priority mech address when using the marketplace",
                ));
            }
        }

        if self.multisend_batch_size == 0 {
            return Err(ConfigError::invalid(
                "multisend_batch_size must be greater than 0",
            ));
        }

        if self.retry_attempts == 0 {
            return Err(ConfigError::invalid("retry_attempts must be greater than 0"));
        }

        if self.max_round_attempts == 0 {
            return Err(ConfigError::invalid(
                "max_round_attempts must be greater than 0",
            ));
        }

        if self.round_timeout == 0 {
            return Err(ConfigError::invalid("round_timeout must be greater than 0"));
        }

        if self.consensus_threshold == Some(0) {
            return Err(ConfigError::invalid(
                "consensus_threshold must be greater than 0",
            ));
        }

        Ok(())
    }

    /// The mech requests go to when nothing else is selected.
    pub fn fallback_mech(&self) -> Address {
        if self.use_mech_marketplace {
            self.mech_marketplace_config.priority_mech_address
        } else {
            self.mech_contract_address
        }
    }

    /// Whether the priority mech is picked from the registry.
    pub fn dynamic_selection_enabled(&self) -> bool {
        self.use_mech_marketplace && self.mech_marketplace_config.use_dynamic_mech_selection
    }

    /// Delay between retried steps.
    pub fn request_retry_delay(&self) -> Duration {
        Duration::from_secs(self.request_retry_delay)
    }

    /// Penalization window.
    pub fn penalize_mech_time_window(&self) -> Duration {
        Duration::from_secs(self.penalize_mech_time_window)
    }

    /// Per-round deadline.
    pub fn round_timeout(&self) -> Duration {
        Duration::from_secs(self.round_timeout)
    }

    /// Subscription constants for the configured chain.
    pub fn nvm_config(&self) -> ConfigResult<NvmConfig> {
        NvmConfig::for_chain(self.mech_chain_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> Address {
        let mut bytes = [0u8; 20];
        bytes[19] = last;
        Address::new(bytes)
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = MechInteractConfig::new(addr(1), addr(2), addr(3));
        assert!(config.validate().is_ok());
        assert_eq!(config.fallback_mech(), addr(1));
        assert!(!config.dynamic_selection_enabled());
    }

    #[test]
    fn test_marketplace_requires_matching_priority_mech() {
        let mut config = MechInteractConfig::new(addr(1), addr(2), addr(3));
        config.use_mech_marketplace = true;
        config.mech_marketplace_config.mech_marketplace_address = addr(9);
        config.mech_marketplace_config.priority_mech_address = addr(8);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));

        config.mech_contract_address = addr(8);
        assert!(config.validate().is_ok());
        assert_eq!(config.fallback_mech(), addr(8));
    }

    #[test]
    fn test_marketplace_requires_addresses() {
        let mut config = MechInteractConfig::new(addr(1), addr(2), addr(3));
        config.use_mech_marketplace = true;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("mech_marketplace_address"));
    }

    #[test]
    fn test_zero_values_rejected() {
        let base = MechInteractConfig::new(addr(1), addr(2), addr(3));

        let mut config = base.clone();
        config.multisend_batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.retry_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.max_round_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = base;
        config.consensus_threshold = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_helpers() {
        let mut config = MechInteractConfig::new(addr(1), addr(2), addr(3));
        config.request_retry_delay = 2;
        config.penalize_mech_time_window = 60;
        assert_eq!(config.request_retry_delay(), Duration::from_secs(2));
        assert_eq!(config.penalize_mech_time_window(), Duration::from_secs(60));
        assert_eq!(config.round_timeout(), Duration::from_secs(30));
    }
}
