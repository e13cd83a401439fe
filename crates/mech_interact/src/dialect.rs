//! The three contract dialects a mech can be reached through.
//!
//! Each dialect gets one handler behind [`DialectHandler`]; the rest of the
//! crate never branches on the dialect itself.

use crate::contracts::{methods, value_as_string, value_as_u128, ContractApi};
use crate::types::MultisendBatch;
use crate::MechInteractResult;
use async_trait::async_trait;
use mech_config::MechInteractConfig;
use mech_primitives::{Address, HEX_PREFIX};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Payment type hash of mechs paid through a native-token subscription.
pub const NATIVE_PAYMENT_TYPE: &str =
    "0x803dd08fe79d91027fc9024e254a0942372b92f3ccabc1bd19f4a5c2b251c316";

/// Payment type hash of mechs paid through a token subscription.
pub const TOKEN_PAYMENT_TYPE: &str =
    "0x0d6fd99afa9c4c580fab5e341922c2a5c4b61d880da60506193d7bf88944dd14";

/// Contract dialect of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// Requests go straight to the mech contract.
    LegacyDirect,
    /// Requests go through the first marketplace.
    LegacyMarketplace,
    /// Requests go through the current marketplace.
    MarketplaceV2,
}

impl Dialect {
    /// Order in which dialects are probed.
    pub const PROBE_ORDER: [Dialect; 3] = [
        Dialect::MarketplaceV2,
        Dialect::LegacyMarketplace,
        Dialect::LegacyDirect,
    ];

    /// `Some(true)` for v2, `Some(false)` for the legacy marketplace, `None` without marketplace.
    pub fn is_marketplace_v2(self) -> Option<bool> {
        match self {
            Self::LegacyDirect => None,
            Self::LegacyMarketplace => Some(false),
            Self::MarketplaceV2 => Some(true),
        }
    }

    /// Whether requests are routed through a marketplace.
    pub fn uses_marketplace(self) -> bool {
        !matches!(self, Self::LegacyDirect)
    }

    /// Returns the snake case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LegacyDirect => "legacy_direct",
            Self::LegacyMarketplace => "legacy_marketplace",
            Self::MarketplaceV2 => "marketplace_v2",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a v2 mech is paid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentType {
    /// Nevermined subscription paid in the native token.
    NvmNative,
    /// Nevermined subscription paid in an ERC20.
    NvmToken,
    /// Any other payment model.
    Other(String),
}

impl PaymentType {
    /// Parses the payment type hash returned by the mech.
    pub fn from_hex(value: &str) -> Self {
        let normalized = value.to_lowercase();
        if normalized == NATIVE_PAYMENT_TYPE {
            Self::NvmNative
        } else if normalized == TOKEN_PAYMENT_TYPE {
            Self::NvmToken
        } else {
            Self::Other(normalized)
        }
    }

    /// Returns the hash.
    pub fn as_hex(&self) -> &str {
        match self {
            Self::NvmNative => NATIVE_PAYMENT_TYPE,
            Self::NvmToken => TOKEN_PAYMENT_TYPE,
            Self::Other(value) => value,
        }
    }

    /// Whether requests draw from a Nevermined subscription.
    pub fn is_nevermined(&self) -> bool {
        matches!(self, Self::NvmNative | Self::NvmToken)
    }
}

/// Price of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MechPrice {
    /// Value attached to the request call.
    pub price: u128,
    /// Payment type, v2 only.
    pub payment_type: Option<PaymentType>,
}

impl MechPrice {
    /// Whether the mech charges a subscription balance.
    pub fn uses_subscription(&self) -> bool {
        self.payment_type
            .as_ref()
            .map(PaymentType::is_nevermined)
            .unwrap_or(false)
    }
}

/// Inputs of one request call.
#[derive(Debug, Clone)]
pub struct RequestCall<'a> {
    /// Mech that should serve the request.
    pub mech: Address,
    /// `0x` prefixed request data.
    pub request_data: &'a str,
    /// Price read for the mech.
    pub price: &'a MechPrice,
}

/// Capability interface implemented once per dialect.
#[async_trait]
pub trait DialectHandler: Send + Sync {
    /// Dialect served.
    fn dialect(&self) -> Dialect;

    /// Contract receiving the request call.
    fn target(&self) -> Address;

    /// Probes whether the deployment speaks this dialect.
    ///
    /// `Ok(false)` means the contract answered without the dialect's signature;
    /// an error means the probe could not tell.
    async fn detect(&self) -> MechInteractResult<bool>;

    /// Reads the price of a request to `mech`.
    async fn price_of(&self, mech: Address) -> MechInteractResult<MechPrice>;

    /// Encodes the request call.
    async fn build_request(&self, call: &RequestCall<'_>) -> MechInteractResult<MultisendBatch>;
}

/// Returns the handler of `dialect`.
pub fn handler_for(
    dialect: Dialect,
    contracts: Arc<dyn ContractApi>,
    config: Arc<MechInteractConfig>,
) -> Box<dyn DialectHandler> {
    match dialect {
        Dialect::LegacyDirect => Box::new(LegacyDirectHandler { contracts, config }),
        Dialect::LegacyMarketplace => Box::new(LegacyMarketplaceHandler { contracts, config }),
        Dialect::MarketplaceV2 => Box::new(MarketplaceV2Handler { contracts, config }),
    }
}

async fn probe(
    contracts: &dyn ContractApi,
    contract: Address,
    method: &str,
) -> MechInteractResult<bool> {
    match contracts.read(contract, method, json!({})).await {
        Ok(_) => Ok(true),
        Err(err) if err.is_revert() => {
            debug!(contract = %contract, method, "Probe reverted");
            Ok(false)
        }
        Err(err) => Err(err),
    }
}

async fn legacy_price(contracts: &dyn ContractApi, mech: Address) -> MechInteractResult<MechPrice> {
    let price = contracts
        .read(mech, methods::GET_PRICE, json!({}))
        .await?;
    Ok(MechPrice {
        price: value_as_u128(methods::GET_PRICE, &price)?,
        payment_type: None,
    })
}

/// Direct requests to the configured mech contract.
pub struct LegacyDirectHandler {
    contracts: Arc<dyn ContractApi>,
    config: Arc<MechInteractConfig>,
}

#[async_trait]
impl DialectHandler for LegacyDirectHandler {
    fn dialect(&self) -> Dialect {
        Dialect::LegacyDirect
    }

    fn target(&self) -> Address {
        self.config.mech_contract_address
    }

    async fn detect(&self) -> MechInteractResult<bool> {
        probe(
            self.contracts.as_ref(),
            self.config.mech_contract_address,
            methods::GET_PRICE,
        )
        .await
    }

    async fn price_of(&self, mech: Address) -> MechInteractResult<MechPrice> {
        legacy_price(self.contracts.as_ref(), mech).await
    }

    async fn build_request(&self, call: &RequestCall<'_>) -> MechInteractResult<MultisendBatch> {
        let data = self
            .contracts
            .build_tx(
                self.target(),
                methods::GET_REQUEST_DATA,
                json!({ "request_data": call.request_data }),
            )
            .await?;
        Ok(MultisendBatch {
            to: self.target(),
            value: call.price.price,
            data,
        })
    }
}

/// Requests through the first marketplace, with staking arguments.
pub struct LegacyMarketplaceHandler {
    contracts: Arc<dyn ContractApi>,
    config: Arc<MechInteractConfig>,
}

#[async_trait]
impl DialectHandler for LegacyMarketplaceHandler {
    fn dialect(&self) -> Dialect {
        Dialect::LegacyMarketplace
    }

    fn target(&self) -> Address {
        self.config.mech_marketplace_config.mech_marketplace_address
    }

    async fn detect(&self) -> MechInteractResult<bool> {
        probe(self.contracts.as_ref(), self.target(), methods::FEE).await
    }

    async fn price_of(&self, mech: Address) -> MechInteractResult<MechPrice> {
        legacy_price(self.contracts.as_ref(), mech).await
    }

    async fn build_request(&self, call: &RequestCall<'_>) -> MechInteractResult<MultisendBatch> {
        let marketplace = &self.config.mech_marketplace_config;
        let data = self
            .contracts
            .build_tx(
                self.target(),
                methods::GET_REQUEST_DATA,
                json!({
                    "request_data": call.request_data,
                    "priority_mech": call.mech,
                    "priority_mech_staking_instance": marketplace.priority_mech_staking_instance_address,
                    "priority_mech_service_id": marketplace.priority_mech_service_id,
                    "requester_staking_instance": marketplace.requester_staking_instance_address,
                    "requester_service_id": self.config.on_chain_service_id,
                    "response_timeout": marketplace.response_timeout,
                }),
            )
            .await?;
        Ok(MultisendBatch {
            to: self.target(),
            value: call.price.price,
            data,
        })
    }
}

/// Requests through the current marketplace, priced by delivery rate.
pub struct MarketplaceV2Handler {
    contracts: Arc<dyn ContractApi>,
    config: Arc<MechInteractConfig>,
}

#[async_trait]
impl DialectHandler for MarketplaceV2Handler {
    fn dialect(&self) -> Dialect {
        Dialect::MarketplaceV2
    }

    fn target(&self) -> Address {
        self.config.mech_marketplace_config.mech_marketplace_address
    }

    async fn detect(&self) -> MechInteractResult<bool> {
        probe(
            self.contracts.as_ref(),
            self.target(),
            methods::GET_MAX_FEE_FACTOR,
        )
        .await
    }

    async fn price_of(&self, mech: Address) -> MechInteractResult<MechPrice> {
        let (rate, payment_type) = tokio::try_join!(
            self.contracts
                .read(mech, methods::GET_MAX_DELIVERY_RATE, json!({})),
            self.contracts.read(mech, methods::GET_PAYMENT_TYPE, json!({})),
        )?;
        Ok(MechPrice {
            price: value_as_u128(methods::GET_MAX_DELIVERY_RATE, &rate)?,
            payment_type: Some(PaymentType::from_hex(&value_as_string(
                methods::GET_PAYMENT_TYPE,
                &payment_type,
            )?)),
        })
    }

    async fn build_request(&self, call: &RequestCall<'_>) -> MechInteractResult<MultisendBatch> {
        let payment_type = call
            .price
            .payment_type
            .as_ref()
            .map(|p| p.as_hex().to_string());
        let data = self
            .contracts
            .build_tx(
                self.target(),
                methods::GET_REQUEST_DATA,
                json!({
                    "request_data": call.request_data,
                    "priority_mech": call.mech,
                    "payment_data": HEX_PREFIX,
                    "payment_type": payment_type,
                    "response_timeout": self.config.mech_marketplace_config.response_timeout,
                    "max_delivery_rate": call.price.price.to_string(),
                }),
            )
            .await?;
        Ok(MultisendBatch {
            to: self.target(),
            value: call.price.price,
            data,
        })
    }
}
