//! Interfaces of the external collaborators.
//!
//! The skill never encodes ABI calls, signs transactions or speaks HTTP itself.
//! Everything on-chain goes through [`ContractApi`], uploads and downloads through
//! [`ContentStore`], the mech listing through [`MechRegistryClient`] and deliveries
//! through [`MechResponseSource`].

use crate::types::{ContentId, Delivery, MechInfo};
use crate::{MechInteractError, MechInteractResult};
use async_trait::async_trait;
use mech_primitives::{strip_hex_prefix, Address};
use serde_json::Value;

/// Contract methods called by the skill.
pub mod methods {
    /// Only the current marketplace exposes it; used as the v2 probe.
    pub const GET_MAX_FEE_FACTOR: &str = "get_max_fee_factor";
    /// Marketplace fee of the legacy marketplace; used as the v1 probe.
    pub const FEE: &str = "fee";
    /// Price of a legacy mech.
    pub const GET_PRICE: &str = "get_price";
    /// Delivery rate ceiling of a v2 mech.
    pub const GET_MAX_DELIVERY_RATE: &str = "get_max_delivery_rate";
    /// Payment type hash of a v2 mech.
    pub const GET_PAYMENT_TYPE: &str = "get_payment_type";
    /// Encodes a request call.
    pub const GET_REQUEST_DATA: &str = "get_request_data";
    /// Encodes a multisend call.
    pub const MULTI_SEND: &str = "get_tx_data";
    /// Safe transaction hash.
    pub const GET_RAW_SAFE_TRANSACTION_HASH: &str = "get_raw_safe_transaction_hash";
    /// Subscription balance held by the tracker or an NFT.
    pub const GET_BALANCE: &str = "get_balance";
    /// Subscription NFT registered with the tracker.
    pub const GET_SUBSCRIPTION_NFT: &str = "get_subscription_nft";
    /// Subscription token id registered with the tracker.
    pub const GET_SUBSCRIPTION_TOKEN_ID: &str = "get_subscription_token_id";
    /// Encodes an ERC20 approval.
    pub const BUILD_APPROVAL_TX: &str = "build_approval_tx";
    /// Agreement id for a seed and subscriber.
    pub const GET_AGREEMENT_ID: &str = "get_agreement_id";
    /// Encodes agreement creation and payment.
    pub const BUILD_CREATE_AGREEMENT_TX: &str = "build_create_agreement_and_pay_tx";
    /// Encodes subscription fulfillment.
    pub const BUILD_FULFILL_TX: &str = "build_fulfill_tx";
}

/// Read and encode access to contracts.
#[async_trait]
pub trait ContractApi: Send + Sync {
    /// Calls a view method.
    ///
    /// Returns `MechInteractError::ContractReverted` when the contract answered
    /// but the method reverted or does not exist.
    async fn read(&self, contract: Address, method: &str, args: Value) -> MechInteractResult<Value>;

    /// Encodes a call to be included in a transaction.
    async fn build_tx(
        &self,
        contract: Address,
        method: &str,
        args: Value,
    ) -> MechInteractResult<Vec<u8>>;
}

/// Content-addressed off-chain storage.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Downloads content.
    async fn get(&self, id: &ContentId) -> MechInteractResult<Vec<u8>>;

    /// Uploads content and returns its id.
    async fn put(&self, bytes: Vec<u8>) -> MechInteractResult<ContentId>;
}

/// Paged access to the mech registry.
#[async_trait]
pub trait MechRegistryClient: Send + Sync {
    /// Returns up to `first` mechs with id greater than `id_gt`, ordered by id,
    /// leaving out `ignored`.
    async fn fetch_mechs(
        &self,
        id_gt: u64,
        first: usize,
        ignored: &[Address],
    ) -> MechInteractResult<Vec<MechInfo>>;
}

/// Where mech deliveries are observed.
#[async_trait]
pub trait MechResponseSource: Send + Sync {
    /// Request ids emitted by a settled transaction, in request order.
    async fn request_ids(&self, tx_hash: &str) -> MechInteractResult<Vec<String>>;

    /// Delivery for `request_id`, if it happened.
    async fn poll(&self, request_id: &str) -> MechInteractResult<Option<Delivery>>;
}

/// Reads an integer returned as a JSON number or a decimal / `0x` hex string.
pub fn value_as_u128(field: &str, value: &Value) -> MechInteractResult<u128> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .map(u128::from)
            .ok_or_else(|| MechInteractError::unexpected(field, value)),
        Value::String(s) if s.starts_with("0x") || s.starts_with("0X") => {
            u128::from_str_radix(strip_hex_prefix(s), 16)
                .map_err(|_| MechInteractError::unexpected(field, value))
        }
        Value::String(s) => s
            .parse::<u128>()
            .map_err(|_| MechInteractError::unexpected(field, value)),
        _ => Err(MechInteractError::unexpected(field, value)),
    }
}

/// Reads a string value.
pub fn value_as_string(field: &str, value: &Value) -> MechInteractResult<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| MechInteractError::unexpected(field, value))
}

/// Reads an address value.
pub fn value_as_address(field: &str, value: &Value) -> MechInteractResult<Address> {
    Ok(Address::parse(&value_as_string(field, value)?)?)
}
