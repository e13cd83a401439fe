//! Batching of calls into one multisig transaction.

use crate::contracts::{methods, value_as_string, ContractApi};
use crate::types::MultisendBatch;
use crate::{MechInteractError, MechInteractResult};
use mech_config::MechInteractConfig;
use mech_primitives::{encode_hex, strip_hex_prefix, Address};
use serde_json::{json, Value};
use tracing::debug;

/// Safe operation code of a delegate call.
pub const DELEGATE_CALL: u8 = 1;

/// Multisend transaction ready for settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeTransaction {
    /// Safe transaction hash, `0x` prefixed.
    pub safe_tx_hash: String,
    /// Multisend contract.
    pub to: Address,
    /// Total native value.
    pub value: u128,
    /// Encoded multisend call.
    pub data: Vec<u8>,
}

impl SafeTransaction {
    /// Settlement payload: hash, 32-byte value, target and call data, hex encoded.
    pub fn to_hex(&self) -> String {
        format!(
            "{}{:064x}{}{}",
            strip_hex_prefix(&self.safe_tx_hash),
            self.value,
            strip_hex_prefix(&self.to.to_hex_string()),
            strip_hex_prefix(&encode_hex(&self.data)),
        )
    }
}

fn encode_batches(batches: &[MultisendBatch]) -> Value {
    Value::Array(
        batches
            .iter()
            .map(|batch| {
                json!({
                    "operation": 0,
                    "to": batch.to,
                    "value": batch.value.to_string(),
                    "data": encode_hex(&batch.data),
                })
            })
            .collect(),
    )
}

/// Wraps `batches` into a multisend executed by the safe.
pub async fn build_safe_multisend(
    contracts: &dyn ContractApi,
    config: &MechInteractConfig,
    batches: &[MultisendBatch],
) -> MechInteractResult<SafeTransaction> {
    if batches.is_empty() {
        return Err(MechInteractError::MissingData(
            "calls to batch".to_string(),
        ));
    }

    let value = batches.iter().try_fold(0u128, |total, batch| {
        total
            .checked_add(batch.value)
            .ok_or_else(|| MechInteractError::unexpected("multisend value", "overflow"))
    })?;

    let data = contracts
        .build_tx(
            config.multisend_address,
            methods::MULTI_SEND,
            json!({ "multi_send_txs": encode_batches(batches) }),
        )
        .await?;

    let hash = contracts
        .read(
            config.safe_contract_address,
            methods::GET_RAW_SAFE_TRANSACTION_HASH,
            json!({
                "to_address": config.multisend_address,
                "value": value.to_string(),
                "data": encode_hex(&data),
                "operation": DELEGATE_CALL,
            }),
        )
        .await?;
    let safe_tx_hash = value_as_string(methods::GET_RAW_SAFE_TRANSACTION_HASH, &hash)?;

    debug!(calls = batches.len(), value, hash = %safe_tx_hash, "Prepared multisend");

    Ok(SafeTransaction {
        safe_tx_hash,
        to: config.multisend_address,
        value,
        data,
    })
}
