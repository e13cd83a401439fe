//! Purchase of a Nevermined subscription.

use crate::contracts::{methods, value_as_string, ContractApi};
use crate::multisend::{build_safe_multisend, SafeTransaction};
use crate::retry::RetryPolicy;
use crate::synced_state::SyncedState;
use crate::types::MultisendBatch;
use crate::MechInteractResult;
use mech_config::{MechInteractConfig, NvmConfig};
use mech_primitives::{strip_hex_prefix, Address, HEX_PREFIX};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::info;

/// Agreement id seed shared by every participant of one period.
pub fn agreement_id_seed(safe: Address, did: &str, period: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(safe.as_bytes());
    hasher.update(strip_hex_prefix(did).as_bytes());
    hasher.update(period.to_be_bytes());
    format!("{HEX_PREFIX}{}", hex::encode(hasher.finalize()))
}

/// Builds the subscription purchase transaction.
pub struct SubscriptionPurchaser {
    contracts: Arc<dyn ContractApi>,
    config: Arc<MechInteractConfig>,
    retry: RetryPolicy,
}

impl SubscriptionPurchaser {
    /// Creates a purchaser.
    pub fn new(contracts: Arc<dyn ContractApi>, config: Arc<MechInteractConfig>) -> Self {
        let retry = RetryPolicy::from_config(&config);
        Self {
            contracts,
            config,
            retry,
        }
    }

    async fn agreement_id(&self, nvm: &NvmConfig, seed: &str) -> MechInteractResult<String> {
        let id = self
            .contracts
            .read(
                nvm.nft_sales_address,
                methods::GET_AGREEMENT_ID,
                json!({
                    "agreement_id_seed": seed,
                    "creator": self.config.safe_contract_address,
                }),
            )
            .await?;
        value_as_string(methods::GET_AGREEMENT_ID, &id)
    }

    async fn build(&self, nvm: &NvmConfig, period: u64) -> MechInteractResult<SafeTransaction> {
        let safe = self.config.safe_contract_address;
        let did = nvm.did();
        let seed = agreement_id_seed(safe, &did, period);
        let agreement_id = self.agreement_id(nvm, &seed).await?;
        let amounts: Vec<String> = nvm.amounts().iter().map(u128::to_string).collect();
        let mut batches = Vec::with_capacity(3);

        if !nvm.is_native_payment() {
            let approval = self
                .contracts
                .build_tx(
                    nvm.subscription_token_address,
                    methods::BUILD_APPROVAL_TX,
                    json!({
                        "spender": nvm.nft_sales_address,
                        "amount": nvm.total_price().to_string(),
                    }),
                )
                .await?;
            batches.push(MultisendBatch {
                to: nvm.subscription_token_address,
                value: 0,
                data: approval,
            });
        }

        let create = self
            .contracts
            .build_tx(
                nvm.nft_sales_address,
                methods::BUILD_CREATE_AGREEMENT_TX,
                json!({
                    "agreement_id_seed": seed,
                    "did": did,
                    "reward_address": nvm.subscription_provider_address,
                    "token_address": nvm.subscription_token_address,
                    "amounts": amounts,
                    "subscriber": safe,
                }),
            )
            .await?;
        batches.push(MultisendBatch {
            to: nvm.nft_sales_address,
            value: if nvm.is_native_payment() {
                nvm.total_price()
            } else {
                0
            },
            data: create,
        });

        let fulfill = self
            .contracts
            .build_tx(
                nvm.subscription_provider_address,
                methods::BUILD_FULFILL_TX,
                json!({
                    "agreement_id": agreement_id,
                    "did": did,
                    "nft_address": nvm.subscription_nft_address,
                    "subscriber": safe,
                    "credits": nvm.subscription_credits.to_string(),
                }),
            )
            .await?;
        batches.push(MultisendBatch {
            to: nvm.subscription_provider_address,
            value: 0,
            data: fulfill,
        });

        build_safe_multisend(self.contracts.as_ref(), &self.config, &batches).await
    }

    /// Builds the purchase multisend for the current period.
    pub async fn prepare(&self, synced: &SyncedState) -> MechInteractResult<SafeTransaction> {
        let nvm = self.config.nvm_config()?;
        let tx = self
            .retry
            .retry("subscription purchase", || self.build(&nvm, synced.period()))
            .await?;
        info!(
            chain = %self.config.mech_chain_id,
            value = tx.value,
            hash = %tx.safe_tx_hash,
            "Prepared subscription purchase"
        );
        Ok(tx)
    }
}
