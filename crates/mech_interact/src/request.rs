//! Building the request transaction.
//!
//! One cycle sends at most `multisend_batch_size` queued requests. Each request
//! is uploaded to the content store, its content digest becomes the on-chain
//! request data, and the dialect handler encodes the call. All calls land in a
//! single multisend. Requests beyond the batch stay queued for the next cycle.

use crate::contracts::{methods, value_as_address, value_as_u128, ContentStore, ContractApi};
use crate::dialect::{handler_for, Dialect, DialectHandler, MechPrice, RequestCall};
use crate::multisend::{build_safe_multisend, SafeTransaction};
use crate::retry::RetryPolicy;
use crate::synced_state::SyncedState;
use crate::types::{MechInteractionResponse, MechMetadata};
use crate::{MechInteractError, MechInteractResult};
use futures::future::try_join_all;
use mech_config::MechInteractConfig;
use mech_primitives::Address;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

/// A request transaction ready to be agreed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRequest {
    /// Mech serving the requests.
    pub mech: Address,
    /// Price per request.
    pub price: u128,
    /// Multisend carrying the request calls.
    pub tx: SafeTransaction,
    /// Requests left for the next cycle.
    pub remaining: Vec<MechMetadata>,
    /// Known responses followed by one pending response per sent request.
    pub responses: Vec<MechInteractionResponse>,
}

/// What the request round should vote for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestPlan {
    /// Nothing queued.
    Skip,
    /// The subscription balance does not cover the mech.
    BuySubscription {
        /// Mech charging the subscription.
        mech: Address,
        /// Current balance.
        balance: u128,
        /// Delivery rate of the mech.
        required: u128,
    },
    /// Transaction built.
    Prepared(PreparedRequest),
}

/// Turns queued requests into a transaction.
pub struct RequestBuilder {
    contracts: Arc<dyn ContractApi>,
    content: Arc<dyn ContentStore>,
    config: Arc<MechInteractConfig>,
    retry: RetryPolicy,
}

impl RequestBuilder {
    /// Creates a builder.
    pub fn new(
        contracts: Arc<dyn ContractApi>,
        content: Arc<dyn ContentStore>,
        config: Arc<MechInteractConfig>,
    ) -> Self {
        let retry = RetryPolicy::from_config(&config);
        Self {
            contracts,
            content,
            config,
            retry,
        }
    }

    /// Mech the requests of `dialect` are sent to.
    pub fn target_mech(&self, dialect: Dialect, synced: &SyncedState) -> Address {
        match dialect {
            Dialect::LegacyDirect => self.config.mech_contract_address,
            _ => synced
                .priority_mech_address()
                .unwrap_or_else(|| self.config.fallback_mech()),
        }
    }

    /// Subscription credits held by the safe.
    ///
    /// Sums the tracker balance and the subscription NFT balance.
    pub async fn subscription_balance(&self) -> MechInteractResult<u128> {
        let tracker = self.config.nvm_balance_tracker_address.ok_or_else(|| {
            MechInteractError::MissingData("nvm_balance_tracker_address".to_string())
        })?;
        let safe = self.config.safe_contract_address;
        let requester = json!({ "requester": safe });

        let (tracked, nft, token_id) = tokio::try_join!(
            self.contracts.read(tracker, methods::GET_BALANCE, requester.clone()),
            self.contracts.read(tracker, methods::GET_SUBSCRIPTION_NFT, json!({})),
            self.contracts.read(tracker, methods::GET_SUBSCRIPTION_TOKEN_ID, json!({})),
        )?;
        let tracked = value_as_u128(methods::GET_BALANCE, &tracked)?;
        let nft = value_as_address(methods::GET_SUBSCRIPTION_NFT, &nft)?;
        let token_id = value_as_u128(methods::GET_SUBSCRIPTION_TOKEN_ID, &token_id)?;

        let held = self
            .contracts
            .read(
                nft,
                methods::GET_BALANCE,
                json!({ "account": safe, "token_id": token_id.to_string() }),
            )
            .await?;
        let held = value_as_u128(methods::GET_BALANCE, &held)?;

        debug!(tracked, held, "Read subscription balance");
        Ok(tracked.saturating_add(held))
    }

    async fn check_subscription(&self, mech: Address, price: &MechPrice) -> MechInteractResult<()> {
        if !price.uses_subscription() {
            return Ok(());
        }
        let balance = self
            .retry
            .retry("subscription balance", || self.subscription_balance())
            .await?;
        if balance < price.price {
            return Err(MechInteractError::SubscriptionRequired {
                mech,
                balance,
                required: price.price,
            });
        }
        Ok(())
    }

    async fn upload(&self, metadata: &MechMetadata) -> MechInteractResult<String> {
        let bytes = serde_json::to_vec(metadata)?;
        let id = self
            .retry
            .retry("request upload", || self.content.put(bytes.clone()))
            .await?;
        id.request_data()
    }

    async fn encode(
        &self,
        handler: &dyn DialectHandler,
        mech: Address,
        price: &MechPrice,
        request_data: &[String],
    ) -> MechInteractResult<SafeTransaction> {
        let batches = try_join_all(request_data.iter().map(|data| async move {
            let call = RequestCall {
                mech,
                request_data: data,
                price,
            };
            handler.build_request(&call).await
        }))
        .await?;
        build_safe_multisend(self.contracts.as_ref(), &self.config, &batches).await
    }

    /// Plans the request round for `dialect`.
    pub async fn prepare(
        &self,
        dialect: Dialect,
        synced: &SyncedState,
    ) -> MechInteractResult<RequestPlan> {
        let queued = synced.mech_requests();
        if queued.is_empty() {
            info!("No mech requests queued");
            return Ok(RequestPlan::Skip);
        }

        let handler = handler_for(dialect, self.contracts.clone(), self.config.clone());
        let mech = self.target_mech(dialect, synced);
        let price = self
            .retry
            .retry("mech price", || handler.price_of(mech))
            .await?;

        match self.check_subscription(mech, &price).await {
            Ok(()) => {}
            Err(MechInteractError::SubscriptionRequired {
                mech,
                balance,
                required,
            }) => {
                info!(mech = %mech, balance, required, "Subscription balance too low");
                return Ok(RequestPlan::BuySubscription {
                    mech,
                    balance,
                    required,
                });
            }
            Err(err) => return Err(err),
        }

        // oldest first, the rest keeps its submission order
        let split = queued.len().min(self.config.multisend_batch_size);
        let (batch, remaining) = queued.split_at(split);

        let request_data = try_join_all(batch.iter().map(|metadata| self.upload(metadata))).await?;
        let tx = self
            .retry
            .retry("request transaction", || {
                self.encode(handler.as_ref(), mech, &price, &request_data)
            })
            .await?;

        let mut responses = synced.mech_responses().to_vec();
        responses.extend(
            batch
                .iter()
                .zip(&request_data)
                .map(|(metadata, data)| MechInteractionResponse::pending(&metadata.nonce, data)),
        );

        info!(
            mech = %mech,
            dialect = %dialect,
            sent = batch.len(),
            remaining = remaining.len(),
            "Prepared mech request"
        );

        Ok(RequestPlan::Prepared(PreparedRequest {
            mech,
            price: price.price,
            tx,
            remaining: remaining.to_vec(),
            responses,
        }))
    }
}
