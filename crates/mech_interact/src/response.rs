//! Collection and validation of mech responses.
//!
//! Deliveries are polled from the [`MechResponseSource`] with bounded retries.
//! When out-of-band delivery is enabled, the [`AcnInbox`] is checked first on
//! every attempt. Both paths go through the same acceptance check: the
//! delivered content must be a JSON object carrying a `result` key.

use crate::contracts::{ContentStore, MechResponseSource};
use crate::retry::RetryPolicy;
use crate::synced_state::SyncedState;
use crate::types::{ContentId, Delivery, MechInteractionResponse};
use crate::{truncate_for_log, MechInteractError, MechInteractResult};
use futures::future::join_all;
use mech_config::MechInteractConfig;
use mech_primitives::Address;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Key the delivered document must carry.
pub const RESULT_FIELD: &str = "result";

/// Deliveries pushed by mechs over the agent communication network.
#[derive(Debug, Clone, Default)]
pub struct AcnInbox {
    deliveries: Arc<Mutex<BTreeMap<String, Delivery>>>,
}

impl AcnInbox {
    /// Creates an empty inbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a delivery, replacing an earlier one for the same request.
    pub fn deliver(&self, delivery: Delivery) {
        debug!(request_id = %delivery.request_id, mech = %delivery.mech, "Out-of-band delivery");
        self.deliveries
            .lock()
            .insert(delivery.request_id.clone(), delivery);
    }

    /// Removes and returns the delivery of `request_id`.
    pub fn take(&self, request_id: &str) -> Option<Delivery> {
        self.deliveries.lock().remove(request_id)
    }

    /// Deliveries waiting to be consumed.
    pub fn len(&self) -> usize {
        self.deliveries.lock().len()
    }

    /// Returns true when nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.deliveries.lock().is_empty()
    }
}

/// Outcome of the response round for one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// Every pending response was accepted.
    Delivered(Vec<MechInteractionResponse>),
    /// At least one response could not be obtained or was malformed.
    Failed {
        /// Mech to penalize.
        mech: Address,
        /// Responses with the failures recorded.
        responses: Vec<MechInteractionResponse>,
        /// First failure.
        reason: String,
    },
}

/// Waits for and validates responses.
pub struct ResponseCollector {
    source: Arc<dyn MechResponseSource>,
    content: Arc<dyn ContentStore>,
    config: Arc<MechInteractConfig>,
    inbox: Option<AcnInbox>,
    retry: RetryPolicy,
}

impl ResponseCollector {
    /// Creates a collector; `inbox` is only consulted with `use_acn_for_delivers`.
    pub fn new(
        source: Arc<dyn MechResponseSource>,
        content: Arc<dyn ContentStore>,
        config: Arc<MechInteractConfig>,
        inbox: Option<AcnInbox>,
    ) -> Self {
        let retry = RetryPolicy::from_config(&config);
        Self {
            source,
            content,
            config,
            inbox,
            retry,
        }
    }

    fn inbox(&self) -> Option<&AcnInbox> {
        self.inbox
            .as_ref()
            .filter(|_| self.config.use_acn_for_delivers)
    }

    async fn poll_once(&self, request_id: &str) -> MechInteractResult<Delivery> {
        if let Some(delivery) = self.inbox().and_then(|inbox| inbox.take(request_id)) {
            return Ok(delivery);
        }
        self.source
            .poll(request_id)
            .await?
            .ok_or_else(|| MechInteractError::MissingData(format!("delivery of {request_id}")))
    }

    /// Polls until the delivery of `request_id` arrives or the retries run out.
    pub async fn await_delivery(&self, request_id: &str) -> MechInteractResult<Delivery> {
        self.retry
            .retry("mech delivery", || self.poll_once(request_id))
            .await
    }

    /// Fetches the delivered content and extracts its result.
    pub async fn accept(&self, delivery: &Delivery) -> MechInteractResult<String> {
        let invalid = |reason: String| MechInteractError::ResponseInvalid {
            mech: delivery.mech,
            reason,
        };

        let id = ContentId::from_digest_hex(&delivery.data);
        let bytes = self
            .retry
            .retry("response download", || self.content.get(&id))
            .await?;
        let document: Value = serde_json::from_slice(&bytes)
            .map_err(|e| invalid(format!("not JSON: {e}")))?;

        match document.get(RESULT_FIELD) {
            Some(Value::String(result)) => Ok(result.clone()),
            Some(other) => Ok(other.to_string()),
            None => Err(invalid(format!(
                "missing {RESULT_FIELD}: {}",
                truncate_for_log(&document.to_string())
            ))),
        }
    }

    async fn resolve(&self, response: &mut MechInteractionResponse) -> Option<String> {
        let delivery = match self.await_delivery(&response.request_id).await {
            Ok(delivery) => delivery,
            Err(err) => {
                warn!(request_id = %response.request_id, error = %err, "No delivery");
                response.retries_exceeded();
                return Some(response.error.clone());
            }
        };

        match self.accept(&delivery).await {
            Ok(result) => {
                info!(
                    request_id = %response.request_id,
                    mech = %delivery.mech,
                    result = %truncate_for_log(&result),
                    "Accepted mech response"
                );
                response.result = Some(result);
                response.sender_address = Some(delivery.mech);
                None
            }
            Err(err @ MechInteractError::ResponseInvalid { .. }) => {
                warn!(request_id = %response.request_id, error = %err, "Rejected mech response");
                response.incorrect_format(&err);
                response.sender_address = Some(delivery.mech);
                Some(response.error.clone())
            }
            Err(err) => {
                // local download failures must not leak into the vote
                warn!(request_id = %response.request_id, error = %err, "Response content unavailable");
                response.retries_exceeded();
                response.sender_address = Some(delivery.mech);
                Some(response.error.clone())
            }
        }
    }

    /// Collects every pending response of the settled request transaction.
    pub async fn collect(&self, synced: &SyncedState) -> MechInteractResult<ResponseOutcome> {
        let tx_hash = synced
            .final_tx_hash()
            .ok_or_else(|| MechInteractError::MissingData("final_tx_hash".to_string()))?;
        let mech = synced
            .last_called_mech()
            .unwrap_or_else(|| self.config.fallback_mech());
        let mut responses = synced.mech_responses().to_vec();

        let pending: Vec<usize> = responses
            .iter()
            .enumerate()
            .filter(|(_, response)| response.is_pending())
            .map(|(index, _)| index)
            .collect();
        if pending.is_empty() {
            debug!("No pending responses");
            return Ok(ResponseOutcome::Delivered(responses));
        }

        let request_ids = match self
            .retry
            .retry("request ids", || self.source.request_ids(tx_hash))
            .await
        {
            Ok(ids) if ids.len() >= pending.len() => ids,
            Ok(ids) => {
                let cause = format!(
                    "transaction {tx_hash} emitted {} request ids for {} requests",
                    ids.len(),
                    pending.len()
                );
                return Ok(self.fail_all(mech, responses, &pending, &cause));
            }
            Err(err) => return Ok(self.fail_all(mech, responses, &pending, &err.to_string())),
        };

        for (index, request_id) in pending.iter().zip(request_ids) {
            responses[*index].request_id = request_id;
        }

        let mut slots: Vec<MechInteractionResponse> =
            pending.iter().map(|index| responses[*index].clone()).collect();
        let failures = join_all(slots.iter_mut().map(|response| self.resolve(response))).await;

        for (index, resolved) in pending.iter().zip(slots) {
            responses[*index] = resolved;
        }

        match failures.into_iter().flatten().next() {
            Some(reason) => Ok(ResponseOutcome::Failed {
                mech,
                responses,
                reason,
            }),
            None => Ok(ResponseOutcome::Delivered(responses)),
        }
    }

    /// Marks every pending response as exhausted.
    ///
    /// `cause` is local to this participant and only logged; the voted reason
    /// is the fixed retries message every participant produces.
    fn fail_all(
        &self,
        mech: Address,
        mut responses: Vec<MechInteractionResponse>,
        pending: &[usize],
        cause: &str,
    ) -> ResponseOutcome {
        warn!(mech = %mech, cause = %cause, "Could not locate the requests");
        for index in pending {
            responses[*index].retries_exceeded();
        }
        let reason = pending
            .first()
            .map(|index| responses[*index].error.clone())
            .unwrap_or_default();
        ResponseOutcome::Failed {
            mech,
            responses,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbox_hands_out_each_delivery_once() {
        let inbox = AcnInbox::new();
        inbox.deliver(Delivery {
            request_id: "1".to_string(),
            mech: Address::ZERO,
            data: "0x00".to_string(),
        });
        assert_eq!(inbox.len(), 1);
        assert!(inbox.take("2").is_none());
        assert!(inbox.take("1").is_some());
        assert!(inbox.take("1").is_none());
        assert!(inbox.is_empty());
    }
}
