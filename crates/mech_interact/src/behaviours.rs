//! Local computation of each round's payload.

use crate::contracts::{ContentStore, ContractApi, MechRegistryClient, MechResponseSource};
use crate::payloads::{InformationVote, MechPayload, RequestVote, ResponseVote};
use crate::registry::{select_priority_mech, MechRegistry};
use crate::request::{RequestBuilder, RequestPlan};
use crate::response::{AcnInbox, ResponseCollector, ResponseOutcome};
use crate::rounds::Round;
use crate::subscription::SubscriptionPurchaser;
use crate::synced_state::SyncedState;
use crate::version::VersionDetector;
use crate::MechInteractResult;
use mech_config::MechInteractConfig;
use std::sync::Arc;
use tracing::{debug, warn};

/// External collaborators of one participant.
#[derive(Clone)]
pub struct Collaborators {
    /// Contract access.
    pub contracts: Arc<dyn ContractApi>,
    /// Content store.
    pub content: Arc<dyn ContentStore>,
    /// Mech registry.
    pub registry: Arc<dyn MechRegistryClient>,
    /// Delivery source.
    pub responses: Arc<dyn MechResponseSource>,
    /// Out-of-band deliveries.
    pub inbox: Option<AcnInbox>,
}

/// Computes the payload a participant proposes in each round.
pub struct MechInteractBehaviours {
    config: Arc<MechInteractConfig>,
    detector: VersionDetector,
    registry: MechRegistry,
    requests: RequestBuilder,
    subscriptions: SubscriptionPurchaser,
    responses: ResponseCollector,
}

impl MechInteractBehaviours {
    /// Wires the components to the collaborators.
    pub fn new(config: Arc<MechInteractConfig>, collaborators: Collaborators) -> Self {
        let Collaborators {
            contracts,
            content,
            registry,
            responses,
            inbox,
        } = collaborators;

        Self {
            detector: VersionDetector::new(contracts.clone(), config.clone()),
            registry: MechRegistry::new(registry, content.clone(), config.clone()),
            requests: RequestBuilder::new(contracts.clone(), content.clone(), config.clone()),
            subscriptions: SubscriptionPurchaser::new(contracts, config.clone()),
            responses: ResponseCollector::new(responses, content, config.clone(), inbox),
            config,
        }
    }

    /// Dialect detector, shared across rounds.
    pub fn detector(&self) -> &VersionDetector {
        &self.detector
    }

    /// Payload for `round` given the agreed `synced` state.
    ///
    /// Failures a round can vote on become payloads. Others are returned as
    /// errors; the participant then abstains and the round runs into its deadline.
    pub async fn local_payload(
        &self,
        round: Round,
        synced: &SyncedState,
    ) -> MechInteractResult<MechPayload> {
        debug!(round = %round, version = synced.version(), "Computing payload");

        match round {
            Round::MechVersionDetection => Ok(MechPayload::VersionDetection(
                self.dialect(synced).await.ok(),
            )),
            Round::MechInformation => Ok(MechPayload::Information(self.information(synced).await)),
            Round::MechRequest => self.request(synced).await.map(MechPayload::Request),
            Round::MechPurchaseSubscription => {
                let tx = match self.subscriptions.prepare(synced).await {
                    Ok(tx) => Some(tx.to_hex()),
                    Err(err) => {
                        warn!(error = %err, "Could not build the subscription purchase");
                        None
                    }
                };
                Ok(MechPayload::PurchaseSubscription(tx))
            }
            Round::MechResponse => {
                let vote = match self.responses.collect(synced).await? {
                    ResponseOutcome::Delivered(responses) => ResponseVote::Delivered { responses },
                    ResponseOutcome::Failed {
                        mech,
                        responses,
                        reason,
                    } => ResponseVote::Failed {
                        mech,
                        responses,
                        reason,
                    },
                };
                Ok(MechPayload::Response(vote))
            }
        }
    }

    async fn dialect(&self, synced: &SyncedState) -> MechInteractResult<crate::Dialect> {
        if let Some(dialect) = synced.dialect() {
            self.detector.remember(dialect);
            return Ok(dialect);
        }
        self.detector.detect().await.map_err(|err| {
            warn!(error = %err, "Dialect detection failed");
            err
        })
    }

    async fn information(&self, synced: &SyncedState) -> Option<InformationVote> {
        let snapshot = match self.registry.refresh(synced.mechs_info()).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(error = %err, "No mech list available");
                return None;
            }
        };
        let penalized = synced.penalized_mechs(synced.block_timestamp());
        let priority_mech = select_priority_mech(&self.config, &snapshot.mechs_info, &penalized);
        debug!(
            priority_mech = %priority_mech,
            source = ?snapshot.source,
            penalized = penalized.len(),
            "Selected priority mech"
        );
        Some(InformationVote {
            mechs_info: snapshot.mechs_info,
            priority_mech,
        })
    }

    async fn request(&self, synced: &SyncedState) -> MechInteractResult<RequestVote> {
        let dialect = self.dialect(synced).await?;
        let vote = match self.requests.prepare(dialect, synced).await? {
            RequestPlan::Skip => RequestVote::Skip,
            RequestPlan::BuySubscription {
                mech,
                balance,
                required,
            } => RequestVote::BuySubscription {
                mech,
                balance,
                required,
            },
            RequestPlan::Prepared(prepared) => RequestVote::Prepared {
                tx_hash: prepared.tx.to_hex(),
                price: prepared.price,
                mech: prepared.mech,
                requests: prepared.remaining,
                responses: prepared.responses,
            },
        };
        Ok(vote)
    }
}
