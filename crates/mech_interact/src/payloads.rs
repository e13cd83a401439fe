//! Payloads voted on in each round.
//!
//! A payload is a participant's proposal for the outcome of the current round.
//! Honest participants computing from the same inputs produce identical
//! payloads; the collector compares them by digest.

use crate::dialect::Dialect;
use crate::rounds::Round;
use crate::types::{MechInfo, MechInteractionResponse, MechMetadata};
use mech_primitives::Address;
use serde::{Deserialize, Serialize};

/// Outcome of the information round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InformationVote {
    /// Mech list, fresh or cached.
    pub mechs_info: Vec<MechInfo>,
    /// Mech selected for the next request.
    pub priority_mech: Address,
}

/// Outcome of the request round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestVote {
    /// Nothing to send.
    Skip,
    /// A subscription has to be bought first.
    BuySubscription {
        /// Mech charging the subscription.
        mech: Address,
        /// Subscription balance read.
        balance: u128,
        /// Delivery rate of the mech.
        required: u128,
    },
    /// Request transaction.
    Prepared {
        /// Settlement payload of the multisend.
        tx_hash: String,
        /// Price per request.
        price: u128,
        /// Mech called.
        mech: Address,
        /// Requests left for the next cycle.
        requests: Vec<MechMetadata>,
        /// Responses including the new pending ones.
        responses: Vec<MechInteractionResponse>,
    },
}

/// Outcome of the response round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseVote {
    /// All responses accepted.
    Delivered {
        /// Updated responses.
        responses: Vec<MechInteractionResponse>,
    },
    /// The mech failed to deliver a valid response.
    Failed {
        /// Mech to penalize.
        mech: Address,
        /// Updated responses.
        responses: Vec<MechInteractionResponse>,
        /// Why the mech failed.
        reason: String,
    },
}

/// Payload of any round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MechPayload {
    /// Detected dialect; `None` when detection failed.
    VersionDetection(Option<Dialect>),
    /// Mech list and selection; `None` when no list is available.
    Information(Option<InformationVote>),
    /// Request decision.
    Request(RequestVote),
    /// Purchase transaction; `None` when it could not be built.
    PurchaseSubscription(Option<String>),
    /// Response decision.
    Response(ResponseVote),
}

impl MechPayload {
    /// Round the payload belongs to.
    pub fn round(&self) -> Round {
        match self {
            Self::VersionDetection(_) => Round::MechVersionDetection,
            Self::Information(_) => Round::MechInformation,
            Self::Request(_) => Round::MechRequest,
            Self::PurchaseSubscription(_) => Round::MechPurchaseSubscription,
            Self::Response(_) => Round::MechResponse,
        }
    }
}
