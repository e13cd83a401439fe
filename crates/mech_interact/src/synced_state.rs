//! State replicated between participants.
//!
//! [`SyncedState`] is an immutable, versioned value. Rounds never touch it; the
//! state machine derives a [`SyncedStateUpdate`] from an agreed payload and
//! replaces the whole value with [`SyncedState::apply`].

use crate::dialect::Dialect;
use crate::penalty::PenaltyBook;
use crate::types::{MechInfo, MechInteractionResponse, MechMetadata};
use mech_primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Consensus-replicated state of one mech interaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncedState {
    version: u64,
    period: u64,
    block_timestamp: u64,
    dialect: Option<Dialect>,
    mechs_info: Vec<MechInfo>,
    priority_mech_address: Option<Address>,
    penalized_mechs: PenaltyBook,
    mech_requests: Vec<MechMetadata>,
    mech_responses: Vec<MechInteractionResponse>,
    mech_price: Option<u128>,
    tx_submitter: Option<String>,
    most_voted_tx_hash: Option<String>,
    final_tx_hash: Option<String>,
    last_called_mech: Option<Address>,
    last_error: Option<String>,
}

/// Fields replaced by one agreed outcome. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncedStateUpdate {
    /// Timestamp of the block the outcome was agreed in.
    pub block_timestamp: Option<u64>,
    /// Detected dialect.
    pub dialect: Option<Dialect>,
    /// Registry snapshot.
    pub mechs_info: Option<Vec<MechInfo>>,
    /// Selected priority mech.
    pub priority_mech_address: Option<Address>,
    /// Replacement penalty book.
    pub penalized_mechs: Option<PenaltyBook>,
    /// Requests still to send.
    pub mech_requests: Option<Vec<MechMetadata>>,
    /// Responses, pending or resolved.
    pub mech_responses: Option<Vec<MechInteractionResponse>>,
    /// Price of the prepared request.
    pub mech_price: Option<u128>,
    /// Round that handed a transaction to settlement.
    pub tx_submitter: Option<String>,
    /// Agreed transaction payload.
    pub most_voted_tx_hash: Option<String>,
    /// Settled transaction hash, written by the host.
    pub final_tx_hash: Option<String>,
    /// Mech the last request was sent to.
    pub last_called_mech: Option<Address>,
    /// Reason of the last failure.
    pub last_error: Option<String>,
}

impl SyncedStateUpdate {
    /// Update queueing requests, as written by the composing skill.
    pub fn with_requests(requests: Vec<MechMetadata>) -> Self {
        Self {
            mech_requests: Some(requests),
            ..Self::default()
        }
    }

    /// Update recording the settled transaction.
    pub fn with_final_tx_hash<S: Into<String>>(hash: S) -> Self {
        Self {
            final_tx_hash: Some(hash.into()),
            ..Self::default()
        }
    }

    /// Returns true when nothing would change.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl SyncedState {
    /// Creates the state of a fresh interaction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a new state with `update` applied and the version bumped.
    #[must_use]
    pub fn apply(&self, update: SyncedStateUpdate) -> Self {
        let mut next = self.clone();
        next.version += 1;

        if let Some(timestamp) = update.block_timestamp {
            next.block_timestamp = timestamp;
        }
        if let Some(dialect) = update.dialect {
            next.dialect = Some(dialect);
        }
        if let Some(mechs_info) = update.mechs_info {
            next.mechs_info = mechs_info;
        }
        if let Some(address) = update.priority_mech_address {
            next.priority_mech_address = Some(address);
        }
        if let Some(book) = update.penalized_mechs {
            next.penalized_mechs = book;
        }
        if let Some(requests) = update.mech_requests {
            next.mech_requests = requests;
        }
        if let Some(responses) = update.mech_responses {
            next.mech_responses = responses;
        }
        if let Some(price) = update.mech_price {
            next.mech_price = Some(price);
        }
        if let Some(submitter) = update.tx_submitter {
            next.tx_submitter = Some(submitter);
        }
        if let Some(hash) = update.most_voted_tx_hash {
            next.most_voted_tx_hash = Some(hash);
        }
        if let Some(hash) = update.final_tx_hash {
            next.final_tx_hash = Some(hash);
        }
        if let Some(mech) = update.last_called_mech {
            next.last_called_mech = Some(mech);
        }
        if let Some(error) = update.last_error {
            next.last_error = Some(error);
        }
        next
    }

    /// State for the next interaction cycle.
    ///
    /// Queued requests, responses, penalties, the last agreed mech list and the
    /// last block timestamp carry over; detection, selection and transaction
    /// fields start empty.
    #[must_use]
    pub fn next_period(&self) -> Self {
        Self {
            version: self.version + 1,
            period: self.period + 1,
            block_timestamp: self.block_timestamp,
            mechs_info: self.mechs_info.clone(),
            mech_requests: self.mech_requests.clone(),
            penalized_mechs: self.penalized_mechs.clone(),
            mech_responses: self.mech_responses.clone(),
            ..Self::default()
        }
    }

    /// Update penalizing the mech of the last request, if any.
    pub fn penalize_last_called_mech(&self, now: u64, window: Duration) -> Option<SyncedStateUpdate> {
        self.last_called_mech.map(|mech| SyncedStateUpdate {
            penalized_mechs: Some(self.penalized_mechs.with_penalty(mech, now, window)),
            ..SyncedStateUpdate::default()
        })
    }

    /// Number of updates applied.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Interaction cycle counter.
    pub fn period(&self) -> u64 {
        self.period
    }

    /// Timestamp of the block the last outcome was agreed in.
    ///
    /// Every participant sees the same value, so time-dependent choices such as
    /// penalty expiry are made against it rather than a local clock.
    pub fn block_timestamp(&self) -> u64 {
        self.block_timestamp
    }

    /// Agreed dialect, once detected.
    pub fn dialect(&self) -> Option<Dialect> {
        self.dialect
    }

    /// Whether the dialect was already agreed.
    pub fn versioning_check_performed(&self) -> bool {
        self.dialect.is_some()
    }

    /// Tri-state marketplace flag; `None` when detection has not run or there is no marketplace.
    pub fn is_marketplace_v2(&self) -> Option<bool> {
        self.dialect.and_then(Dialect::is_marketplace_v2)
    }

    /// All known mechs.
    pub fn mechs_info(&self) -> &[MechInfo] {
        &self.mechs_info
    }

    /// Mechs with at least one relevant tool.
    pub fn relevant_mechs_info(&self) -> Vec<&MechInfo> {
        self.mechs_info
            .iter()
            .filter(|info| !info.relevant_tools.is_empty())
            .collect()
    }

    /// Union of the relevant tools.
    pub fn mech_tools(&self) -> BTreeSet<String> {
        self.mechs_info
            .iter()
            .flat_map(|info| info.relevant_tools.iter().cloned())
            .collect()
    }

    /// Selected priority mech address.
    pub fn priority_mech_address(&self) -> Option<Address> {
        self.priority_mech_address
    }

    /// Registry entry of the priority mech.
    pub fn priority_mech(&self) -> Option<&MechInfo> {
        let address = self.priority_mech_address?;
        self.mechs_info.iter().find(|info| info.address == address)
    }

    /// Penalty records.
    pub fn penalty_book(&self) -> &PenaltyBook {
        &self.penalized_mechs
    }

    /// Mechs excluded from selection at `now`.
    pub fn penalized_mechs(&self, now: u64) -> BTreeSet<Address> {
        self.penalized_mechs.penalized(now)
    }

    /// Requests still to send.
    pub fn mech_requests(&self) -> &[MechMetadata] {
        &self.mech_requests
    }

    /// Responses of the current and earlier cycles.
    pub fn mech_responses(&self) -> &[MechInteractionResponse] {
        &self.mech_responses
    }

    /// Price of the prepared request.
    pub fn mech_price(&self) -> Option<u128> {
        self.mech_price
    }

    /// Round that submitted the last transaction.
    pub fn tx_submitter(&self) -> Option<&str> {
        self.tx_submitter.as_deref()
    }

    /// Agreed transaction payload.
    pub fn most_voted_tx_hash(&self) -> Option<&str> {
        self.most_voted_tx_hash.as_deref()
    }

    /// Settled transaction hash.
    pub fn final_tx_hash(&self) -> Option<&str> {
        self.final_tx_hash.as_deref()
    }

    /// Mech the last request went to.
    pub fn last_called_mech(&self) -> Option<Address> {
        self.last_called_mech
    }

    /// Reason of the last failure.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}
