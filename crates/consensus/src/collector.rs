//! Collects one payload per participant and reports the agreed value.
//!
//! Payloads are compared by the SHA-256 digest of their JSON form, so any
//! serializable value can be voted on without requiring `Eq` or `Hash`.

use crate::{quorum, ConsensusError, ConsensusResult, ParticipantSet, RoundId};
use mech_primitives::Address;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};

/// SHA-256 over the JSON encoding of a payload.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PayloadDigest([u8; 32]);

impl PayloadDigest {
    /// Computes the digest of `payload`.
    pub fn of<P: Serialize>(payload: &P) -> ConsensusResult<Self> {
        let encoded = serde_json::to_vec(payload)?;
        Ok(Self(Sha256::digest(&encoded).into()))
    }

    /// Returns the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for PayloadDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for PayloadDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PayloadDigest({})", hex::encode(&self.0[..8]))
    }
}

/// State of a round as seen by the collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundOutcome<P> {
    /// Agreement still possible, threshold not reached yet.
    Pending,
    /// At least `threshold` participants submitted this value.
    Agreed(P),
    /// No value can reach the threshold any more.
    NoMajority,
}

impl<P> RoundOutcome<P> {
    /// Returns true once the collector stopped waiting.
    pub fn is_decided(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// What happened to a submitted payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitStatus {
    /// First payload of this participant.
    Accepted,
    /// Overwrote the participant's earlier payload.
    Replaced,
    /// Round already agreed, payload dropped.
    Ignored,
}

/// Per-round payload collector.
#[derive(Debug, Clone)]
pub struct PayloadCollector<P> {
    round_id: RoundId,
    participants: ParticipantSet,
    threshold: usize,
    votes: BTreeMap<Address, PayloadDigest>,
    values: BTreeMap<PayloadDigest, P>,
    agreed: Option<P>,
}

impl<P: Clone + Serialize> PayloadCollector<P> {
    /// Creates a collector for `round_id`.
    ///
    /// `threshold` overrides the byzantine quorum when set.
    pub fn new(
        round_id: RoundId,
        participants: ParticipantSet,
        threshold: Option<usize>,
    ) -> ConsensusResult<Self> {
        let threshold = quorum::resolve_threshold(participants.len(), threshold)?;
        Ok(Self {
            round_id,
            participants,
            threshold,
            votes: BTreeMap::new(),
            values: BTreeMap::new(),
            agreed: None,
        })
    }

    /// Round this collector belongs to.
    pub fn round_id(&self) -> RoundId {
        self.round_id
    }

    /// Matching payloads required for agreement.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Registered participants.
    pub fn participants(&self) -> &ParticipantSet {
        &self.participants
    }

    /// Number of participants that submitted.
    pub fn submitted(&self) -> usize {
        self.votes.len()
    }

    /// Returns true once a value was agreed.
    pub fn is_sealed(&self) -> bool {
        self.agreed.is_some()
    }

    /// Payload currently recorded for `participant`.
    pub fn payload_of(&self, participant: &Address) -> Option<&P> {
        self.votes
            .get(participant)
            .and_then(|digest| self.values.get(digest))
    }

    /// Records `payload` for `participant`, checking it targets this round.
    pub fn submit_for_round(
        &mut self,
        round_id: RoundId,
        participant: Address,
        payload: P,
    ) -> ConsensusResult<SubmitStatus> {
        if round_id != self.round_id {
            return Err(ConsensusError::WrongRound {
                expected: self.round_id,
                got: round_id,
            });
        }
        self.submit(participant, payload)
    }

    /// Records `payload` for `participant`.
    ///
    /// A second submission from the same participant replaces the first.
    /// Submissions after agreement are ignored.
    pub fn submit(&mut self, participant: Address, payload: P) -> ConsensusResult<SubmitStatus> {
        if !self.participants.contains(&participant) {
            warn!(round = self.round_id, participant = %participant, "Payload from unknown participant");
            return Err(ConsensusError::UnknownParticipant(participant));
        }
        if self.agreed.is_some() {
            debug!(round = self.round_id, participant = %participant, "Round sealed, payload ignored");
            return Ok(SubmitStatus::Ignored);
        }

        let digest = PayloadDigest::of(&payload)?;
        self.values.entry(digest).or_insert_with(|| payload.clone());
        let status = match self.votes.insert(participant, digest) {
            Some(_) => SubmitStatus::Replaced,
            None => SubmitStatus::Accepted,
        };

        let count = self.votes.values().filter(|d| **d == digest).count();
        debug!(
            round = self.round_id,
            participant = %participant,
            digest = %digest,
            count,
            threshold = self.threshold,
            "Payload recorded"
        );

        if count >= self.threshold {
            info!(round = self.round_id, digest = %digest, count, "Round agreed");
            self.agreed = Some(payload);
        }
        Ok(status)
    }

    /// Current outcome.
    pub fn result(&self) -> RoundOutcome<P> {
        if let Some(value) = &self.agreed {
            return RoundOutcome::Agreed(value.clone());
        }

        let mut tallies: BTreeMap<PayloadDigest, usize> = BTreeMap::new();
        for digest in self.votes.values() {
            *tallies.entry(*digest).or_default() += 1;
        }
        let top = tallies.values().copied().max().unwrap_or(0);
        let remaining = self.participants.len() - self.votes.len();

        if top + remaining < self.threshold {
            RoundOutcome::NoMajority
        } else {
            RoundOutcome::Pending
        }
    }
}
