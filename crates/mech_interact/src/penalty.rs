//! Time-windowed mech penalization.
//!
//! A mech is penalized while `now < until`. Records are never swept; expiry is a
//! pure function of the time passed in, so two participants holding the same book
//! and the same timestamp always agree.

use mech_primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Penalty records keyed by mech.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PenaltyBook {
    until: BTreeMap<Address, u64>,
}

impl PenaltyBook {
    /// Creates an empty book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Penalizes `mech` until `now + window`, never shortening an existing penalty.
    pub fn penalize(&mut self, mech: Address, now: u64, window: Duration) -> u64 {
        let until = now.saturating_add(window.as_secs());
        let entry = self.until.entry(mech).or_insert(until);
        *entry = (*entry).max(until);
        *entry
    }

    /// Returns a copy with `mech` penalized.
    #[must_use]
    pub fn with_penalty(&self, mech: Address, now: u64, window: Duration) -> Self {
        let mut book = self.clone();
        book.penalize(mech, now, window);
        book
    }

    /// Whether `mech` is excluded at `now`.
    pub fn is_penalized(&self, mech: &Address, now: u64) -> bool {
        self.until.get(mech).map(|until| now < *until).unwrap_or(false)
    }

    /// Mechs excluded at `now`.
    pub fn penalized(&self, now: u64) -> BTreeSet<Address> {
        self.until
            .iter()
            .filter(|(_, until)| now < **until)
            .map(|(mech, _)| *mech)
            .collect()
    }

    /// Penalty expiry of `mech`, expired or not.
    pub fn until(&self, mech: &Address) -> Option<u64> {
        self.until.get(mech).copied()
    }

    /// Number of records, expired included.
    pub fn len(&self) -> usize {
        self.until.len()
    }

    /// Returns true when no mech was ever penalized.
    pub fn is_empty(&self) -> bool {
        self.until.is_empty()
    }
}
