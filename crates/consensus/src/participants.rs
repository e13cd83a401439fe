//! The set of participants voting in a round.

use mech_primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Participants, ordered by address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantSet {
    members: BTreeSet<Address>,
}

impl ParticipantSet {
    /// Creates a set from the given members.
    pub fn new(members: BTreeSet<Address>) -> Self {
        Self { members }
    }

    /// Returns the number of participants
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns true if no participant is registered
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Returns true if `address` is a participant
    pub fn contains(&self, address: &Address) -> bool {
        self.members.contains(address)
    }

    /// Iterates participants in address order.
    pub fn iter(&self) -> impl Iterator<Item = &Address> {
        self.members.iter()
    }
}

impl FromIterator<Address> for ParticipantSet {
    fn from_iter<I: IntoIterator<Item = Address>>(iter: I) -> Self {
        Self {
            members: iter.into_iter().collect(),
        }
    }
}
