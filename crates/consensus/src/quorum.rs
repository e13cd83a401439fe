//! Quorum arithmetic.

use crate::{ConsensusError, ConsensusResult};

/// Number of faulty participants tolerated: f = (n-1)/3
#[inline]
#[must_use]
pub const fn max_faulty(n: usize) -> usize {
    if n == 0 {
        0
    } else {
        (n - 1) / 3
    }
}

/// Number of identical payloads required for agreement: m = n - f
#[inline]
#[must_use]
pub const fn byzantine_threshold(n: usize) -> usize {
    n - max_faulty(n)
}

/// Resolves the threshold for `n` participants, validating a configured override.
///
/// The override must be a strict majority and cannot exceed `n`.
pub fn resolve_threshold(n: usize, configured: Option<usize>) -> ConsensusResult<usize> {
    if n == 0 {
        return Err(ConsensusError::EmptyParticipantSet);
    }
    match configured {
        None => Ok(byzantine_threshold(n)),
        Some(threshold) if threshold * 2 > n && threshold <= n => Ok(threshold),
        Some(threshold) => Err(ConsensusError::InvalidThreshold {
            threshold,
            participants: n,
        }),
    }
}
