//! Interface to the layer that disseminates payloads between participants.

use crate::{ConsensusResult, RoundId};
use async_trait::async_trait;
use mech_primitives::Address;
use parking_lot::Mutex;
use std::sync::Arc;

/// Transport consumed by the round driver.
///
/// Delivery of other participants' payloads flows back to the driver as
/// commands; this trait only covers the outbound direction.
#[async_trait]
pub trait ConsensusTransport<P>: Send + Sync
where
    P: Send + 'static,
{
    /// Broadcasts the local payload for `round_id`.
    async fn submit_payload(
        &self,
        round_id: RoundId,
        participant: Address,
        payload: P,
    ) -> ConsensusResult<()>;

    /// Number of participants currently registered.
    fn participant_count(&self) -> usize;
}

/// A payload handed to [`RecordingTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedPayload<P> {
    /// Round the payload targets.
    pub round_id: RoundId,
    /// Submitting participant.
    pub participant: Address,
    /// The payload.
    pub payload: P,
}

/// In-process transport that keeps every submission.
///
/// Useful for single-process deployments and for driving the service in tests.
#[derive(Debug)]
pub struct RecordingTransport<P> {
    participants: usize,
    submitted: Arc<Mutex<Vec<SubmittedPayload<P>>>>,
}

impl<P> Clone for RecordingTransport<P> {
    fn clone(&self) -> Self {
        Self {
            participants: self.participants,
            submitted: Arc::clone(&self.submitted),
        }
    }
}

impl<P: Clone> RecordingTransport<P> {
    /// Creates a transport reporting `participants` participants.
    pub fn new(participants: usize) -> Self {
        Self {
            participants,
            submitted: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every payload submitted so far.
    pub fn submitted(&self) -> Vec<SubmittedPayload<P>> {
        self.submitted.lock().clone()
    }

    /// Removes and returns the submitted payloads.
    pub fn drain(&self) -> Vec<SubmittedPayload<P>> {
        std::mem::take(&mut *self.submitted.lock())
    }
}

#[async_trait]
impl<P> ConsensusTransport<P> for RecordingTransport<P>
where
    P: Clone + Send + Sync + 'static,
{
    async fn submit_payload(
        &self,
        round_id: RoundId,
        participant: Address,
        payload: P,
    ) -> ConsensusResult<()> {
        self.submitted.lock().push(SubmittedPayload {
            round_id,
            participant,
            payload,
        });
        Ok(())
    }

    fn participant_count(&self) -> usize {
        self.participants
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_transport_keeps_submissions() {
        let transport = RecordingTransport::new(4);
        let shared = transport.clone();
        transport
            .submit_payload(3, Address::ZERO, "payload".to_string())
            .await
            .unwrap();

        assert_eq!(shared.participant_count(), 4);
        let submitted = shared.drain();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].round_id, 3);
        assert!(transport.submitted().is_empty());
    }
}
