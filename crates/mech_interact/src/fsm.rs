//! The round-transition state machine.
//!
//! [`MechInteractApp`] is the single writer of [`SyncedState`]. It only ever
//! sees agreed outcomes: an agreed payload, a split vote or a round deadline.
//! Each outcome is reduced to a [`SyncedStateUpdate`] and an [`Event`]; the
//! event is looked up in the transition table and the update is applied as a
//! whole.

use crate::dialect::Dialect;
use crate::payloads::{InformationVote, MechPayload, RequestVote, ResponseVote};
use crate::rounds::{AppState, Event, Round, TerminalState};
use crate::synced_state::{SyncedState, SyncedStateUpdate};
use crate::{MechInteractError, MechInteractResult};
use mech_config::MechInteractConfig;
use mech_consensus::RoundId;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One step of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Round that concluded.
    pub from: Round,
    /// Outcome.
    pub event: Event,
    /// State entered.
    pub to: AppState,
    /// Aggregation round that concluded.
    pub round_id: RoundId,
}

/// Round-transition state machine of one participant.
#[derive(Debug, Clone)]
pub struct MechInteractApp {
    config: Arc<MechInteractConfig>,
    state: AppState,
    synced: SyncedState,
    attempts: u32,
    round_id: RoundId,
}

impl MechInteractApp {
    /// Starts the machine in `initial` with `synced` as the shared state.
    pub fn new(
        config: Arc<MechInteractConfig>,
        initial: Round,
        synced: SyncedState,
    ) -> MechInteractResult<Self> {
        if !initial.is_initial() {
            return Err(MechInteractError::InvalidInitialState(
                initial.name().to_string(),
            ));
        }
        info!(round = %initial, period = synced.period(), "Mech interaction started");
        Ok(Self {
            config,
            state: AppState::Round(initial),
            synced,
            attempts: 0,
            round_id: 0,
        })
    }

    /// Current state.
    pub fn state(&self) -> AppState {
        self.state
    }

    /// Round collecting payloads, `None` once finished.
    pub fn current_round(&self) -> Option<Round> {
        match self.state {
            AppState::Round(round) => Some(round),
            AppState::Terminal(_) => None,
        }
    }

    /// Terminal state, once reached.
    pub fn terminal(&self) -> Option<TerminalState> {
        match self.state {
            AppState::Terminal(terminal) => Some(terminal),
            AppState::Round(_) => None,
        }
    }

    /// Whether a terminal state was reached.
    pub fn is_finished(&self) -> bool {
        self.terminal().is_some()
    }

    /// Shared state.
    pub fn synced(&self) -> &SyncedState {
        &self.synced
    }

    /// Identifier of the aggregation round in progress.
    pub fn round_id(&self) -> RoundId {
        self.round_id
    }

    /// Failed attempts of the current round.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Applies an update from outside the rounds, e.g. the settled transaction hash.
    pub fn apply_external(&mut self, update: SyncedStateUpdate) {
        self.synced = self.synced.apply(update);
    }

    fn round(&self) -> MechInteractResult<Round> {
        self.current_round()
            .ok_or_else(|| MechInteractError::Finished(self.state.name().to_string()))
    }

    /// Handles an agreed payload observed at `block_timestamp`.
    pub fn process_agreed(
        &mut self,
        payload: MechPayload,
        block_timestamp: u64,
    ) -> MechInteractResult<Transition> {
        let round = self.round()?;
        if payload.round() != round {
            return Err(MechInteractError::UnexpectedPayload {
                round: round.name().to_string(),
                payload: payload.round().name().to_string(),
            });
        }
        let (update, event) = self.reduce(round, payload, block_timestamp);
        self.advance(round, event, update, block_timestamp)
    }

    /// Handles a round whose payloads split without a majority, observed at `block_timestamp`.
    pub fn process_no_majority(&mut self, block_timestamp: u64) -> MechInteractResult<Transition> {
        let round = self.round()?;
        self.advance(
            round,
            Event::NoMajority,
            SyncedStateUpdate::default(),
            block_timestamp,
        )
    }

    /// Handles a round that passed its deadline at `block_timestamp`.
    pub fn process_timeout(&mut self, block_timestamp: u64) -> MechInteractResult<Transition> {
        let round = self.round()?;
        self.advance(
            round,
            Event::RoundTimeout,
            SyncedStateUpdate::default(),
            block_timestamp,
        )
    }

    /// Machine for the next interaction cycle, starting in `initial`.
    ///
    /// Only a finished machine can move on; the shared state goes through
    /// [`SyncedState::next_period`].
    pub fn next_period(&self, initial: Round) -> MechInteractResult<Self> {
        if let AppState::Round(round) = self.state {
            return Err(MechInteractError::RoundInProgress(round.name().to_string()));
        }
        Self::new(self.config.clone(), initial, self.synced.next_period())
    }

    fn reduce(
        &self,
        round: Round,
        payload: MechPayload,
        now: u64,
    ) -> (SyncedStateUpdate, Event) {
        let mut update = SyncedStateUpdate::default();

        let event = match payload {
            MechPayload::VersionDetection(Some(dialect)) => {
                update.dialect = Some(dialect);
                match dialect {
                    Dialect::MarketplaceV2 => Event::V2,
                    Dialect::LegacyMarketplace => Event::V1,
                    Dialect::LegacyDirect => Event::NoMarketplace,
                }
            }
            MechPayload::VersionDetection(None) => {
                update.last_error = Some(
                    MechInteractError::detection("no dialect check gave an answer").to_string(),
                );
                Event::DetectionFailed
            }

            MechPayload::Information(Some(InformationVote {
                mechs_info,
                priority_mech,
            })) => {
                update.mechs_info = Some(mechs_info);
                update.priority_mech_address = Some(priority_mech);
                Event::Done
            }
            MechPayload::Information(None) => {
                update.last_error = Some(
                    MechInteractError::registry_unavailable("no mech list available").to_string(),
                );
                Event::None
            }

            MechPayload::Request(RequestVote::Skip) => Event::SkipRequest,
            MechPayload::Request(RequestVote::BuySubscription {
                mech,
                balance,
                required,
            }) => {
                update.last_error = Some(
                    MechInteractError::SubscriptionRequired {
                        mech,
                        balance,
                        required,
                    }
                    .to_string(),
                );
                Event::BuySubscription
            }
            MechPayload::Request(RequestVote::Prepared {
                tx_hash,
                price,
                mech,
                requests,
                responses,
            }) => {
                update.tx_submitter = Some(round.name().to_string());
                update.most_voted_tx_hash = Some(tx_hash);
                update.mech_price = Some(price);
                update.mech_requests = Some(requests);
                update.mech_responses = Some(responses);
                update.last_called_mech = Some(mech);
                Event::Done
            }

            MechPayload::PurchaseSubscription(Some(tx_hash)) => {
                update.tx_submitter = Some(round.name().to_string());
                update.most_voted_tx_hash = Some(tx_hash);
                Event::Done
            }
            MechPayload::PurchaseSubscription(None) => Event::None,

            MechPayload::Response(ResponseVote::Delivered { responses }) => {
                update.mech_responses = Some(responses);
                Event::Done
            }
            MechPayload::Response(ResponseVote::Failed {
                mech,
                responses,
                reason,
            }) => {
                let window = self.config.penalize_mech_time_window();
                let book = self.synced.penalty_book().with_penalty(mech, now, window);
                warn!(
                    mech = %mech,
                    until = book.until(&mech).unwrap_or(now),
                    reason = %reason,
                    "Penalizing mech"
                );
                update.penalized_mechs = Some(book);
                update.mech_responses = Some(responses);
                update.last_error = Some(MechInteractError::ResponseInvalid { mech, reason }.to_string());
                Event::Reselect
            }
        };

        (update, event)
    }

    fn advance(
        &mut self,
        round: Round,
        event: Event,
        mut update: SyncedStateUpdate,
        block_timestamp: u64,
    ) -> MechInteractResult<Transition> {
        let round_id = self.round_id;
        update.block_timestamp = Some(block_timestamp);
        let mut next = round.transition(event).ok_or_else(|| {
            MechInteractError::unexpected(format!("event of {round}"), event)
        })?;

        if next == AppState::Round(round) {
            self.attempts += 1;
            if self.attempts >= self.config.max_round_attempts {
                let error = MechInteractError::AgreementTimeout {
                    round: round.name().to_string(),
                    attempts: self.attempts,
                };
                warn!(round = %round, attempts = self.attempts, "Round out of attempts");
                update.last_error = Some(error.to_string());
                next = AppState::Terminal(round.degraded_terminal());
            } else {
                debug!(round = %round, event = %event, attempt = self.attempts, "Retrying round");
            }
        }

        if next != AppState::Round(round) {
            self.attempts = 0;
        }

        if next == AppState::Terminal(TerminalState::FinishedMechResponseTimeout) {
            self.penalize_unresponsive(&mut update, block_timestamp);
        }

        self.synced = self.synced.apply(update);
        self.state = next;
        self.round_id += 1;

        info!(round = %round, event = %event, next = %next, round_id, "Round concluded");

        Ok(Transition {
            from: round,
            event,
            to: next,
            round_id,
        })
    }

    /// Penalizes the mech whose responses never arrived.
    fn penalize_unresponsive(&self, update: &mut SyncedStateUpdate, now: u64) {
        let window = self.config.penalize_mech_time_window();
        let Some(penalty) = self.synced.penalize_last_called_mech(now, window) else {
            return;
        };
        if let Some(mech) = self.synced.last_called_mech() {
            warn!(mech = %mech, "Mech did not respond in time, penalizing");
            update.last_error.get_or_insert_with(|| {
                MechInteractError::ResponseInvalid {
                    mech,
                    reason: "no response before the round deadline".to_string(),
                }
                .to_string()
            });
        }
        update.penalized_mechs = penalty.penalized_mechs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mech_primitives::Address;

    fn config() -> Arc<MechInteractConfig> {
        Arc::new(MechInteractConfig::new(
            Address::new([1u8; 20]),
            Address::new([2u8; 20]),
            Address::new([3u8; 20]),
        ))
    }

    fn app(initial: Round) -> MechInteractApp {
        MechInteractApp::new(config(), initial, SyncedState::new()).unwrap()
    }

    #[test]
    fn rejects_non_initial_round() {
        let result = MechInteractApp::new(config(), Round::MechInformation, SyncedState::new());
        assert!(matches!(
            result,
            Err(MechInteractError::InvalidInitialState(_))
        ));
    }

    #[test]
    fn legacy_detection_finishes() {
        let mut app = app(Round::MechVersionDetection);
        let transition = app
            .process_agreed(MechPayload::VersionDetection(Some(Dialect::LegacyDirect)), 0)
            .unwrap();
        assert_eq!(transition.event, Event::NoMarketplace);
        assert_eq!(app.terminal(), Some(TerminalState::FinishedMechLegacyDetected));
        assert_eq!(app.synced().dialect(), Some(Dialect::LegacyDirect));
        assert_eq!(app.synced().is_marketplace_v2(), None);
    }

    #[test]
    fn payload_of_another_round_is_rejected() {
        let mut app = app(Round::MechRequest);
        let err = app
            .process_agreed(MechPayload::VersionDetection(None), 0)
            .unwrap_err();
        assert!(matches!(err, MechInteractError::UnexpectedPayload { .. }));
        assert_eq!(app.current_round(), Some(Round::MechRequest));
        assert_eq!(app.synced().version(), 0);
    }

    #[test]
    fn no_majority_degrades_after_attempt_cap() {
        let mut app = app(Round::MechRequest);
        app.process_no_majority(10).unwrap();
        app.process_timeout(20).unwrap();
        assert_eq!(app.attempts(), 2);
        assert_eq!(app.current_round(), Some(Round::MechRequest));

        let last = app.process_no_majority(30).unwrap();
        assert_eq!(last.to, AppState::Terminal(TerminalState::FailedMechRequest));
        assert!(app
            .synced()
            .last_error()
            .unwrap()
            .contains("did not reach agreement after 3 attempts"));
        assert!(matches!(
            app.process_timeout(40),
            Err(MechInteractError::Finished(_))
        ));
    }

    #[test]
    fn skip_request() {
        let mut app = app(Round::MechRequest);
        app.process_agreed(MechPayload::Request(RequestVote::Skip), 0)
            .unwrap();
        assert_eq!(app.terminal(), Some(TerminalState::FinishedMechRequestSkip));
        assert_eq!(app.round_id(), 1);
    }

    #[test]
    fn response_timeout_is_terminal_immediately() {
        let mut app = app(Round::MechResponse);
        let transition = app.process_timeout(0).unwrap();
        assert_eq!(
            transition.to,
            AppState::Terminal(TerminalState::FinishedMechResponseTimeout)
        );
    }

    #[test]
    fn outcomes_record_block_timestamp() {
        let mut app = app(Round::MechRequest);
        app.process_no_majority(1_234).unwrap();
        assert_eq!(app.synced().block_timestamp(), 1_234);
        app.process_agreed(MechPayload::Request(RequestVote::Skip), 1_300)
            .unwrap();
        assert_eq!(app.synced().block_timestamp(), 1_300);
    }

    #[test]
    fn response_timeout_penalizes_last_called_mech() {
        let mech = Address::new([9u8; 20]);
        let synced = SyncedState::new().apply(SyncedStateUpdate {
            last_called_mech: Some(mech),
            ..SyncedStateUpdate::default()
        });
        let mut app = MechInteractApp::new(config(), Round::MechResponse, synced).unwrap();

        app.process_timeout(5_000).unwrap();

        let window = config().penalize_mech_time_window;
        assert_eq!(app.synced().penalty_book().until(&mech), Some(5_000 + window));
        assert!(app.synced().penalized_mechs(5_000).contains(&mech));
        assert!(app
            .synced()
            .last_error()
            .unwrap()
            .contains("no response before the round deadline"));
    }

    #[test]
    fn response_timeout_without_request_penalizes_nobody() {
        let mut app = app(Round::MechResponse);
        app.process_timeout(5_000).unwrap();
        assert!(app.synced().penalty_book().is_empty());
    }

    #[test]
    fn next_period_requires_a_finished_machine() {
        let mut app = app(Round::MechRequest);
        assert!(matches!(
            app.next_period(Round::MechVersionDetection),
            Err(MechInteractError::RoundInProgress(_))
        ));

        app.process_agreed(MechPayload::Request(RequestVote::Skip), 0)
            .unwrap();
        let next = app.next_period(Round::MechVersionDetection).unwrap();
        assert_eq!(next.current_round(), Some(Round::MechVersionDetection));
        assert_eq!(next.synced().period(), 1);
        assert_eq!(next.round_id(), 0);
    }
}
