//! Async driver of the state machine.
//!
//! The service owns the state machine, the participant's behaviours and the
//! transport handle. It reacts to commands delivered by the host: payloads of
//! other participants, block notifications that trigger re-evaluation, and
//! round deadlines. Outcomes leave as [`MechInteractEvent`]s.
//!
//! Consensus decisions only ever see block timestamps. The local [`Clock`]
//! is read for nothing but the advisory deadline of each round attempt.

use crate::behaviours::MechInteractBehaviours;
use crate::clock::{Clock, SystemClock};
use crate::fsm::{MechInteractApp, Transition};
use crate::payloads::MechPayload;
use crate::rounds::{Round, TerminalState};
use crate::synced_state::{SyncedState, SyncedStateUpdate};
use crate::{MechInteractError, MechInteractResult};
use mech_config::MechInteractConfig;
use mech_consensus::{
    ConsensusError, ConsensusTransport, ParticipantSet, PayloadCollector, RoundId, RoundOutcome,
};
use mech_primitives::Address;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Commands delivered to the service
#[derive(Debug, Clone)]
pub enum ConsensusCommand {
    /// Start the state machine in an initial round
    Start { initial: Round },
    /// A participant's payload reached this node
    PayloadDelivered {
        round_id: RoundId,
        participant: Address,
        payload: MechPayload,
    },
    /// A block was delivered; re-evaluate the round
    BlockDelivered { round_id: RoundId, timestamp: u64 },
    /// The round deadline passed at the given block timestamp
    RoundTimeout { round_id: RoundId, timestamp: u64 },
    /// Start the next period of a finished machine in an initial round
    NextPeriod { initial: Round },
    /// Stop the service
    Stop,
}

/// Events emitted by the service
#[derive(Debug, Clone)]
pub enum MechInteractEvent {
    /// A round attempt started; the host should time it out after `deadline`
    RoundStarted {
        round: Round,
        round_id: RoundId,
        deadline: u64,
    },
    /// The local payload was handed to the transport
    PayloadSubmitted {
        round: Round,
        round_id: RoundId,
        payload: MechPayload,
    },
    /// A round attempt concluded
    RoundConcluded(Transition),
    /// A terminal state was reached
    Finished {
        terminal: TerminalState,
        state: SyncedState,
    },
}

/// Drives one participant through the mech interaction rounds.
pub struct MechInteractService<T> {
    config: Arc<MechInteractConfig>,
    participant: Address,
    participants: ParticipantSet,
    behaviours: MechInteractBehaviours,
    transport: T,
    synced: SyncedState,
    app: Option<MechInteractApp>,
    collector: Option<PayloadCollector<MechPayload>>,
    clock: Arc<dyn Clock>,
    event_tx: mpsc::Sender<MechInteractEvent>,
    running: bool,
}

impl<T: ConsensusTransport<MechPayload>> MechInteractService<T> {
    /// Creates a service for `participant`, starting from `synced`.
    pub fn new(
        config: Arc<MechInteractConfig>,
        participant: Address,
        participants: ParticipantSet,
        behaviours: MechInteractBehaviours,
        transport: T,
        synced: SyncedState,
        event_tx: mpsc::Sender<MechInteractEvent>,
    ) -> Self {
        if transport.participant_count() != participants.len() {
            warn!(
                transport = transport.participant_count(),
                configured = participants.len(),
                "Participant count differs from the transport"
            );
        }
        Self {
            config,
            participant,
            participants,
            behaviours,
            transport,
            synced,
            app: None,
            collector: None,
            clock: Arc::new(SystemClock),
            event_tx,
            running: false,
        }
    }

    /// Replaces the time source of round deadlines.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Whether a round is in progress.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// State machine, once started.
    pub fn app(&self) -> Option<&MechInteractApp> {
        self.app.as_ref()
    }

    /// Shared state as last agreed.
    pub fn synced(&self) -> &SyncedState {
        self.app
            .as_ref()
            .map(MechInteractApp::synced)
            .unwrap_or(&self.synced)
    }

    /// Applies a host-written update, such as the settled transaction hash.
    pub fn apply_external(&mut self, update: SyncedStateUpdate) {
        match self.app.as_mut() {
            Some(app) => app.apply_external(update),
            None => self.synced = self.synced.apply(update),
        }
    }

    /// Handles commands until `Stop` or the channel closes.
    pub async fn run(mut self, mut commands: mpsc::Receiver<ConsensusCommand>) -> Self {
        while let Some(command) = commands.recv().await {
            if matches!(command, ConsensusCommand::Stop) {
                info!("Mech interaction service stopping");
                break;
            }
            if let Err(err) = self.handle(command).await {
                error!(error = %err, "Command failed");
            }
        }
        self.running = false;
        self
    }

    /// Handles one command.
    pub async fn handle(&mut self, command: ConsensusCommand) -> MechInteractResult<()> {
        match command {
            ConsensusCommand::Start { initial } => self.start(initial).await,
            ConsensusCommand::PayloadDelivered {
                round_id,
                participant,
                payload,
            } => {
                self.on_payload(round_id, participant, payload);
                Ok(())
            }
            ConsensusCommand::BlockDelivered {
                round_id,
                timestamp,
            } => self.on_block(round_id, timestamp).await,
            ConsensusCommand::RoundTimeout {
                round_id,
                timestamp,
            } => self.on_timeout(round_id, timestamp).await,
            ConsensusCommand::NextPeriod { initial } => self.start_next_period(initial).await,
            ConsensusCommand::Stop => {
                self.running = false;
                Ok(())
            }
        }
    }

    /// Starts the state machine in `initial`.
    pub async fn start(&mut self, initial: Round) -> MechInteractResult<()> {
        let synced = self.synced().clone();
        self.app = Some(MechInteractApp::new(self.config.clone(), initial, synced)?);
        self.running = true;
        self.begin_round().await
    }

    /// Moves a finished machine to its next period and starts it in `initial`.
    ///
    /// Without a previous run this is the same as [`Self::start`].
    pub async fn start_next_period(&mut self, initial: Round) -> MechInteractResult<()> {
        let next = match self.app.as_ref() {
            Some(app) => app.next_period(initial)?,
            None => MechInteractApp::new(self.config.clone(), initial, self.synced.clone())?,
        };
        info!(period = next.synced().period(), round = %initial, "Next period started");
        self.synced = next.synced().clone();
        self.app = Some(next);
        self.running = true;
        self.begin_round().await
    }

    fn is_current(&self, round_id: RoundId) -> bool {
        self.running
            && self
                .collector
                .as_ref()
                .map(|c| c.round_id() == round_id)
                .unwrap_or(false)
    }

    fn on_payload(&mut self, round_id: RoundId, participant: Address, payload: MechPayload) {
        let Some(collector) = self.collector.as_mut() else {
            debug!(round_id, "No round in progress, payload dropped");
            return;
        };
        match collector.submit_for_round(round_id, participant, payload) {
            Ok(status) => debug!(round_id, participant = %participant, ?status, "Payload delivered"),
            Err(ConsensusError::WrongRound { expected, got }) => {
                debug!(expected, got, "Payload for another round dropped");
            }
            Err(err) => warn!(round_id, participant = %participant, error = %err, "Payload rejected"),
        }
    }

    async fn on_block(&mut self, round_id: RoundId, timestamp: u64) -> MechInteractResult<()> {
        if !self.is_current(round_id) {
            return Ok(());
        }
        let outcome = match self.collector.as_ref() {
            Some(collector) => collector.result(),
            None => return Ok(()),
        };
        let app = self.app_mut()?;

        let transition = match outcome {
            RoundOutcome::Pending => return Ok(()),
            RoundOutcome::Agreed(payload) => app.process_agreed(payload, timestamp)?,
            RoundOutcome::NoMajority => app.process_no_majority(timestamp)?,
        };
        self.conclude(transition).await
    }

    async fn on_timeout(&mut self, round_id: RoundId, timestamp: u64) -> MechInteractResult<()> {
        if !self.is_current(round_id) {
            return Ok(());
        }
        let transition = self.app_mut()?.process_timeout(timestamp)?;
        self.conclude(transition).await
    }

    fn app_mut(&mut self) -> MechInteractResult<&mut MechInteractApp> {
        self.app
            .as_mut()
            .ok_or_else(|| MechInteractError::MissingData("started state machine".to_string()))
    }

    async fn conclude(&mut self, transition: Transition) -> MechInteractResult<()> {
        self.collector = None;
        self.send_event(MechInteractEvent::RoundConcluded(transition))?;

        let finished = self
            .app
            .as_ref()
            .and_then(|app| app.terminal().map(|terminal| (terminal, app.synced().clone())));

        match finished {
            Some((terminal, state)) => {
                info!(terminal = %terminal, "Mech interaction finished");
                self.running = false;
                self.synced = state.clone();
                self.send_event(MechInteractEvent::Finished { terminal, state })
            }
            None => self.begin_round().await,
        }
    }

    async fn begin_round(&mut self) -> MechInteractResult<()> {
        let (round, round_id, synced) = {
            let app = self.app_mut()?;
            let round = app
                .current_round()
                .ok_or_else(|| MechInteractError::Finished(app.state().name().to_string()))?;
            (round, app.round_id(), app.synced().clone())
        };

        self.collector = Some(PayloadCollector::new(
            round_id,
            self.participants.clone(),
            self.config.consensus_threshold,
        )?);
        let deadline = self.clock.now() + self.config.round_timeout;
        self.send_event(MechInteractEvent::RoundStarted {
            round,
            round_id,
            deadline,
        })?;

        let payload = match self.behaviours.local_payload(round, &synced).await {
            Ok(payload) => payload,
            Err(err) => {
                warn!(round = %round, round_id, error = %err, "No payload, abstaining");
                return Ok(());
            }
        };

        self.transport
            .submit_payload(round_id, self.participant, payload.clone())
            .await?;
        self.send_event(MechInteractEvent::PayloadSubmitted {
            round,
            round_id,
            payload,
        })
    }

    fn send_event(&self, event: MechInteractEvent) -> MechInteractResult<()> {
        self.event_tx
            .try_send(event)
            .map_err(|_| MechInteractError::ChannelClosed)
    }
}
