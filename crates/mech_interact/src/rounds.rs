//! Rounds, terminal states and the transition table.
//!
//! ```text
//! MechVersionDetectionRound --V2--> MechInformationRound --Done--> FinishedMechInformationRound
//!     |--V1--> FinishedMarketplaceLegacyDetectedRound
//!     |--NoMarketplace--> FinishedMechLegacyDetectedRound
//!     `--DetectionFailed--> FailedMechInformationRound
//!
//! MechRequestRound --Done--> FinishedMechRequestRound
//!     |--SkipRequest--> FinishedMechRequestSkipRound
//!     `--BuySubscription--> MechPurchaseSubscriptionRound --Done--> FinishedMechPurchaseSubscriptionRound
//!
//! MechResponseRound --Done--> FinishedMechResponseRound
//!     |--Reselect--> MechInformationRound
//!     `--RoundTimeout--> FinishedMechResponseTimeoutRound
//! ```
//!
//! `NoMajority` and `RoundTimeout` loop a round onto itself unless listed
//! otherwise. The state machine bounds those loops.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A round that collects payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Round {
    /// Detects the contract dialect.
    MechVersionDetection,
    /// Refreshes the mech list and selects the priority mech.
    MechInformation,
    /// Builds the request transaction.
    MechRequest,
    /// Builds the subscription purchase transaction.
    MechPurchaseSubscription,
    /// Collects the responses.
    MechResponse,
}

impl Round {
    /// Every round.
    pub const ALL: [Round; 5] = [
        Round::MechVersionDetection,
        Round::MechInformation,
        Round::MechRequest,
        Round::MechPurchaseSubscription,
        Round::MechResponse,
    ];

    /// Round name as seen by composing systems.
    pub fn name(self) -> &'static str {
        match self {
            Self::MechVersionDetection => "MechVersionDetectionRound",
            Self::MechInformation => "MechInformationRound",
            Self::MechRequest => "MechRequestRound",
            Self::MechPurchaseSubscription => "MechPurchaseSubscriptionRound",
            Self::MechResponse => "MechResponseRound",
        }
    }

    /// Whether the state machine may start in this round.
    pub fn is_initial(self) -> bool {
        matches!(
            self,
            Self::MechVersionDetection | Self::MechRequest | Self::MechResponse
        )
    }

    /// Terminal state reached when the round runs out of attempts.
    pub fn degraded_terminal(self) -> TerminalState {
        match self {
            Self::MechVersionDetection | Self::MechInformation => {
                TerminalState::FailedMechInformation
            }
            Self::MechRequest | Self::MechPurchaseSubscription => TerminalState::FailedMechRequest,
            Self::MechResponse => TerminalState::FinishedMechResponseTimeout,
        }
    }

    /// Next state after `event`, `None` when the round does not handle it.
    pub fn transition(self, event: Event) -> Option<AppState> {
        use AppState::{Round as R, Terminal as T};

        let next = match (self, event) {
            (Self::MechVersionDetection, Event::V2) => R(Self::MechInformation),
            (Self::MechVersionDetection, Event::V1) => {
                T(TerminalState::FinishedMarketplaceLegacyDetected)
            }
            (Self::MechVersionDetection, Event::NoMarketplace) => {
                T(TerminalState::FinishedMechLegacyDetected)
            }
            (Self::MechVersionDetection, Event::DetectionFailed) => {
                T(TerminalState::FailedMechInformation)
            }

            (Self::MechInformation, Event::Done) => T(TerminalState::FinishedMechInformation),
            (Self::MechInformation, Event::None) => T(TerminalState::FailedMechInformation),

            (Self::MechRequest, Event::Done) => T(TerminalState::FinishedMechRequest),
            (Self::MechRequest, Event::SkipRequest) => T(TerminalState::FinishedMechRequestSkip),
            (Self::MechRequest, Event::BuySubscription) => R(Self::MechPurchaseSubscription),

            (Self::MechPurchaseSubscription, Event::Done) => {
                T(TerminalState::FinishedMechPurchaseSubscription)
            }
            (Self::MechPurchaseSubscription, Event::None) => R(self),

            (Self::MechResponse, Event::Done) => T(TerminalState::FinishedMechResponse),
            (Self::MechResponse, Event::Reselect) => R(Self::MechInformation),
            (Self::MechResponse, Event::RoundTimeout) => {
                T(TerminalState::FinishedMechResponseTimeout)
            }

            (_, Event::NoMajority | Event::RoundTimeout) => R(self),
            _ => return None,
        };
        Some(next)
    }
}

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Exit of the state machine; composing systems route on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TerminalState {
    /// Mech list refreshed, priority mech selected.
    FinishedMechInformation,
    /// No mech list could be obtained, or detection failed.
    FailedMechInformation,
    /// Deployment uses the first marketplace.
    FinishedMarketplaceLegacyDetected,
    /// Deployment has no marketplace.
    FinishedMechLegacyDetected,
    /// Request transaction agreed.
    FinishedMechRequest,
    /// Nothing to request.
    FinishedMechRequestSkip,
    /// Subscription purchase transaction agreed.
    FinishedMechPurchaseSubscription,
    /// Responses accepted.
    FinishedMechResponse,
    /// Responses did not arrive in time.
    FinishedMechResponseTimeout,
    /// Request or purchase could not be agreed.
    FailedMechRequest,
}

impl TerminalState {
    /// Every terminal state.
    pub const ALL: [TerminalState; 10] = [
        TerminalState::FinishedMechInformation,
        TerminalState::FailedMechInformation,
        TerminalState::FinishedMarketplaceLegacyDetected,
        TerminalState::FinishedMechLegacyDetected,
        TerminalState::FinishedMechRequest,
        TerminalState::FinishedMechRequestSkip,
        TerminalState::FinishedMechPurchaseSubscription,
        TerminalState::FinishedMechResponse,
        TerminalState::FinishedMechResponseTimeout,
        TerminalState::FailedMechRequest,
    ];

    /// State name as seen by composing systems.
    pub fn name(self) -> &'static str {
        match self {
            Self::FinishedMechInformation => "FinishedMechInformationRound",
            Self::FailedMechInformation => "FailedMechInformationRound",
            Self::FinishedMarketplaceLegacyDetected => "FinishedMarketplaceLegacyDetectedRound",
            Self::FinishedMechLegacyDetected => "FinishedMechLegacyDetectedRound",
            Self::FinishedMechRequest => "FinishedMechRequestRound",
            Self::FinishedMechRequestSkip => "FinishedMechRequestSkipRound",
            Self::FinishedMechPurchaseSubscription => "FinishedMechPurchaseSubscriptionRound",
            Self::FinishedMechResponse => "FinishedMechResponseRound",
            Self::FinishedMechResponseTimeout => "FinishedMechResponseTimeoutRound",
            Self::FailedMechRequest => "FailedMechRequestRound",
        }
    }

    /// Whether the state reports a failure.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            Self::FailedMechInformation | Self::FailedMechRequest | Self::FinishedMechResponseTimeout
        )
    }

    /// Synced state fields guaranteed to be set on exit.
    pub fn post_conditions(self) -> &'static [&'static str] {
        match self {
            Self::FinishedMechInformation => &["mechs_info", "priority_mech_address"],
            Self::FinishedMarketplaceLegacyDetected | Self::FinishedMechLegacyDetected => {
                &["dialect"]
            }
            Self::FinishedMechRequest => &[
                "tx_submitter",
                "most_voted_tx_hash",
                "mech_price",
                "mech_requests",
                "mech_responses",
                "last_called_mech",
            ],
            Self::FinishedMechPurchaseSubscription => &["tx_submitter", "most_voted_tx_hash"],
            Self::FinishedMechResponse => &["mech_responses"],
            Self::FailedMechInformation
            | Self::FailedMechRequest
            | Self::FinishedMechResponseTimeout => &["last_error"],
            Self::FinishedMechRequestSkip => &[],
        }
    }
}

impl fmt::Display for TerminalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where the state machine is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppState {
    /// Collecting payloads.
    Round(Round),
    /// Finished.
    Terminal(TerminalState),
}

impl AppState {
    /// Name of the round or terminal state.
    pub fn name(self) -> &'static str {
        match self {
            Self::Round(round) => round.name(),
            Self::Terminal(terminal) => terminal.name(),
        }
    }
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome driving a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Event {
    /// Round completed.
    Done,
    /// Round completed without a usable value.
    None,
    /// First marketplace detected.
    V1,
    /// Current marketplace detected.
    V2,
    /// No marketplace detected.
    NoMarketplace,
    /// Payloads split without a majority.
    NoMajority,
    /// Round deadline passed.
    RoundTimeout,
    /// Nothing to request.
    SkipRequest,
    /// Subscription needed before requesting.
    BuySubscription,
    /// Mech failed; select another.
    Reselect,
    /// No dialect could be determined.
    DetectionFailed,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_detection_routes_by_dialect() {
        let round = Round::MechVersionDetection;
        assert_eq!(
            round.transition(Event::V2),
            Some(AppState::Round(Round::MechInformation))
        );
        assert_eq!(
            round.transition(Event::V1),
            Some(AppState::Terminal(TerminalState::FinishedMarketplaceLegacyDetected))
        );
        assert_eq!(
            round.transition(Event::NoMarketplace),
            Some(AppState::Terminal(TerminalState::FinishedMechLegacyDetected))
        );
        assert_eq!(
            round.transition(Event::DetectionFailed),
            Some(AppState::Terminal(TerminalState::FailedMechInformation))
        );
        assert_eq!(round.transition(Event::Done), None);
    }

    #[test]
    fn response_round_routes() {
        let round = Round::MechResponse;
        assert_eq!(
            round.transition(Event::Reselect),
            Some(AppState::Round(Round::MechInformation))
        );
        assert_eq!(
            round.transition(Event::RoundTimeout),
            Some(AppState::Terminal(TerminalState::FinishedMechResponseTimeout))
        );
        assert_eq!(round.transition(Event::NoMajority), Some(AppState::Round(round)));
    }

    #[test]
    fn no_majority_loops_every_round() {
        for round in Round::ALL {
            assert_eq!(round.transition(Event::NoMajority), Some(AppState::Round(round)));
        }
    }

    #[test]
    fn initial_states() {
        let initial: Vec<Round> = Round::ALL.into_iter().filter(|r| r.is_initial()).collect();
        assert_eq!(
            initial,
            vec![Round::MechVersionDetection, Round::MechRequest, Round::MechResponse]
        );
    }

    #[test]
    fn terminal_names_are_unique() {
        let names: std::collections::BTreeSet<&str> =
            TerminalState::ALL.iter().map(|t| t.name()).collect();
        assert_eq!(names.len(), TerminalState::ALL.len());
        assert!(TerminalState::FailedMechRequest.is_failure());
        assert!(!TerminalState::FinishedMechRequestSkip.is_failure());
    }
}
