// Session phase state machine: local triggers are validated, host broadcasts are followed.

use crate::domain::Phase;
use std::fmt;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    // Local player actions.
    ScenarioChosen,
    ClaimGranted,
    SelectionSkipped,
    SelectionTimedOut,
    ObstacleCommitted,
    PlacementTimedOut,

    // Host broadcasts.
    ScenarioSelectionOpened,
    BuildingOpened,
    RoundStarted,
    PlacementsSettled,
    RoundEnded,
    WinnerAnnounced,
    RoomReset,
}

impl Trigger {
    fn is_broadcast(self) -> bool {
        matches!(
            self,
            Trigger::ScenarioSelectionOpened
                | Trigger::BuildingOpened
                | Trigger::RoundStarted
                | Trigger::PlacementsSettled
                | Trigger::RoundEnded
                | Trigger::WinnerAnnounced
                | Trigger::RoomReset
        )
    }

    /// Target phase and the phases this trigger is expected from.
    fn rule(self) -> (Phase, &'static [Phase]) {
        use Phase::*;
        match self {
            Trigger::ScenarioChosen => (Building, &[ScenarioSelecting]),
            Trigger::ClaimGranted => (Placing, &[ItemSelection]),
            Trigger::SelectionSkipped => (WaitingForOthers, &[ItemSelection, Placing]),
            Trigger::SelectionTimedOut => (WaitingForOthers, &[ItemSelection]),
            Trigger::ObstacleCommitted => (WaitingForOthers, &[Placing]),
            Trigger::PlacementTimedOut => (WaitingForOthers, &[Placing]),
            Trigger::ScenarioSelectionOpened => (ScenarioSelecting, &[Waiting, ScenarioSelecting]),
            Trigger::BuildingOpened => (Building, &[ScenarioSelecting, Building]),
            Trigger::RoundStarted => (ItemSelection, &[Building, ItemSelection]),
            Trigger::PlacementsSettled => (Playing, &[WaitingForOthers, Playing]),
            Trigger::RoundEnded => (ItemSelection, &[Playing]),
            Trigger::WinnerAnnounced => (
                GameOver,
                &[ItemSelection, Placing, WaitingForOthers, Playing, GameOver],
            ),
            Trigger::RoomReset => (
                Waiting,
                &[
                    Waiting,
                    ScenarioSelecting,
                    Building,
                    ItemSelection,
                    Placing,
                    WaitingForOthers,
                    Playing,
                    GameOver,
                ],
            ),
        }
    }
}

/// Actions only the room host may start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCommand {
    StartScenarioSelection,
    StartRound,
    ResetRoom,
}

impl HostCommand {
    pub fn label(self) -> &'static str {
        match self {
            HostCommand::StartScenarioSelection => "start scenario selection",
            HostCommand::StartRound => "start the round",
            HostCommand::ResetRoom => "reset the room",
        }
    }

    fn required_phase(self) -> Option<Phase> {
        match self {
            HostCommand::StartScenarioSelection => Some(Phase::Waiting),
            HostCommand::StartRound => Some(Phase::Building),
            HostCommand::ResetRoom => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionError {
    NotAllowed { from: Phase, trigger: Trigger },
    HostOnly,
    WrongPhase { expected: Phase, actual: Phase },
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionError::NotAllowed { from, trigger } => {
                write!(f, "{trigger:?} is not allowed from {from}")
            }
            TransitionError::HostOnly => f.write_str("host-only action"),
            TransitionError::WrongPhase { expected, actual } => {
                write!(f, "expected phase {expected}, currently {actual}")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Phase,
    pub to: Phase,
    /// The host moved us from a phase the trigger is not expected from.
    pub out_of_order: bool,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }

    /// A snapshot moved us from `Playing` straight into the next selection.
    pub fn skipped_round_end(&self) -> bool {
        self.from == Phase::Playing && self.to == Phase::ItemSelection
    }
}

/// Owns the local phase. Exactly one phase is active at any time.
#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    phase: Phase,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self {
            phase: Phase::Waiting,
        }
    }
}

impl SessionStateMachine {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Checks a host-only command before anything is sent to the peer.
    pub fn authorize(&self, command: HostCommand, is_host: bool) -> Result<(), TransitionError> {
        if !is_host {
            return Err(TransitionError::HostOnly);
        }
        match command.required_phase() {
            Some(expected) if expected != self.phase => Err(TransitionError::WrongPhase {
                expected,
                actual: self.phase,
            }),
            _ => Ok(()),
        }
    }

    pub fn fire(&mut self, trigger: Trigger) -> Result<Transition, TransitionError> {
        let from = self.phase;
        let (to, expected_from) = trigger.rule();
        let expected = expected_from.contains(&from);

        if !expected {
            // Local triggers are strict; the game is over until a reset or new selection.
            let ignored_after_game = from == Phase::GameOver
                && !matches!(
                    trigger,
                    Trigger::RoomReset | Trigger::ScenarioSelectionOpened
                );
            if !trigger.is_broadcast() || ignored_after_game {
                return Err(TransitionError::NotAllowed { from, trigger });
            }
            warn!(?trigger, %from, %to, "out-of-order broadcast; following host");
        }

        self.phase = to;
        let transition = Transition {
            from,
            to,
            out_of_order: !expected,
        };
        if transition.changed() {
            info!(%from, %to, ?trigger, "phase transition");
        }
        Ok(transition)
    }

    /// Adopts the phase from a full room snapshot.
    ///
    /// The host reports `ItemSelection` for the whole claim and placement stage, so a
    /// player already placing or waiting keeps that sub-phase. Every other report wins,
    /// except that round phases never pull the game back from the game-over screen.
    pub fn reconcile(&mut self, reported: Phase) -> Transition {
        let from = self.phase;
        let keep_local = match (from, reported) {
            (Phase::Placing | Phase::WaitingForOthers, Phase::ItemSelection) => true,
            (Phase::GameOver, reported) => reported.is_round_phase(),
            _ => false,
        };
        if !keep_local {
            self.phase = reported;
        }
        let transition = Transition {
            from,
            to: self.phase,
            out_of_order: false,
        };
        if transition.changed() {
            info!(%from, to = %self.phase, "phase reconciled from snapshot");
        }
        transition
    }
}
