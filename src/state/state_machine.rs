use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle phases of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomPhase {
    /// No round in progress; members can ready up.
    Idle,
    /// A round is in progress and score frames are accepted.
    Playing,
    /// Every participant finished the round; results are on display.
    Completed,
    /// The round was cut short by the host or by every participant leaving.
    Aborted,
    /// The room was torn down. Terminal.
    Closed,
}

/// How a round ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundOutcome {
    /// Every participant reached the end of the play.
    Completed,
    /// The round was aborted before every participant finished.
    Aborted,
}

/// Events that can be applied to the room state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomEvent {
    /// The host starts a new round.
    StartRound,
    /// The round ended with the given outcome.
    EndRound(RoundOutcome),
    /// Per-round state was reclaimed; the room is ready for the next round.
    ResetSession,
    /// The room is being torn down.
    Close,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the state machine was in when the invalid event was received.
    pub from: RoomPhase,
    /// The event that cannot be applied from this phase.
    pub event: RoomEvent,
}

/// State machine implementing the round lifecycle of a single room.
#[derive(Debug, Clone)]
pub struct RoomStateMachine {
    phase: RoomPhase,
}

impl Default for RoomStateMachine {
    fn default() -> Self {
        Self {
            phase: RoomPhase::Idle,
        }
    }
}

impl RoomStateMachine {
    /// Create a new state machine initialised in the idle state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect the current phase.
    pub fn phase(&self) -> RoomPhase {
        self.phase
    }

    /// Whether `event` would be accepted from the current phase.
    pub fn can_apply(&self, event: RoomEvent) -> bool {
        self.compute_transition(event).is_ok()
    }

    /// Apply an event, returning the new phase.
    pub fn apply(&mut self, event: RoomEvent) -> Result<RoomPhase, InvalidTransition> {
        let next = self.compute_transition(event)?;
        self.phase = next;
        Ok(next)
    }

    /// Jump straight to `phase`, bypassing the transition table. Only used by
    /// replicas adopting authoritative state.
    pub(crate) fn restore(&mut self, phase: RoomPhase) {
        self.phase = phase;
    }

    fn compute_transition(&self, event: RoomEvent) -> Result<RoomPhase, InvalidTransition> {
        let next = match (self.phase, event) {
            (RoomPhase::Idle, RoomEvent::StartRound) => RoomPhase::Playing,
            (RoomPhase::Playing, RoomEvent::EndRound(RoundOutcome::Completed)) => {
                RoomPhase::Completed
            }
            (RoomPhase::Playing, RoomEvent::EndRound(RoundOutcome::Aborted)) => RoomPhase::Aborted,
            (RoomPhase::Completed | RoomPhase::Aborted, RoomEvent::ResetSession) => RoomPhase::Idle,
            (from, RoomEvent::Close) if from != RoomPhase::Closed => RoomPhase::Closed,
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(sm: &mut RoomStateMachine, event: RoomEvent) -> RoomPhase {
        sm.apply(event).unwrap()
    }

    #[test]
    fn initial_state_is_idle() {
        let sm = RoomStateMachine::new();
        assert_eq!(sm.phase(), RoomPhase::Idle);
        assert!(sm.can_apply(RoomEvent::StartRound));
    }

    #[test]
    fn full_round_returns_to_idle() {
        let mut sm = RoomStateMachine::new();

        assert_eq!(apply(&mut sm, RoomEvent::StartRound), RoomPhase::Playing);
        assert_eq!(
            apply(&mut sm, RoomEvent::EndRound(RoundOutcome::Completed)),
            RoomPhase::Completed
        );
        assert_eq!(apply(&mut sm, RoomEvent::ResetSession), RoomPhase::Idle);
        assert!(!sm.can_apply(RoomEvent::ResetSession));
    }

    #[test]
    fn aborted_round_returns_to_idle() {
        let mut sm = RoomStateMachine::new();
        apply(&mut sm, RoomEvent::StartRound);

        assert_eq!(
            apply(&mut sm, RoomEvent::EndRound(RoundOutcome::Aborted)),
            RoomPhase::Aborted
        );
        assert_eq!(apply(&mut sm, RoomEvent::ResetSession), RoomPhase::Idle);
    }

    #[test]
    fn close_is_accepted_from_every_live_phase() {
        for setup in [
            vec![],
            vec![RoomEvent::StartRound],
            vec![
                RoomEvent::StartRound,
                RoomEvent::EndRound(RoundOutcome::Completed),
            ],
            vec![RoomEvent::StartRound, RoomEvent::EndRound(RoundOutcome::Aborted)],
        ] {
            let mut sm = RoomStateMachine::new();
            for event in setup {
                apply(&mut sm, event);
            }
            assert_eq!(apply(&mut sm, RoomEvent::Close), RoomPhase::Closed);
        }
    }

    #[test]
    fn closed_is_terminal() {
        let mut sm = RoomStateMachine::new();
        apply(&mut sm, RoomEvent::Close);

        for event in [
            RoomEvent::StartRound,
            RoomEvent::ResetSession,
            RoomEvent::Close,
            RoomEvent::EndRound(RoundOutcome::Aborted),
        ] {
            assert!(!sm.can_apply(event), "{event:?} accepted after close");
        }
    }

    #[test]
    fn invalid_transition_returns_error() {
        let mut sm = RoomStateMachine::new();
        let err = sm
            .apply(RoomEvent::EndRound(RoundOutcome::Completed))
            .unwrap_err();
        assert_eq!(err.from, RoomPhase::Idle);
        assert_eq!(err.event, RoomEvent::EndRound(RoundOutcome::Completed));
        assert_eq!(sm.phase(), RoomPhase::Idle);
        assert!(sm.can_apply(RoomEvent::StartRound));
    }

    #[test]
    fn cannot_start_a_round_while_results_are_shown() {
        let mut sm = RoomStateMachine::new();
        apply(&mut sm, RoomEvent::StartRound);
        apply(&mut sm, RoomEvent::EndRound(RoundOutcome::Completed));
        assert!(!sm.can_apply(RoomEvent::StartRound));
    }
}
