use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    dto::snapshot::{GameplaySnapshot, PlayerSnapshot},
    error::SessionError,
    state::{
        buffer::{ScoreFrame, ScoreFrameBuffer},
        leaderboard::{self, LeaderboardEntry, LeaderboardUpdate},
        state_machine::{RoomEvent, RoomPhase, RoomStateMachine, RoundOutcome},
    },
};

/// Room identifier.
pub type RoomId = u64;
/// User identifier.
pub type UserId = u64;
/// Observer (spectator connection) identifier.
pub type ObserverId = u64;
/// Opaque per-round token, regenerated every time a round starts.
pub type RoundId = Uuid;

/// Per-player gameplay state inside a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserGameState {
    /// Member is idle.
    NotReady,
    /// Member will take part in the next round.
    Ready,
    /// Member is playing the current round.
    Playing,
    /// Member reached the end of the current round.
    FinishedPlaying,
    /// Member watches without playing.
    Spectating,
}

impl UserGameState {
    /// Whether the member takes part in the current round.
    pub fn is_in_round(self) -> bool {
        matches!(self, Self::Playing | Self::FinishedPlaying)
    }
}

/// Live state of one member: game state, score buffer and last known rank.
#[derive(Debug, Clone)]
pub struct PlayerGameplayState {
    /// Member identifier.
    pub user_id: UserId,
    /// Current game state.
    pub state: UserGameState,
    /// Recent score frames of the current round.
    pub buffer: ScoreFrameBuffer,
    /// Rank in the last computed leaderboard.
    pub last_position: Option<u32>,
}

impl PlayerGameplayState {
    fn new(user_id: UserId, capacity: usize) -> Self {
        Self {
            user_id,
            state: UserGameState::NotReady,
            buffer: ScoreFrameBuffer::new(capacity),
            last_position: None,
        }
    }

    /// Back to `NotReady` with an empty buffer, returning the dropped frame count.
    fn reset(&mut self) -> usize {
        self.state = UserGameState::NotReady;
        self.last_position = None;
        self.buffer.clear()
    }
}

/// Outcome of a successful round start.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundStart {
    /// Freshly allocated round token.
    pub round_id: RoundId,
    /// Host at the time the round started.
    pub host_id: UserId,
    /// Members playing the round.
    pub participants: Vec<UserId>,
}

/// Outcome of a round end, captured atomically with the transition.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundEnd {
    /// Round that ended.
    pub round_id: RoundId,
    /// How the round ended.
    pub outcome: RoundOutcome,
    /// Terminal leaderboard of the round.
    pub final_update: LeaderboardUpdate,
}

/// Outcome of a member leaving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Departure {
    /// Frames dropped with the member's buffer.
    pub frames_dropped: usize,
    /// New host when the leaving member was the host.
    pub new_host: Option<UserId>,
    /// No member remains.
    pub now_empty: bool,
}

/// Live state of one multiplayer room.
#[derive(Debug)]
pub struct Room {
    id: RoomId,
    host_id: UserId,
    members: IndexMap<UserId, PlayerGameplayState>,
    observers: IndexSet<ObserverId>,
    machine: RoomStateMachine,
    round_id: Option<RoundId>,
    version: u64,
    buffer_capacity: usize,
    remote_sequence: u64,
    remote_leaderboard: Option<LeaderboardUpdate>,
}

impl Room {
    /// Create an idle room whose only member is its host.
    pub fn new(id: RoomId, host_id: UserId, buffer_capacity: usize) -> Self {
        let mut members = IndexMap::new();
        members.insert(host_id, PlayerGameplayState::new(host_id, buffer_capacity));
        Self {
            id,
            host_id,
            members,
            observers: IndexSet::new(),
            machine: RoomStateMachine::new(),
            round_id: None,
            version: 0,
            buffer_capacity,
            remote_sequence: 0,
            remote_leaderboard: None,
        }
    }

    /// Room identifier.
    pub fn id(&self) -> RoomId {
        self.id
    }

    /// Current host.
    pub fn host_id(&self) -> UserId {
        self.host_id
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> RoomPhase {
        self.machine.phase()
    }

    /// Token of the current round, if one is running or awaiting cleanup.
    pub fn round_id(&self) -> Option<RoundId> {
        self.round_id
    }

    /// Mutation counter, bumped on every state change.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Members in join order.
    pub fn members(&self) -> impl Iterator<Item = &PlayerGameplayState> {
        self.members.values()
    }

    /// Look up a member.
    pub fn member(&self, user_id: UserId) -> Option<&PlayerGameplayState> {
        self.members.get(&user_id)
    }

    /// Subscribed observers.
    pub fn observers(&self) -> &IndexSet<ObserverId> {
        &self.observers
    }

    /// Total number of buffered frames across members.
    pub fn buffered_frames(&self) -> usize {
        self.members.values().map(|m| m.buffer.len()).sum()
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.phase() == RoomPhase::Closed {
            return Err(SessionError::InvalidState(format!(
                "room `{}` is closed",
                self.id
            )));
        }
        Ok(())
    }

    fn member_mut(&mut self, user_id: UserId) -> Result<&mut PlayerGameplayState, SessionError> {
        let room_id = self.id;
        self.members
            .get_mut(&user_id)
            .ok_or(SessionError::NotMember { room_id, user_id })
    }

    fn bump(&mut self) {
        self.version += 1;
    }

    /// Add a member in `NotReady`. Returns `false` when already a member.
    pub fn add_member(&mut self, user_id: UserId) -> Result<bool, SessionError> {
        self.ensure_open()?;
        if self.members.contains_key(&user_id) {
            return Ok(false);
        }
        self.members
            .insert(user_id, PlayerGameplayState::new(user_id, self.buffer_capacity));
        self.bump();
        Ok(true)
    }

    /// Remove a member together with its buffer, handing the host role to the
    /// earliest remaining member when needed.
    pub fn remove_member(&mut self, user_id: UserId) -> Result<Departure, SessionError> {
        self.ensure_open()?;
        let room_id = self.id;
        let removed = self
            .members
            .shift_remove(&user_id)
            .ok_or(SessionError::NotMember { room_id, user_id })?;

        let mut new_host = None;
        if self.host_id == user_id
            && let Some(next) = self.members.keys().next().copied()
        {
            self.host_id = next;
            new_host = Some(next);
        }
        self.bump();

        Ok(Departure {
            frames_dropped: removed.buffer.len(),
            new_host,
            now_empty: self.members.is_empty(),
        })
    }

    /// Record an observer subscription.
    pub fn add_observer(&mut self, observer_id: ObserverId) -> Result<bool, SessionError> {
        self.ensure_open()?;
        Ok(self.observers.insert(observer_id))
    }

    /// Forget an observer subscription.
    pub fn remove_observer(&mut self, observer_id: ObserverId) -> bool {
        self.observers.shift_remove(&observer_id)
    }

    /// Change a member's game state, returning the previous state when it changed.
    ///
    /// Members enter `Playing` only through [`Self::start_round`], and while a
    /// round runs its participants may only move on to `FinishedPlaying`.
    pub fn set_user_state(
        &mut self,
        user_id: UserId,
        next: UserGameState,
    ) -> Result<Option<UserGameState>, SessionError> {
        self.ensure_open()?;
        let phase = self.phase();
        let member = self.member_mut(user_id)?;
        let current = member.state;
        if current == next {
            return Ok(None);
        }

        match next {
            UserGameState::Playing => {
                return Err(SessionError::InvalidState(
                    "players enter gameplay when the round starts".into(),
                ));
            }
            UserGameState::FinishedPlaying => {
                if phase != RoomPhase::Playing || current != UserGameState::Playing {
                    return Err(SessionError::InvalidState(format!(
                        "cannot finish playing from {current:?} while room is {phase:?}"
                    )));
                }
            }
            UserGameState::NotReady | UserGameState::Ready | UserGameState::Spectating => {
                if phase == RoomPhase::Playing && current.is_in_round() {
                    return Err(SessionError::InvalidState(format!(
                        "cannot switch to {next:?} during gameplay; abort instead"
                    )));
                }
            }
        }

        member.state = next;
        self.bump();
        Ok(Some(current))
    }

    /// Start a round with every `Ready` member.
    pub fn start_round(&mut self, round_id: RoundId) -> Result<RoundStart, SessionError> {
        self.ensure_open()?;
        if !self.machine.can_apply(RoomEvent::StartRound) {
            return Err(SessionError::InvalidState(format!(
                "cannot start a round while room is {:?}",
                self.phase()
            )));
        }

        let participants: Vec<UserId> = self
            .members
            .values()
            .filter(|m| m.state == UserGameState::Ready)
            .map(|m| m.user_id)
            .collect();
        if participants.is_empty() {
            return Err(SessionError::InvalidState("no member is ready".into()));
        }

        self.machine.apply(RoomEvent::StartRound)?;
        for user_id in &participants {
            if let Some(member) = self.members.get_mut(user_id) {
                member.reset();
                member.state = UserGameState::Playing;
            }
        }
        self.round_id = Some(round_id);
        self.bump();

        Ok(RoundStart {
            round_id,
            host_id: self.host_id,
            participants,
        })
    }

    /// Append a score frame for `user_id` in round `round_id`.
    pub fn append_frame(
        &mut self,
        user_id: UserId,
        round_id: RoundId,
        frame: ScoreFrame,
    ) -> Result<(), SessionError> {
        let phase = self.phase();
        if phase != RoomPhase::Playing {
            return Err(SessionError::InvalidState(format!(
                "score updates are only accepted while playing (room is {phase:?})"
            )));
        }
        if self.round_id != Some(round_id) {
            return Err(SessionError::StaleRound {
                expected: self.round_id,
                got: round_id,
            });
        }

        let member = self.member_mut(user_id)?;
        if member.state != UserGameState::Playing {
            return Err(SessionError::InvalidState(format!(
                "user `{user_id}` is {:?}, not playing",
                member.state
            )));
        }
        member.buffer.append(frame)?;
        self.bump();
        Ok(())
    }

    /// Outcome the running round should end with, if no participant is still playing.
    pub fn pending_outcome(&self) -> Option<RoundOutcome> {
        if self.phase() != RoomPhase::Playing {
            return None;
        }
        let mut any_finished = false;
        for member in self.members.values() {
            match member.state {
                UserGameState::Playing => return None,
                UserGameState::FinishedPlaying => any_finished = true,
                _ => {}
            }
        }
        Some(if any_finished {
            RoundOutcome::Completed
        } else {
            RoundOutcome::Aborted
        })
    }

    /// End the running round and capture its final leaderboard.
    ///
    /// On abort every participant drops back to `NotReady`; buffers stay until
    /// the session cleanup reclaims them.
    pub fn end_round(&mut self, outcome: RoundOutcome) -> Result<RoundEnd, SessionError> {
        let round_id = self.round_id.ok_or_else(|| {
            SessionError::InvalidState(format!("room `{}` has no running round", self.id))
        })?;
        self.machine.apply(RoomEvent::EndRound(outcome))?;
        self.bump();

        let aborted = outcome == RoundOutcome::Aborted;
        let entries = self.leaderboard();
        for entry in &entries {
            if let Some(member) = self.members.get_mut(&entry.user_id) {
                member.last_position = Some(entry.position);
            }
        }
        if aborted {
            for member in self.members.values_mut() {
                if member.state.is_in_round() {
                    member.state = UserGameState::NotReady;
                }
            }
        }

        Ok(RoundEnd {
            round_id,
            outcome,
            final_update: LeaderboardUpdate {
                room_id: self.id,
                round_id,
                sequence: self.version,
                entries,
                is_final: true,
                aborted,
            },
        })
    }

    /// Reclaim per-round state once round `round_id` has ended.
    ///
    /// Returns the number of frames cleared, or `None` when there is nothing to
    /// do: the round is still running, was already reset, or was superseded.
    pub fn reset_session(&mut self, round_id: RoundId) -> Option<usize> {
        if self.round_id != Some(round_id) || !self.machine.can_apply(RoomEvent::ResetSession) {
            return None;
        }
        self.machine.apply(RoomEvent::ResetSession).ok()?;

        let mut cleared = 0;
        for member in self.members.values_mut() {
            cleared += member.buffer.clear();
            member.last_position = None;
            if member.state.is_in_round() {
                member.state = UserGameState::NotReady;
            }
        }
        self.round_id = None;
        self.remote_leaderboard = None;
        self.bump();
        Some(cleared)
    }

    /// A participant gives up mid-round: back to `NotReady` with an empty
    /// buffer. Returns the number of frames dropped.
    pub fn abandon_round(&mut self, user_id: UserId) -> Result<usize, SessionError> {
        let phase = self.phase();
        let member = self.member_mut(user_id)?;
        if phase != RoomPhase::Playing || member.state != UserGameState::Playing {
            return Err(SessionError::InvalidState(format!(
                "user `{user_id}` is not playing"
            )));
        }
        let cleared = member.reset();
        self.bump();
        Ok(cleared)
    }

    /// Reset one member to `NotReady` with an empty buffer.
    pub fn reset_user(&mut self, user_id: UserId) -> Result<usize, SessionError> {
        let member = self.member_mut(user_id)?;
        if member.state == UserGameState::NotReady && member.buffer.is_empty() {
            return Ok(0);
        }
        let cleared = member.reset();
        self.bump();
        Ok(cleared)
    }

    /// Tear the room down, returning the number of frames dropped.
    pub fn close(&mut self) -> usize {
        if self.machine.apply(RoomEvent::Close).is_err() {
            return 0;
        }
        let dropped = self.buffered_frames();
        self.members.clear();
        self.observers.clear();
        self.round_id = None;
        self.remote_leaderboard = None;
        self.bump();
        dropped
    }

    /// Ranking of the current round.
    ///
    /// A replica reports the newest leaderboard it received for the current
    /// round instead of ranking its own, partial, frames.
    pub fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        if let Some(remote) = &self.remote_leaderboard
            && Some(remote.round_id) == self.round_id
        {
            return remote.entries.clone();
        }
        leaderboard::compute(self.members.values().map(|m| (m.user_id, &m.buffer)))
    }

    /// Leaderboard payload for the current round, if one exists.
    pub fn leaderboard_update(&self) -> Option<LeaderboardUpdate> {
        let round_id = self.round_id?;
        Some(LeaderboardUpdate {
            room_id: self.id,
            round_id,
            sequence: self.version,
            entries: self.leaderboard(),
            is_final: false,
            aborted: false,
        })
    }

    /// Copy of every non-empty buffer of round `round_id`, for archiving.
    pub fn round_buffers(&self, round_id: RoundId) -> Vec<(UserId, Vec<ScoreFrame>)> {
        if self.round_id != Some(round_id) {
            return Vec::new();
        }
        self.members
            .values()
            .filter(|m| !m.buffer.is_empty())
            .map(|m| (m.user_id, m.buffer.snapshot_all()))
            .collect()
    }

    /// Point-in-time view for a newly subscribing observer.
    pub fn snapshot(&self) -> GameplaySnapshot {
        let leaderboard = self.leaderboard();
        let players = self
            .members
            .values()
            .map(|m| PlayerSnapshot {
                user_id: m.user_id,
                state: m.state,
                latest_frame: m.buffer.latest().cloned(),
                buffered_frames: m.buffer.len(),
                position: leaderboard
                    .iter()
                    .find(|entry| entry.user_id == m.user_id)
                    .map(|entry| entry.position),
            })
            .collect();

        GameplaySnapshot::new(
            self.id,
            self.round_id,
            self.phase(),
            self.host_id,
            players,
            leaderboard,
            self.version,
        )
    }

    /// Replica: adopt a round started by the authoritative process.
    pub fn apply_round_started(
        &mut self,
        round_id: RoundId,
        host_id: UserId,
        participants: &[UserId],
    ) -> bool {
        if self.phase() == RoomPhase::Closed || self.round_id == Some(round_id) {
            return false;
        }

        for member in self.members.values_mut() {
            if member.state.is_in_round() {
                member.reset();
            } else {
                member.buffer.clear();
            }
        }
        self.machine.restore(RoomPhase::Idle);
        if self.machine.apply(RoomEvent::StartRound).is_err() {
            return false;
        }

        self.host_id = host_id;
        for &user_id in participants {
            let capacity = self.buffer_capacity;
            let member = self
                .members
                .entry(user_id)
                .or_insert_with(|| PlayerGameplayState::new(user_id, capacity));
            member.reset();
            member.state = UserGameState::Playing;
        }
        self.round_id = Some(round_id);
        self.remote_leaderboard = None;
        self.bump();
        true
    }

    /// Replica: adopt the end of the running round. Duplicates and ends of
    /// rounds this replica does not run are ignored.
    pub fn apply_round_ended(&mut self, round_id: RoundId, outcome: RoundOutcome) -> bool {
        if self.round_id != Some(round_id) || self.phase() != RoomPhase::Playing {
            return false;
        }
        self.end_round(outcome).is_ok()
    }

    /// Replica: adopt a member state change; unknown members are added.
    pub fn apply_user_state(&mut self, user_id: UserId, state: UserGameState) -> bool {
        if self.phase() == RoomPhase::Closed {
            return false;
        }
        let capacity = self.buffer_capacity;
        let member = self
            .members
            .entry(user_id)
            .or_insert_with(|| PlayerGameplayState::new(user_id, capacity));
        if member.state == state {
            return false;
        }
        member.state = state;
        self.bump();
        true
    }

    /// Replica: keep the newest leaderboard received for the current round.
    pub fn cache_remote_leaderboard(&mut self, update: &LeaderboardUpdate) -> bool {
        if self.phase() == RoomPhase::Closed || update.sequence < self.remote_sequence {
            return false;
        }
        if let Some(previous) = &self.remote_leaderboard
            && previous.round_id == update.round_id
            && previous.sequence >= update.sequence
        {
            return false;
        }
        self.remote_sequence = update.sequence;
        self.remote_leaderboard = Some(update.clone());
        self.bump();
        true
    }

    /// Replica: replace local state with an authoritative snapshot unless a
    /// newer one was already applied.
    pub fn apply_snapshot(&mut self, snapshot: &GameplaySnapshot) -> bool {
        if self.phase() == RoomPhase::Closed
            || snapshot.phase == RoomPhase::Closed
            || snapshot.sequence < self.remote_sequence
        {
            return false;
        }

        self.members.clear();
        for player in &snapshot.players {
            let mut state = PlayerGameplayState::new(player.user_id, self.buffer_capacity);
            state.state = player.state;
            state.last_position = player.position;
            if let Some(frame) = &player.latest_frame {
                let _ = state.buffer.append(frame.clone());
            }
            self.members.insert(player.user_id, state);
        }
        self.host_id = snapshot.host_id;
        self.round_id = snapshot.round_id;
        self.machine.restore(snapshot.phase);
        self.remote_sequence = snapshot.sequence;
        self.remote_leaderboard = snapshot.round_id.map(|round_id| LeaderboardUpdate {
            room_id: self.id,
            round_id,
            sequence: snapshot.sequence,
            entries: snapshot.leaderboard.clone(),
            is_final: false,
            aborted: false,
        });
        self.bump();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::buffer::frame;

    const A: UserId = 1;
    const B: UserId = 2;

    fn room_with_ready_players() -> Room {
        let mut room = Room::new(7, A, 8);
        room.add_member(B).unwrap();
        room.set_user_state(A, UserGameState::Ready).unwrap();
        room.set_user_state(B, UserGameState::Ready).unwrap();
        room
    }

    #[test]
    fn start_round_moves_ready_members_to_playing() {
        let mut room = room_with_ready_players();
        room.add_member(3).unwrap();

        let round_id = Uuid::new_v4();
        let start = room.start_round(round_id).unwrap();

        assert_eq!(start.participants, vec![A, B]);
        assert_eq!(room.phase(), RoomPhase::Playing);
        assert_eq!(room.round_id(), Some(round_id));
        assert_eq!(room.member(3).unwrap().state, UserGameState::NotReady);
    }

    #[test]
    fn start_round_requires_a_ready_member() {
        let mut room = Room::new(7, A, 8);
        let err = room.start_round(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, SessionError::InvalidState(_)));
        assert_eq!(room.phase(), RoomPhase::Idle);
    }

    #[test]
    fn frames_outside_playing_are_rejected_without_mutation() {
        let mut room = room_with_ready_players();
        let before = room.version();

        let err = room.append_frame(A, Uuid::new_v4(), frame(1, 10)).unwrap_err();
        assert!(matches!(err, SessionError::InvalidState(_)));
        assert_eq!(room.version(), before);
        assert_eq!(room.buffered_frames(), 0);
    }

    #[test]
    fn frames_for_another_round_are_stale() {
        let mut room = room_with_ready_players();
        let round_id = Uuid::new_v4();
        room.start_round(round_id).unwrap();

        let other = Uuid::new_v4();
        let err = room.append_frame(A, other, frame(1, 10)).unwrap_err();
        assert_eq!(
            err,
            SessionError::StaleRound {
                expected: Some(round_id),
                got: other
            }
        );
    }

    #[test]
    fn stale_frames_are_reported() {
        let mut room = room_with_ready_players();
        let round_id = Uuid::new_v4();
        room.start_round(round_id).unwrap();
        room.append_frame(A, round_id, frame(5, 10)).unwrap();

        let err = room.append_frame(A, round_id, frame(5, 20)).unwrap_err();
        assert!(matches!(err, SessionError::StaleFrame(_)));
        assert_eq!(room.member(A).unwrap().buffer.latest().unwrap().total_score, 10);
    }

    #[test]
    fn round_completes_once_every_participant_finished() {
        let mut room = room_with_ready_players();
        room.start_round(Uuid::new_v4()).unwrap();

        room.set_user_state(A, UserGameState::FinishedPlaying).unwrap();
        assert_eq!(room.pending_outcome(), None);
        room.set_user_state(B, UserGameState::FinishedPlaying).unwrap();
        assert_eq!(room.pending_outcome(), Some(RoundOutcome::Completed));
    }

    #[test]
    fn participants_cannot_unready_during_gameplay() {
        let mut room = room_with_ready_players();
        room.start_round(Uuid::new_v4()).unwrap();

        assert!(room.set_user_state(A, UserGameState::NotReady).is_err());
        assert!(room.set_user_state(A, UserGameState::Playing).is_ok_and(|c| c.is_none()));
    }

    #[test]
    fn aborting_resets_participants_but_keeps_buffers() {
        let mut room = room_with_ready_players();
        let round_id = Uuid::new_v4();
        room.start_round(round_id).unwrap();
        room.append_frame(A, round_id, frame(1, 100)).unwrap();

        let end = room.end_round(RoundOutcome::Aborted).unwrap();
        assert!(end.final_update.aborted);
        assert!(end.final_update.is_final);
        assert_eq!(room.member(A).unwrap().state, UserGameState::NotReady);
        assert_eq!(room.member(B).unwrap().state, UserGameState::NotReady);
        assert_eq!(room.buffered_frames(), 1);
    }

    #[test]
    fn abandoning_only_applies_to_a_running_participant() {
        let mut room = room_with_ready_players();
        assert!(matches!(
            room.abandon_round(A),
            Err(SessionError::InvalidState(_))
        ));

        let round_id = Uuid::new_v4();
        room.start_round(round_id).unwrap();
        room.append_frame(A, round_id, frame(1, 10)).unwrap();
        room.append_frame(A, round_id, frame(2, 20)).unwrap();

        assert_eq!(room.abandon_round(A).unwrap(), 2);
        assert_eq!(room.member(A).unwrap().state, UserGameState::NotReady);
        assert!(room.abandon_round(A).is_err(), "second abort finds nobody playing");
        assert!(matches!(
            room.abandon_round(9),
            Err(SessionError::NotMember { .. })
        ));
        assert_eq!(room.pending_outcome(), None, "B is still playing");
    }

    #[test]
    fn reset_session_is_scoped_to_its_round_and_idempotent() {
        let mut room = room_with_ready_players();
        let round_id = Uuid::new_v4();
        room.start_round(round_id).unwrap();
        room.append_frame(A, round_id, frame(1, 100)).unwrap();
        room.append_frame(B, round_id, frame(1, 300)).unwrap();

        assert_eq!(room.reset_session(round_id), None, "round still running");

        room.set_user_state(A, UserGameState::FinishedPlaying).unwrap();
        room.set_user_state(B, UserGameState::FinishedPlaying).unwrap();
        room.end_round(RoundOutcome::Completed).unwrap();

        assert_eq!(room.reset_session(Uuid::new_v4()), None);
        assert_eq!(room.reset_session(round_id), Some(2));
        assert_eq!(room.reset_session(round_id), None);

        assert_eq!(room.phase(), RoomPhase::Idle);
        assert_eq!(room.buffered_frames(), 0);
        assert_eq!(room.members().count(), 2);
        assert!(room
            .members()
            .all(|m| m.state == UserGameState::NotReady));
    }

    #[test]
    fn host_is_handed_over_in_join_order() {
        let mut room = Room::new(7, A, 8);
        room.add_member(B).unwrap();
        room.add_member(3).unwrap();

        let departure = room.remove_member(A).unwrap();
        assert_eq!(departure.new_host, Some(B));
        assert!(!departure.now_empty);
        assert_eq!(room.host_id(), B);

        assert!(matches!(
            room.remove_member(A),
            Err(SessionError::NotMember { .. })
        ));
    }

    #[test]
    fn closed_room_rejects_mutations() {
        let mut room = room_with_ready_players();
        room.close();
        assert_eq!(room.phase(), RoomPhase::Closed);
        assert!(room.add_member(9).is_err());
        assert!(room.start_round(Uuid::new_v4()).is_err());
        assert_eq!(room.close(), 0);
    }

    #[test]
    fn replica_ignores_duplicate_round_start() {
        let mut replica = Room::new(7, A, 8);
        let round_id = Uuid::new_v4();

        assert!(replica.apply_round_started(round_id, A, &[A, B]));
        let version = replica.version();
        assert!(!replica.apply_round_started(round_id, A, &[A, B]));
        assert_eq!(replica.version(), version);
        assert_eq!(replica.phase(), RoomPhase::Playing);
        assert_eq!(replica.member(B).unwrap().state, UserGameState::Playing);
    }

    #[test]
    fn replica_leaderboard_cache_is_monotonic() {
        let mut replica = Room::new(7, A, 8);
        let round_id = Uuid::new_v4();
        replica.apply_round_started(round_id, A, &[A]);

        let update = |sequence| LeaderboardUpdate {
            room_id: 7,
            round_id,
            sequence,
            entries: Vec::new(),
            is_final: false,
            aborted: false,
        };
        assert!(replica.cache_remote_leaderboard(&update(5)));
        assert!(!replica.cache_remote_leaderboard(&update(5)));
        assert!(!replica.cache_remote_leaderboard(&update(3)));
        assert!(replica.cache_remote_leaderboard(&update(6)));
    }
}
