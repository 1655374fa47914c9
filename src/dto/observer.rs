use serde::Serialize;

use crate::{
    dto::{snapshot::GameplaySnapshot, sse::ServerEvent},
    state::{
        leaderboard::LeaderboardUpdate,
        room::{RoundId, UserGameState, UserId},
        state_machine::RoundOutcome,
    },
};

/// Event delivered to the observers of one room.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ObserverEvent {
    /// Point-in-time view, sent first and on every authoritative resync.
    Snapshot(GameplaySnapshot),
    /// Periodic or final ranking.
    Leaderboard(LeaderboardUpdate),
    /// A round began.
    RoundStarted(RoundStartedEvent),
    /// A round ended.
    RoundEnded(RoundEndedEvent),
    /// A member changed state.
    UserStateChanged(UserStateChangedEvent),
    /// The room was torn down; last event of the stream.
    RoomClosed,
}

/// Broadcast when a round begins.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundStartedEvent {
    /// Round that began.
    pub round_id: RoundId,
    /// Members playing it.
    pub participants: Vec<UserId>,
}

/// Broadcast when a round completes or is aborted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundEndedEvent {
    /// Round that ended.
    pub round_id: RoundId,
    /// How it ended.
    pub outcome: RoundOutcome,
}

/// Broadcast when a member changes game state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserStateChangedEvent {
    /// Member whose state changed.
    pub user_id: UserId,
    /// New state.
    pub state: UserGameState,
}

impl ObserverEvent {
    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            ObserverEvent::Snapshot(_) => "snapshot",
            ObserverEvent::Leaderboard(_) => "leaderboard",
            ObserverEvent::RoundStarted(_) => "round_started",
            ObserverEvent::RoundEnded(_) => "round_ended",
            ObserverEvent::UserStateChanged(_) => "user_state_changed",
            ObserverEvent::RoomClosed => "room_closed",
        }
    }

    /// Serialise into an SSE payload.
    pub fn to_server_event(&self) -> serde_json::Result<ServerEvent> {
        ServerEvent::json(self.name(), self)
    }
}
