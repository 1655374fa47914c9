use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::{
    dto::format_system_time,
    state::{
        buffer::ScoreFrame,
        leaderboard::LeaderboardEntry,
        room::{RoomId, RoundId, UserGameState, UserId},
        state_machine::RoomPhase,
    },
};

/// Live view of one member inside a [`GameplaySnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    /// Member id.
    pub user_id: UserId,
    /// Current game state.
    pub state: UserGameState,
    /// Newest buffered frame, if the player submitted any this round.
    pub latest_frame: Option<ScoreFrame>,
    /// Rank in the leaderboard carried by the snapshot.
    pub position: Option<u32>,
    #[serde(default)]
    /// Frames buffered for the current round.
    pub buffered_frames: usize,
}

/// Point-in-time view of a room handed to a newly subscribing observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameplaySnapshot {
    /// Room described.
    pub room_id: RoomId,
    /// Current round, if any.
    pub round_id: Option<RoundId>,
    /// Lifecycle phase.
    pub phase: RoomPhase,
    /// Current host.
    pub host_id: UserId,
    /// Members in join order.
    pub players: Vec<PlayerSnapshot>,
    /// Current ranking.
    pub leaderboard: Vec<LeaderboardEntry>,
    /// Room mutation version the snapshot was captured at.
    pub sequence: u64,
    /// RFC 3339 capture time.
    pub captured_at: String,
}

impl GameplaySnapshot {
    /// Build a snapshot stamped with the current wall-clock time.
    pub fn new(
        room_id: RoomId,
        round_id: Option<RoundId>,
        phase: RoomPhase,
        host_id: UserId,
        players: Vec<PlayerSnapshot>,
        leaderboard: Vec<LeaderboardEntry>,
        sequence: u64,
    ) -> Self {
        Self {
            room_id,
            round_id,
            phase,
            host_id,
            players,
            leaderboard,
            sequence,
            captured_at: format_system_time(SystemTime::now()),
        }
    }
}
