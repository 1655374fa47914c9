use std::cmp::Reverse;

use serde::{Deserialize, Serialize};

use crate::state::{
    buffer::ScoreFrameBuffer,
    room::{RoomId, RoundId, UserId},
};

/// One ranked row of a room leaderboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    /// Player the row belongs to.
    pub user_id: UserId,
    /// Dense 1-based rank; equal scores share a rank.
    pub position: u32,
    /// Score of the player's newest frame.
    pub total_score: u64,
    /// Combo of the player's newest frame.
    pub combo: u32,
    /// Highest combo of the player's newest frame.
    pub max_combo: u32,
    /// Accuracy of the player's newest frame.
    pub accuracy: f64,
    /// `false` when the newest frame is flagged as failed.
    pub passed: bool,
}

/// Leaderboard payload pushed to observers and to the sync bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardUpdate {
    /// Room the leaderboard belongs to.
    pub room_id: RoomId,
    /// Round the leaderboard was computed for.
    pub round_id: RoundId,
    /// Room mutation version the leaderboard reflects.
    pub sequence: u64,
    /// Ordered ranking.
    pub entries: Vec<LeaderboardEntry>,
    /// Last leaderboard of the round.
    #[serde(rename = "final")]
    pub is_final: bool,
    /// The round was aborted; the ranking carries no guarantee.
    pub aborted: bool,
}

/// Rank every player that has at least one buffered frame.
///
/// Ordering is score descending, then earliest completion timestamp (players
/// that have not completed sort after those who have), then lowest user id.
/// The function is pure: identical input yields identical output.
pub fn compute<'a, I>(players: I) -> Vec<LeaderboardEntry>
where
    I: IntoIterator<Item = (UserId, &'a ScoreFrameBuffer)>,
{
    let mut rows: Vec<_> = players
        .into_iter()
        .filter_map(|(user_id, buffer)| buffer.latest().map(|frame| (user_id, frame)))
        .collect();

    rows.sort_by_key(|(user_id, frame)| {
        let completed_at = if frame.completed {
            frame.timestamp
        } else {
            u64::MAX
        };
        (Reverse(frame.total_score), completed_at, *user_id)
    });

    let mut entries = Vec::with_capacity(rows.len());
    let mut position = 0;
    let mut previous_score = None;
    for (user_id, frame) in rows {
        if previous_score != Some(frame.total_score) {
            position += 1;
            previous_score = Some(frame.total_score);
        }
        entries.push(LeaderboardEntry {
            user_id,
            position,
            total_score: frame.total_score,
            combo: frame.combo,
            max_combo: frame.max_combo,
            accuracy: frame.accuracy,
            passed: !frame.failed,
        });
    }
    entries
}
