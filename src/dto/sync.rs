use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    dto::snapshot::GameplaySnapshot,
    state::{
        leaderboard::LeaderboardUpdate,
        room::{ObserverId, RoomId, RoundId, UserGameState, UserId},
        state_machine::RoundOutcome,
    },
};

/// State-change events exchanged between processes over the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// The authoritative process started a round.
    RoundStarted {
        /// Room the round runs in.
        room_id: RoomId,
        /// New round.
        round_id: RoundId,
        /// Host at start time.
        host_id: UserId,
        /// Members playing the round.
        participants: Vec<UserId>,
    },
    /// A leaderboard was pushed to observers.
    LeaderboardUpdated {
        /// Ranking as pushed, carrying its room and round.
        update: LeaderboardUpdate,
    },
    /// A round ended.
    RoundEnded {
        /// Room the round ran in.
        room_id: RoomId,
        /// Round that ended.
        round_id: RoundId,
        /// How it ended.
        outcome: RoundOutcome,
        /// Final ranking of the round.
        final_update: LeaderboardUpdate,
    },
    /// A member changed state.
    UserStateChanged {
        /// Room of the member.
        room_id: RoomId,
        /// Member whose state changed.
        user_id: UserId,
        /// New state.
        state: UserGameState,
    },
    /// A replica needs a point-in-time view of a room, for a new observer or
    /// to catch up with a room it missed events of.
    SpectatorSyncRequested {
        /// Room to describe.
        room_id: RoomId,
        /// Observer that triggered the request, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        observer_id: Option<ObserverId>,
    },
    /// Answer to [`SyncEvent::SpectatorSyncRequested`].
    SnapshotProvided {
        /// Room described by the snapshot.
        room_id: RoomId,
        /// Observer copied from the request.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        observer_id: Option<ObserverId>,
        /// Authoritative view of the room.
        snapshot: GameplaySnapshot,
    },
    /// The room was torn down.
    RoomClosed {
        /// Room that was closed.
        room_id: RoomId,
    },
}

impl SyncEvent {
    /// Room the event is about.
    pub fn room_id(&self) -> RoomId {
        match self {
            SyncEvent::RoundStarted { room_id, .. }
            | SyncEvent::RoundEnded { room_id, .. }
            | SyncEvent::UserStateChanged { room_id, .. }
            | SyncEvent::SpectatorSyncRequested { room_id, .. }
            | SyncEvent::SnapshotProvided { room_id, .. }
            | SyncEvent::RoomClosed { room_id } => *room_id,
            SyncEvent::LeaderboardUpdated { update } => update.room_id,
        }
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncEvent::RoundStarted { .. } => "round_started",
            SyncEvent::LeaderboardUpdated { .. } => "leaderboard_updated",
            SyncEvent::RoundEnded { .. } => "round_ended",
            SyncEvent::UserStateChanged { .. } => "user_state_changed",
            SyncEvent::SpectatorSyncRequested { .. } => "spectator_sync_requested",
            SyncEvent::SnapshotProvided { .. } => "snapshot_provided",
            SyncEvent::RoomClosed { .. } => "room_closed",
        }
    }
}

/// Wire envelope tagging every event with the process that emitted it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEnvelope {
    /// Process that published the event.
    pub origin: Uuid,
    /// Published event.
    pub event: SyncEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_tagged_by_type() {
        let event = SyncEvent::UserStateChanged {
            room_id: 3,
            user_id: 9,
            state: UserGameState::FinishedPlaying,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "user_state_changed");
        assert_eq!(json["state"], "finished_playing");
        assert_eq!(event.room_id(), 3);
    }

    #[test]
    fn final_flag_is_serialized_as_final() {
        let update = LeaderboardUpdate {
            room_id: 1,
            round_id: Uuid::nil(),
            sequence: 4,
            entries: Vec::new(),
            is_final: true,
            aborted: false,
        };
        let json = serde_json::to_value(SyncEvent::LeaderboardUpdated { update }).unwrap();
        assert_eq!(json["update"]["final"], true);
    }
}
