use std::{collections::BTreeMap, time::Duration};

use realtime_rooms::{
    config::SessionConfig,
    dto::observer::ObserverEvent,
    services::room_controller,
    state::{
        SharedState,
        buffer::ScoreFrame,
        leaderboard::LeaderboardUpdate,
        room::{RoomId, RoundId, UserGameState, UserId},
    },
};
use tokio::{sync::broadcast::Receiver, time::timeout};

pub const ROOM: RoomId = 42;
pub const A: UserId = 1;
pub const B: UserId = 2;

pub fn config() -> SessionConfig {
    SessionConfig::default()
}

pub fn frame(timestamp: u64, total_score: u64) -> ScoreFrame {
    ScoreFrame {
        timestamp,
        total_score,
        combo: 0,
        max_combo: 0,
        accuracy: 1.0,
        statistics: BTreeMap::new(),
        completed: false,
        failed: false,
    }
}

/// Room `ROOM` hosted by A with B joined and both ready.
pub async fn ready_room(state: &SharedState) {
    room_controller::create_room(state, ROOM, A).await.unwrap();
    room_controller::join_room(state, ROOM, B).await.unwrap();
    room_controller::change_user_state(state, ROOM, A, UserGameState::Ready)
        .await
        .unwrap();
    room_controller::change_user_state(state, ROOM, B, UserGameState::Ready)
        .await
        .unwrap();
}

/// Start a round and submit A(1,100), A(2,250), B(1,300).
pub async fn scored_round(state: &SharedState) -> RoundId {
    let round_id = room_controller::start_round(state, ROOM).await.unwrap().round_id;
    room_controller::submit_score(state, ROOM, A, round_id, frame(1, 100))
        .await
        .unwrap();
    room_controller::submit_score(state, ROOM, A, round_id, frame(2, 250))
        .await
        .unwrap();
    room_controller::submit_score(state, ROOM, B, round_id, frame(1, 300))
        .await
        .unwrap();
    round_id
}

pub async fn next_event(receiver: &mut Receiver<ObserverEvent>) -> ObserverEvent {
    timeout(Duration::from_secs(60), receiver.recv())
        .await
        .expect("observer event")
        .expect("open channel")
}

/// Skip events until the final leaderboard of the round.
pub async fn final_leaderboard(receiver: &mut Receiver<ObserverEvent>) -> LeaderboardUpdate {
    loop {
        if let ObserverEvent::Leaderboard(update) = next_event(receiver).await
            && update.is_final
        {
            return update;
        }
    }
}

pub fn ranking(update: &LeaderboardUpdate) -> Vec<UserId> {
    update.entries.iter().map(|entry| entry.user_id).collect()
}
