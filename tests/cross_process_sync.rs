#[allow(dead_code)]
mod common;

use std::{sync::Arc, time::Duration};

use common::{A, B, ROOM, config, final_leaderboard, next_event, ranking, ready_room, scored_round};
use realtime_rooms::{
    config::{ProcessRole, SessionConfig},
    dao::{
        bus::{BusError, BusResult, EventBus},
        local_bus::LocalBus,
    },
    dto::{
        observer::ObserverEvent,
        sync::{SyncEnvelope, SyncEvent},
    },
    error::SessionError,
    services::{observer_service, room_controller, sync_gateway},
    state::{
        AppState, SharedState,
        room::{RoundId, UserGameState},
        state_machine::RoomPhase,
    },
};
use futures::{
    StreamExt,
    future::BoxFuture,
    stream::{self, BoxStream},
};
use tokio::time::sleep;

/// Let spawned consumers and tickers run.
async fn settle() {
    sleep(Duration::from_millis(10)).await;
}

async fn pair() -> (SharedState, SharedState) {
    let bus = Arc::new(LocalBus::default());
    let authority = AppState::with_collaborators(config(), bus.clone(), None);
    let replica = AppState::with_collaborators(
        SessionConfig {
            role: ProcessRole::Observer,
            ..config()
        },
        bus,
        None,
    );
    tokio::spawn(sync_gateway::run_consumer(authority.clone()));
    tokio::spawn(sync_gateway::run_consumer(replica.clone()));
    settle().await;
    (authority, replica)
}

#[tokio::test(start_paused = true)]
async fn replica_follows_the_round_and_its_leaderboard() {
    let (authority, replica) = pair().await;
    ready_room(&authority).await;
    let round_id = scored_round(&authority).await;
    settle().await;

    assert_eq!(
        replica
            .store()
            .read_room(ROOM, |room| (room.phase(), room.round_id()))
            .await,
        Some((RoomPhase::Playing, Some(round_id)))
    );

    sleep(config().broadcast_interval + Duration::from_millis(10)).await;
    let expected = room_controller::compute_leaderboard(&authority, ROOM)
        .await
        .unwrap();
    let mirrored = room_controller::compute_leaderboard(&replica, ROOM)
        .await
        .unwrap();
    assert_eq!(mirrored, expected);

    let mut observer = replica.hubs().subscribe(ROOM);
    room_controller::change_user_state(&authority, ROOM, A, UserGameState::FinishedPlaying)
        .await
        .unwrap();
    room_controller::change_user_state(&authority, ROOM, B, UserGameState::FinishedPlaying)
        .await
        .unwrap();

    let last = final_leaderboard(&mut observer).await;
    assert_eq!(ranking(&last), vec![B, A]);
    settle().await;
    assert_eq!(
        replica.store().read_room(ROOM, |room| room.phase()).await,
        Some(RoomPhase::Completed)
    );

    room_controller::close_room(&authority, ROOM).await;
    settle().await;
    assert!(!replica.store().contains(ROOM));
}

#[tokio::test(start_paused = true)]
async fn replica_observers_receive_an_authoritative_snapshot() {
    let (authority, replica) = pair().await;
    ready_room(&authority).await;
    let round_id = scored_round(&authority).await;
    settle().await;

    let (mut receiver, first) = observer_service::subscribe_observer(&replica, ROOM, 7)
        .await
        .unwrap();
    assert_eq!(first.round_id, Some(round_id));

    let snapshot = loop {
        if let ObserverEvent::Snapshot(snapshot) = next_event(&mut receiver).await {
            break snapshot;
        }
    };
    let expected = room_controller::compute_leaderboard(&authority, ROOM)
        .await
        .unwrap();
    assert_eq!(snapshot.round_id, Some(round_id));
    assert_eq!(snapshot.leaderboard, expected);
    assert_eq!(snapshot.players.len(), 2);
    assert_eq!(
        room_controller::compute_leaderboard(&replica, ROOM)
            .await
            .unwrap(),
        expected
    );
}

/// Authority already mid-round when the replica joins the bus.
async fn late_replica() -> (SharedState, SharedState, RoundId) {
    let bus = Arc::new(LocalBus::default());
    let authority = AppState::with_collaborators(config(), bus.clone(), None);
    tokio::spawn(sync_gateway::run_consumer(authority.clone()));
    ready_room(&authority).await;
    let round_id = scored_round(&authority).await;
    settle().await;

    let replica = AppState::with_collaborators(
        SessionConfig {
            role: ProcessRole::Observer,
            ..config()
        },
        bus,
        None,
    );
    tokio::spawn(sync_gateway::run_consumer(replica.clone()));
    settle().await;
    assert!(!replica.store().contains(ROOM));
    (authority, replica, round_id)
}

#[tokio::test(start_paused = true)]
async fn observers_of_a_late_replica_start_from_the_authoritative_snapshot() {
    let (authority, replica, round_id) = late_replica().await;

    let (_receiver, snapshot) = observer_service::subscribe_observer(&replica, ROOM, 7)
        .await
        .unwrap();
    let expected = room_controller::compute_leaderboard(&authority, ROOM)
        .await
        .unwrap();
    assert_eq!(snapshot.round_id, Some(round_id));
    assert_eq!(snapshot.phase, RoomPhase::Playing);
    assert_eq!(snapshot.leaderboard, expected);
    assert_eq!(snapshot.players.len(), 2);
    assert!(
        replica
            .store()
            .read_room(ROOM, |room| room.observers().contains(&7))
            .await
            .unwrap()
    );
}

#[tokio::test(start_paused = true)]
async fn a_late_replica_catches_up_from_the_next_leaderboard() {
    let (authority, replica, round_id) = late_replica().await;

    sleep(config().broadcast_interval * 5).await;
    assert_eq!(
        replica
            .store()
            .read_room(ROOM, |room| (room.phase(), room.round_id()))
            .await,
        Some((RoomPhase::Playing, Some(round_id)))
    );
    assert_eq!(
        room_controller::compute_leaderboard(&replica, ROOM)
            .await
            .unwrap(),
        room_controller::compute_leaderboard(&authority, ROOM)
            .await
            .unwrap()
    );

    let (_receiver, snapshot) = observer_service::subscribe_observer(&replica, ROOM, 7)
        .await
        .unwrap();
    assert_eq!(snapshot.round_id, Some(round_id));
}

#[tokio::test(start_paused = true)]
async fn replicas_report_rooms_nobody_owns() {
    let (_authority, replica) = pair().await;

    let err = observer_service::subscribe_observer(&replica, 99, 1)
        .await
        .unwrap_err();
    assert_eq!(err, SessionError::RoomNotFound(99));
    assert!(!replica.store().contains(99));
    assert_eq!(replica.hubs().subscriber_count(99), 0);
    assert!(!replica.hubs().release(99), "the waiting hub was already dropped");
}

#[tokio::test(start_paused = true)]
async fn duplicate_and_own_envelopes_are_no_ops() {
    let (authority, replica) = pair().await;
    ready_room(&authority).await;
    let round_id = scored_round(&authority).await;
    let end = room_controller::abort_round(&authority, ROOM).await.unwrap();
    settle().await;

    let version = replica
        .store()
        .read_room(ROOM, |room| room.version())
        .await
        .unwrap();
    let redelivered = SyncEnvelope {
        origin: authority.origin(),
        event: SyncEvent::RoundEnded {
            room_id: ROOM,
            round_id,
            outcome: end.outcome,
            final_update: end.final_update.clone(),
        },
    };
    sync_gateway::on_external_event(&replica, redelivered.clone()).await;
    sync_gateway::on_external_event(&replica, redelivered).await;

    let own = SyncEnvelope {
        origin: replica.origin(),
        event: SyncEvent::RoomClosed { room_id: ROOM },
    };
    sync_gateway::on_external_event(&replica, own).await;

    let (phase, after) = replica
        .store()
        .read_room(ROOM, |room| (room.phase(), room.version()))
        .await
        .unwrap();
    assert_eq!(phase, RoomPhase::Aborted);
    assert_eq!(after, version);
}

#[tokio::test(start_paused = true)]
async fn replicas_refuse_to_drive_rooms() {
    let (_authority, replica) = pair().await;
    assert!(room_controller::create_room(&replica, ROOM, A).await.is_err());
}

struct OfflineBus;

impl EventBus for OfflineBus {
    fn publish(&self, _envelope: SyncEnvelope) -> BoxFuture<'static, BusResult<()>> {
        Box::pin(async {
            Err(BusError::unavailable(
                "broker unreachable".into(),
                std::io::Error::other("connection refused"),
            ))
        })
    }

    fn subscribe(&self) -> BoxStream<'static, BusResult<SyncEnvelope>> {
        stream::empty().boxed()
    }
}

#[tokio::test(start_paused = true)]
async fn publish_failures_never_reach_gameplay() {
    let state = AppState::with_collaborators(config(), Arc::new(OfflineBus), None);
    ready_room(&state).await;
    scored_round(&state).await;
    room_controller::abort_round(&state, ROOM).await.unwrap();

    assert!(state.metrics().snapshot().sync_publish_failures >= 4);
    assert_eq!(
        state.store().read_room(ROOM, |room| room.phase()).await,
        Some(RoomPhase::Aborted)
    );
}
