use std::{sync::Arc, time::Duration};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::{StreamExt, stream::BoxStream};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::ProcessRole,
    dao::bus::{BusError, BusResult, EventBus},
    dto::{
        observer::{ObserverEvent, RoundEndedEvent, RoundStartedEvent, UserStateChangedEvent},
        snapshot::GameplaySnapshot,
        sync::{SyncEnvelope, SyncEvent},
    },
    services::room_controller,
    state::{
        SessionMetrics, SharedState,
        room::{ObserverId, RoomId},
    },
};

/// Minimum delay between two catch-up requests for the same room.
const RESYNC_INTERVAL: Duration = Duration::from_secs(1);

/// Publishing side of the cross-process channel.
pub struct SyncGateway {
    bus: Arc<dyn EventBus>,
    origin: Uuid,
    metrics: Arc<SessionMetrics>,
    resyncs: DashMap<RoomId, Instant>,
}

impl SyncGateway {
    /// Build a gateway publishing on `bus` under the process id `origin`.
    pub fn new(bus: Arc<dyn EventBus>, origin: Uuid, metrics: Arc<SessionMetrics>) -> Self {
        Self {
            bus,
            origin,
            metrics,
            resyncs: DashMap::new(),
        }
    }

    /// Id stamped on every envelope this process publishes.
    pub fn origin(&self) -> Uuid {
        self.origin
    }

    /// Whether a catch-up request for `room_id` may go out now. At most one
    /// is sent per [`RESYNC_INTERVAL`] until a snapshot arrives.
    fn claim_resync(&self, room_id: RoomId) -> bool {
        let now = Instant::now();
        match self.resyncs.entry(room_id) {
            Entry::Occupied(mut last) => {
                if now.duration_since(*last.get()) < RESYNC_INTERVAL {
                    return false;
                }
                last.insert(now);
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
            }
        }
        true
    }

    fn resynced(&self, room_id: RoomId) {
        self.resyncs.remove(&room_id);
    }

    /// Publish `event` to the bus. Failures are logged and counted, never returned:
    /// the next event or an explicit snapshot request reconciles the replica.
    pub async fn publish(&self, event: SyncEvent) {
        let kind = event.kind();
        let room_id = event.room_id();
        let envelope = SyncEnvelope {
            origin: self.origin,
            event,
        };
        match self.bus.publish(envelope).await {
            Ok(()) => debug!(room_id, kind, "published sync event"),
            Err(err) => {
                self.metrics.record_sync_publish_failure();
                warn!(room_id, kind, error = %err, "failed to publish sync event");
            }
        }
    }

    /// Stream of envelopes published by every process on the bus.
    pub fn subscribe(&self) -> BoxStream<'static, BusResult<SyncEnvelope>> {
        self.bus.subscribe()
    }
}

/// Point-in-time view of `room_id`, if it lives in this process.
pub async fn build_snapshot(state: &SharedState, room_id: RoomId) -> Option<GameplaySnapshot> {
    state.store().read_room(room_id, |room| room.snapshot()).await
}

/// Ask the authoritative process for a snapshot, on behalf of a new observer
/// or, without one, to catch up with a room.
pub async fn request_spectator_sync(
    state: &SharedState,
    room_id: RoomId,
    observer_id: Option<ObserverId>,
) {
    state
        .gateway()
        .publish(SyncEvent::SpectatorSyncRequested {
            room_id,
            observer_id,
        })
        .await;
}

/// Apply an envelope received from the bus.
///
/// Every application is idempotent so duplicate deliveries are harmless.
/// Envelopes this process published itself are ignored.
pub async fn on_external_event(state: &SharedState, envelope: SyncEnvelope) {
    if envelope.origin == state.origin() {
        return;
    }

    let event = envelope.event;
    debug!(room_id = event.room_id(), kind = event.kind(), origin = %envelope.origin, "received sync event");

    match state.role() {
        ProcessRole::Authoritative => apply_as_authority(state, event).await,
        ProcessRole::Observer => apply_as_replica(state, event).await,
    }
}

async fn apply_as_authority(state: &SharedState, event: SyncEvent) {
    match event {
        SyncEvent::SpectatorSyncRequested {
            room_id,
            observer_id,
        } => match build_snapshot(state, room_id).await {
            Some(snapshot) => {
                state
                    .gateway()
                    .publish(SyncEvent::SnapshotProvided {
                        room_id,
                        observer_id,
                        snapshot,
                    })
                    .await;
            }
            None => debug!(room_id, ?observer_id, "snapshot requested for unknown room"),
        },
        other => debug!(
            room_id = other.room_id(),
            kind = other.kind(),
            "authoritative process ignores replicated event"
        ),
    }
}

async fn apply_as_replica(state: &SharedState, event: SyncEvent) {
    let store = state.store();
    match event {
        SyncEvent::RoundStarted {
            room_id,
            round_id,
            host_id,
            participants,
        } => {
            let created = store.ensure_room(room_id, host_id);
            let applied = store
                .with_room(room_id, |room| {
                    room.apply_round_started(round_id, host_id, &participants)
                })
                .await
                .unwrap_or(false);
            if applied {
                state.cleanup().cancel_session(room_id);
                state.hubs().broadcast(
                    room_id,
                    ObserverEvent::RoundStarted(RoundStartedEvent {
                        round_id,
                        participants,
                    }),
                );
                info!(room_id, %round_id, "replicated round start");
            }
            if created {
                catch_up(state, room_id).await;
            }
        }
        SyncEvent::LeaderboardUpdated { update } => {
            let room_id = update.room_id;
            match store
                .with_room(room_id, |room| room.cache_remote_leaderboard(&update))
                .await
            {
                Ok(true) => {
                    state.publisher().relay(update);
                }
                Ok(false) => {}
                Err(_) => catch_up(state, room_id).await,
            }
        }
        SyncEvent::RoundEnded {
            room_id,
            round_id,
            outcome,
            final_update,
        } => {
            let Ok(ended) = store
                .with_room(room_id, |room| {
                    let ended = room.apply_round_ended(round_id, outcome);
                    room.cache_remote_leaderboard(&final_update);
                    ended
                })
                .await
            else {
                catch_up(state, room_id).await;
                return;
            };
            if ended {
                state.publisher().relay(final_update);
                state.hubs().broadcast(
                    room_id,
                    ObserverEvent::RoundEnded(RoundEndedEvent { round_id, outcome }),
                );
                state.cleanup().schedule_session(room_id, round_id);
                info!(room_id, %round_id, ?outcome, "replicated round end");
            }
        }
        SyncEvent::UserStateChanged {
            room_id,
            user_id,
            state: user_state,
        } => {
            let created = store.ensure_room(room_id, user_id);
            let changed = store
                .with_room(room_id, |room| room.apply_user_state(user_id, user_state))
                .await
                .unwrap_or(false);
            if changed {
                state.hubs().broadcast(
                    room_id,
                    ObserverEvent::UserStateChanged(UserStateChangedEvent {
                        user_id,
                        state: user_state,
                    }),
                );
            }
            if created {
                catch_up(state, room_id).await;
            }
        }
        SyncEvent::SnapshotProvided {
            room_id,
            observer_id,
            snapshot,
        } => {
            store.ensure_room(room_id, snapshot.host_id);
            state.gateway().resynced(room_id);
            let applied = store
                .with_room(room_id, |room| room.apply_snapshot(&snapshot))
                .await
                .unwrap_or(false);
            if applied {
                debug!(room_id, ?observer_id, sequence = snapshot.sequence, "applied remote snapshot");
                state
                    .hubs()
                    .broadcast(room_id, ObserverEvent::Snapshot(snapshot));
            }
        }
        SyncEvent::RoomClosed { room_id } => {
            state.gateway().resynced(room_id);
            room_controller::close_room(state, room_id).await;
        }
        SyncEvent::SpectatorSyncRequested { .. } => {}
    }
}

/// Replica: ask for a snapshot of a room whose earlier events never arrived.
async fn catch_up(state: &SharedState, room_id: RoomId) {
    if state.gateway().claim_resync(room_id) {
        debug!(room_id, "requesting snapshot of a room with missed events");
        request_spectator_sync(state, room_id, None).await;
    }
}

/// Drain the bus and apply every envelope until the bus shuts down.
pub async fn run_consumer(state: SharedState) {
    let mut envelopes = state.gateway().subscribe();
    info!(role = %state.role(), origin = %state.origin(), "sync consumer started");

    while let Some(received) = envelopes.next().await {
        match received {
            Ok(envelope) => on_external_event(&state, envelope).await,
            Err(BusError::Lagged(skipped)) => {
                warn!(skipped, "sync consumer lagged; waiting for the next event or snapshot")
            }
            Err(err) => warn!(error = %err, "dropping malformed sync envelope"),
        }
    }

    info!("sync consumer stopped");
}
