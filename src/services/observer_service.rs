use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::{
    sync::{
        broadcast::{self, error::RecvError},
        mpsc,
    },
    time::timeout,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::{
    config::ProcessRole,
    dto::{observer::ObserverEvent, snapshot::GameplaySnapshot},
    error::SessionError,
    services::sync_gateway,
    state::{
        SharedState,
        room::{ObserverId, RoomId},
    },
};

/// How long a replica waits for the authoritative snapshot of a room it has
/// not heard of yet.
const REMOTE_SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(5);

/// Subscribe an observer to a room.
///
/// The receiver is registered under the room lock before the snapshot is
/// captured, so nothing that happens after the snapshot is missed. On a
/// replica the authoritative process is also asked for a fresh snapshot,
/// delivered later on the receiver. A replica that does not know the room yet
/// waits for that snapshot before answering.
pub async fn subscribe_observer(
    state: &SharedState,
    room_id: RoomId,
    observer_id: ObserverId,
) -> Result<(broadcast::Receiver<ObserverEvent>, GameplaySnapshot), SessionError> {
    let replica = state.role() == ProcessRole::Observer;
    let mut synced = false;
    if !state.store().contains(room_id) {
        if !replica {
            return Err(SessionError::RoomNotFound(room_id));
        }
        await_remote_snapshot(state, room_id, observer_id).await?;
        synced = true;
    }

    let hubs = state.hubs();
    let (receiver, snapshot) = state
        .store()
        .with_room(room_id, |room| {
            room.add_observer(observer_id)?;
            Ok::<_, SessionError>((hubs.subscribe(room_id), room.snapshot()))
        })
        .await??;

    if replica && !synced {
        sync_gateway::request_spectator_sync(state, room_id, Some(observer_id)).await;
    }
    info!(room_id, observer_id, sequence = snapshot.sequence, "observer subscribed");
    Ok((receiver, snapshot))
}

/// Replica: ask the authoritative process for a room this process has not
/// heard of and wait until its snapshot has been applied.
async fn await_remote_snapshot(
    state: &SharedState,
    room_id: RoomId,
    observer_id: ObserverId,
) -> Result<(), SessionError> {
    let mut receiver = state.hubs().subscribe(room_id);
    sync_gateway::request_spectator_sync(state, room_id, Some(observer_id)).await;

    let applied = timeout(REMOTE_SNAPSHOT_TIMEOUT, async {
        loop {
            match receiver.recv().await {
                Ok(ObserverEvent::Snapshot(_)) => return true,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return false,
            }
        }
    })
    .await
    .unwrap_or(false);
    drop(receiver);

    if applied && state.store().contains(room_id) {
        debug!(room_id, observer_id, "room adopted from authoritative snapshot");
        return Ok(());
    }
    state.hubs().release(room_id);
    warn!(room_id, observer_id, "no authoritative snapshot for unknown room");
    Err(SessionError::RoomNotFound(room_id))
}

/// Forget an observer. Returns `false` when it was not subscribed.
pub async fn unsubscribe_observer(
    state: &SharedState,
    room_id: RoomId,
    observer_id: ObserverId,
) -> bool {
    let removed = state
        .store()
        .with_room(room_id, |room| room.remove_observer(observer_id))
        .await
        .unwrap_or(false);
    if removed {
        info!(room_id, observer_id, "observer unsubscribed");
    }
    removed
}

fn to_event(payload: &ObserverEvent) -> Option<Event> {
    match payload.to_server_event() {
        Ok(event) => Some(event.into_event()),
        Err(err) => {
            warn!(event = payload.name(), error = %err, "failed to serialise observer event");
            None
        }
    }
}

async fn forward(
    tx: &mpsc::Sender<Result<Event, Infallible>>,
    snapshot: GameplaySnapshot,
    receiver: &mut broadcast::Receiver<ObserverEvent>,
    room_id: RoomId,
    observer_id: ObserverId,
) {
    if let Some(event) = to_event(&ObserverEvent::Snapshot(snapshot))
        && tx.send(Ok(event)).await.is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            _ = tx.closed() => break,
            recv_result = receiver.recv() => {
                match recv_result {
                    Ok(payload) => {
                        let closing = payload == ObserverEvent::RoomClosed;
                        if let Some(event) = to_event(&payload)
                            && tx.send(Ok(event)).await.is_err()
                        {
                            break;
                        }
                        if closing {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => break,
                    Err(RecvError::Lagged(skipped)) => {
                        // The next leaderboard carries the full ranking again.
                        debug!(room_id, observer_id, skipped, "observer lagged");
                    }
                }
            }
        }
    }
}

/// Convert an observer subscription into an SSE response: the snapshot first,
/// then live events until the room closes or the client disconnects.
pub fn to_sse_stream(
    state: SharedState,
    room_id: RoomId,
    observer_id: ObserverId,
    snapshot: GameplaySnapshot,
    mut receiver: broadcast::Receiver<ObserverEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        forward(&tx, snapshot, &mut receiver, room_id, observer_id).await;
        unsubscribe_observer(&state, room_id, observer_id).await;
        info!(room_id, observer_id, "observer stream disconnected");
    });

    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
