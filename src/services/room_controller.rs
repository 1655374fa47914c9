use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    config::ProcessRole,
    dto::{
        observer::{ObserverEvent, RoundEndedEvent, RoundStartedEvent, UserStateChangedEvent},
        sync::SyncEvent,
    },
    error::SessionError,
    services::broadcast::StopSignal,
    state::{
        SharedState,
        buffer::ScoreFrame,
        leaderboard::LeaderboardEntry,
        room::{Departure, Room, RoomId, RoundEnd, RoundId, RoundStart, UserGameState, UserId},
        state_machine::{RoomPhase, RoundOutcome},
    },
};

fn ensure_authoritative(state: &SharedState) -> Result<(), SessionError> {
    match state.role() {
        ProcessRole::Authoritative => Ok(()),
        ProcessRole::Observer => Err(SessionError::InvalidState(
            "rooms are driven by the authoritative process".into(),
        )),
    }
}

/// End the running round when no participant is still playing.
fn settle(room: &mut Room) -> Option<RoundEnd> {
    let outcome = room.pending_outcome()?;
    room.end_round(outcome).ok()
}

/// Register a new room whose first member is `host_id`.
pub async fn create_room(
    state: &SharedState,
    room_id: RoomId,
    host_id: UserId,
) -> Result<(), SessionError> {
    ensure_authoritative(state)?;
    state.store().create_room(room_id, host_id)?;
    info!(room_id, host_id, "room created");
    publish_user_state(state, room_id, host_id, UserGameState::NotReady).await;
    Ok(())
}

/// Add a member in `NotReady`. Returns `false` when already a member.
pub async fn join_room(
    state: &SharedState,
    room_id: RoomId,
    user_id: UserId,
) -> Result<bool, SessionError> {
    ensure_authoritative(state)?;
    let joined = state
        .store()
        .with_room(room_id, |room| room.add_member(user_id))
        .await??;
    if joined {
        info!(room_id, user_id, "user joined room");
        publish_user_state(state, room_id, user_id, UserGameState::NotReady).await;
    }
    Ok(joined)
}

/// Apply an inbound state change and end the round once every participant is done.
pub async fn change_user_state(
    state: &SharedState,
    room_id: RoomId,
    user_id: UserId,
    next: UserGameState,
) -> Result<(), SessionError> {
    ensure_authoritative(state)?;
    let (previous, end) = state
        .store()
        .with_room(room_id, |room| {
            let previous = room.set_user_state(user_id, next)?;
            let end = if previous.is_some() && next == UserGameState::FinishedPlaying {
                settle(room)
            } else {
                None
            };
            Ok::<_, SessionError>((previous, end))
        })
        .await??;

    if let Some(previous) = previous {
        debug!(room_id, user_id, ?previous, ?next, "user state changed");
        publish_user_state(state, room_id, user_id, next).await;
    }
    if let Some(end) = end {
        finish_round(state, room_id, end).await;
    }
    Ok(())
}

/// Start a round with every `Ready` member.
///
/// Starting from `Completed` or `Aborted` supersedes the pending session
/// cleanup: the previous round is reset inline first.
pub async fn start_round(state: &SharedState, room_id: RoomId) -> Result<RoundStart, SessionError> {
    ensure_authoritative(state)?;
    let round_id = Uuid::new_v4();
    let start = state
        .store()
        .with_room(room_id, |room| {
            if matches!(room.phase(), RoomPhase::Completed | RoomPhase::Aborted) {
                if !room.members().any(|m| m.state == UserGameState::Ready) {
                    return Err(SessionError::InvalidState("no member is ready".into()));
                }
                if let Some(previous) = room.round_id() {
                    room.reset_session(previous);
                }
            }
            room.start_round(round_id)
        })
        .await??;

    state.cleanup().cancel_session(room_id);
    state.scheduler().start(room_id, round_id);
    state.hubs().broadcast(
        room_id,
        ObserverEvent::RoundStarted(RoundStartedEvent {
            round_id,
            participants: start.participants.clone(),
        }),
    );
    state
        .gateway()
        .publish(SyncEvent::RoundStarted {
            room_id,
            round_id,
            host_id: start.host_id,
            participants: start.participants.clone(),
        })
        .await;
    info!(room_id, %round_id, participants = start.participants.len(), "round started");
    Ok(start)
}

/// Buffer a score frame. Stale frames and rounds are counted and reported.
pub async fn submit_score(
    state: &SharedState,
    room_id: RoomId,
    user_id: UserId,
    round_id: RoundId,
    frame: ScoreFrame,
) -> Result<(), SessionError> {
    let timestamp = frame.timestamp;
    let result = state
        .store()
        .with_room(room_id, |room| room.append_frame(user_id, round_id, frame))
        .await
        .and_then(|appended| appended);

    match &result {
        Ok(()) => {
            if state.config().push_on_score {
                state.scheduler().nudge(room_id);
            }
        }
        Err(SessionError::StaleFrame(_)) => {
            state.metrics().record_stale_frame();
            debug!(room_id, user_id, timestamp, "dropped stale frame");
        }
        Err(SessionError::StaleRound { .. }) => {
            state.metrics().record_stale_round();
            debug!(room_id, user_id, %round_id, "dropped frame for a superseded round");
        }
        Err(err) => debug!(room_id, user_id, error = %err, "rejected score frame"),
    }
    result
}

/// A player gives up mid-round: reset them, then re-evaluate the round.
pub async fn abort_gameplay(
    state: &SharedState,
    room_id: RoomId,
    user_id: UserId,
) -> Result<(), SessionError> {
    ensure_authoritative(state)?;
    let (frames, end) = state
        .store()
        .with_room(room_id, |room| {
            let frames = room.abandon_round(user_id)?;
            Ok::<_, SessionError>((frames, settle(room)))
        })
        .await??;

    state.cleanup().record_user_reset(room_id, user_id, frames);
    info!(room_id, user_id, frames, "user aborted gameplay");
    publish_user_state(state, room_id, user_id, UserGameState::NotReady).await;
    if let Some(end) = end {
        finish_round(state, room_id, end).await;
    }
    Ok(())
}

/// Remove a member. The host role moves on, and an empty room is closed.
pub async fn leave_room(
    state: &SharedState,
    room_id: RoomId,
    user_id: UserId,
) -> Result<Departure, SessionError> {
    ensure_authoritative(state)?;
    state.cleanup().cleanup_user(room_id, user_id).await;

    let (departure, end) = state
        .store()
        .with_room(room_id, |room| {
            let departure = room.remove_member(user_id)?;
            let end = if departure.now_empty {
                None
            } else {
                settle(room)
            };
            Ok::<_, SessionError>((departure, end))
        })
        .await??;
    info!(room_id, user_id, new_host = ?departure.new_host, "user left room");

    if let Some(end) = end {
        finish_round(state, room_id, end).await;
    }
    if departure.now_empty {
        close_room(state, room_id).await;
    }
    Ok(departure)
}

/// Host abort: end the running round as aborted.
pub async fn abort_round(state: &SharedState, room_id: RoomId) -> Result<RoundEnd, SessionError> {
    ensure_authoritative(state)?;
    let end = state
        .store()
        .with_room(room_id, |room| {
            if room.phase() != RoomPhase::Playing {
                return Err(SessionError::InvalidState(format!(
                    "no round is running in room `{room_id}`"
                )));
            }
            room.end_round(RoundOutcome::Aborted)
        })
        .await??;
    finish_round(state, room_id, end.clone()).await;
    Ok(end)
}

/// Tear the room down. Idempotent: returns `false` when it was already gone.
pub async fn close_room(state: &SharedState, room_id: RoomId) -> bool {
    if !state.store().contains(room_id) {
        return false;
    }
    state.scheduler().stop(room_id, StopSignal::Cancel).await;
    let released = state.cleanup().cleanup_room(room_id).await;
    if !released {
        return false;
    }

    state.publisher().forget(room_id);
    state.hubs().close(room_id, ObserverEvent::RoomClosed);
    if state.role() == ProcessRole::Authoritative {
        state
            .gateway()
            .publish(SyncEvent::RoomClosed { room_id })
            .await;
    }
    info!(room_id, "room closed");
    true
}

/// Current ranking of the room.
pub async fn compute_leaderboard(
    state: &SharedState,
    room_id: RoomId,
) -> Result<Vec<LeaderboardEntry>, SessionError> {
    state
        .store()
        .read_room(room_id, |room| room.leaderboard())
        .await
        .ok_or(SessionError::RoomNotFound(room_id))
}

/// Terminal broadcast, cleanup scheduling and sync for a round that just ended.
async fn finish_round(state: &SharedState, room_id: RoomId, end: RoundEnd) {
    let RoundEnd {
        round_id,
        outcome,
        final_update,
    } = end;

    state
        .scheduler()
        .stop(room_id, StopSignal::Final(final_update.clone()))
        .await;
    state.cleanup().schedule_session(room_id, round_id);
    state.hubs().broadcast(
        room_id,
        ObserverEvent::RoundEnded(RoundEndedEvent { round_id, outcome }),
    );
    state
        .gateway()
        .publish(SyncEvent::RoundEnded {
            room_id,
            round_id,
            outcome,
            final_update,
        })
        .await;
    info!(room_id, %round_id, ?outcome, "round ended");
}

async fn publish_user_state(
    state: &SharedState,
    room_id: RoomId,
    user_id: UserId,
    user_state: UserGameState,
) {
    state.hubs().broadcast(
        room_id,
        ObserverEvent::UserStateChanged(UserStateChangedEvent {
            user_id,
            state: user_state,
        }),
    );
    state
        .gateway()
        .publish(SyncEvent::UserStateChanged {
            room_id,
            user_id,
            state: user_state,
        })
        .await;
}
