use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, Query, State},
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use serde::Deserialize;
use tracing::info;

use crate::{
    error::AppError,
    services::observer_service,
    state::{
        SharedState,
        room::{ObserverId, RoomId},
    },
};

#[derive(Debug, Deserialize)]
/// Query string of the observe endpoint.
pub struct ObserveQuery {
    /// Caller-chosen observer id; allocated by the server when omitted.
    pub observer_id: Option<ObserverId>,
}

/// Stream a room to a spectator: the snapshot first, then live events.
pub async fn observe_room(
    State(state): State<SharedState>,
    Path(room_id): Path<RoomId>,
    Query(query): Query<ObserveQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let observer_id = query
        .observer_id
        .unwrap_or_else(|| state.next_observer_id());
    let (receiver, snapshot) =
        observer_service::subscribe_observer(&state, room_id, observer_id).await?;
    info!(room_id, observer_id, "New observer SSE connection");
    Ok(observer_service::to_sse_stream(
        state,
        room_id,
        observer_id,
        snapshot,
        receiver,
    ))
}

/// Configure the observer endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/rooms/{room_id}/observe", get(observe_room))
}
