use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;

use crate::{
    dao::archive::ArchiveError,
    state::{
        buffer::StaleFrame,
        room::{RoomId, RoundId, UserId},
        state_machine::InvalidTransition,
    },
};

/// Errors raised on the gameplay path. Always reported to the immediate caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Operation is not valid for the current room or round state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Data addressed to a round that is not the current one.
    #[error("stale round: expected {expected:?}, got {got}")]
    StaleRound {
        /// Round currently running, if any.
        expected: Option<RoundId>,
        /// Round the data was addressed to.
        got: RoundId,
    },
    /// Frame older than the newest buffered one.
    #[error(transparent)]
    StaleFrame(#[from] StaleFrame),
    /// No room with this id lives in the store.
    #[error("room `{0}` not found")]
    RoomNotFound(RoomId),
    /// User is not a member of the room.
    #[error("user `{user_id}` is not a member of room `{room_id}`")]
    NotMember {
        /// Room that was addressed.
        room_id: RoomId,
        /// User that was addressed.
        user_id: UserId,
    },
}

impl From<InvalidTransition> for SessionError {
    fn from(err: InvalidTransition) -> Self {
        SessionError::InvalidState(err.to_string())
    }
}

/// A reclamation step failed. Logged and counted, never escalated.
#[derive(Debug, Error)]
pub enum CleanupError {
    /// Round buffers could not be handed to the archive.
    #[error("failed to archive frames of room `{room_id}`")]
    Archive {
        /// Room being cleaned up.
        room_id: RoomId,
        /// Archive failure.
        #[source]
        source: ArchiveError,
    },
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::RoomNotFound(_) => AppError::NotFound(err.to_string()),
            SessionError::NotMember { .. } => AppError::BadRequest(err.to_string()),
            SessionError::InvalidState(_)
            | SessionError::StaleRound { .. }
            | SessionError::StaleFrame(_) => AppError::Conflict(err.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}
