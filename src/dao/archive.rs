use std::error::Error;

use dashmap::DashMap;
use futures::future::BoxFuture;
use thiserror::Error;

use crate::state::{
    buffer::ScoreFrame,
    room::{RoomId, RoundId, UserId},
};

/// Result alias for archive operations.
pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Error raised by replay archives regardless of the underlying storage.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Replay storage could not be reached.
    #[error("archive unavailable: {message}")]
    Unavailable {
        /// What failed.
        message: String,
        /// Backend failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl ArchiveError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        ArchiveError::Unavailable {
            message,
            source: Box::new(source),
        }
    }
}

/// Buffers of one round handed over before session cleanup clears them.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundFrames {
    /// Room the round was played in.
    pub room_id: RoomId,
    /// Round whose frames are archived.
    pub round_id: RoundId,
    /// Buffered frames per player, oldest first.
    pub players: Vec<(UserId, Vec<ScoreFrame>)>,
}

/// Replay storage collaborator fed by the session cleanup.
pub trait FrameArchive: Send + Sync {
    /// Persist the frames of one ended round.
    fn store_round(&self, frames: RoundFrames) -> BoxFuture<'static, ArchiveResult<()>>;
}

/// In-memory archive keyed by round, used by tests and local runs.
#[derive(Debug, Default)]
pub struct MemoryArchive {
    rounds: DashMap<RoundId, RoundFrames>,
}

impl MemoryArchive {
    /// Empty archive.
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames stored for `round_id`, if any.
    pub fn round(&self, round_id: RoundId) -> Option<RoundFrames> {
        self.rounds.get(&round_id).map(|entry| entry.clone())
    }

    /// Number of archived rounds.
    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    /// Whether nothing was archived yet.
    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }
}

impl FrameArchive for MemoryArchive {
    fn store_round(&self, frames: RoundFrames) -> BoxFuture<'static, ArchiveResult<()>> {
        self.rounds.insert(frames.round_id, frames);
        Box::pin(async { Ok(()) })
    }
}
