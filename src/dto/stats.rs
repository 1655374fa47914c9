use serde::Serialize;

use crate::state::room::RoomId;

/// Observability view over pending reclamation work, served by `/stats`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanupStats {
    /// Cleanup tasks still scheduled across every room.
    pub active_cleanup_tasks: usize,
    /// Frames buffered in rooms that await a cleanup.
    pub pending_frames: usize,
    /// Rooms with at least one scheduled cleanup task.
    pub rooms_with_pending_cleanup: Vec<RoomId>,
    /// Breakdown per room.
    pub per_room: Vec<RoomCleanupStats>,
    /// Process-wide counters.
    pub counters: SessionCounters,
}

/// Per-room slice of [`CleanupStats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomCleanupStats {
    /// Room with pending work.
    pub room_id: RoomId,
    /// Tasks scheduled for this room.
    pub active_cleanup_tasks: usize,
    /// Frames still buffered in this room.
    pub buffered_frames: usize,
}

/// Point-in-time copy of the session counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionCounters {
    /// Cleanups that failed and were left to the backstop.
    pub cleanup_failures: u64,
    /// Cleanups that reclaimed state.
    pub cleanups_executed: u64,
    /// Frames dropped as stale.
    pub stale_frames: u64,
    /// Frames dropped for a superseded round.
    pub stale_rounds: u64,
    /// Bus publishes that failed.
    pub sync_publish_failures: u64,
}
