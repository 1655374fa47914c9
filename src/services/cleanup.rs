use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    dao::archive::{FrameArchive, RoundFrames},
    dto::stats::{CleanupStats, RoomCleanupStats},
    error::CleanupError,
    state::{
        GameplayStore, SessionMetrics,
        room::{RoomId, RoundId, UserId},
    },
};

/// Scope of a reclamation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupGranularity {
    /// One member of a room.
    User,
    /// Per-round state of a room.
    Session,
    /// The whole room.
    Room,
}

/// Lifecycle of a cleanup task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupTaskState {
    /// Waiting for its timer.
    Scheduled,
    /// Ran to completion.
    Fired,
    /// Superseded before running.
    Cancelled,
}

/// A pending or finished reclamation.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanupTask {
    /// Registry id.
    pub id: u64,
    /// Scope of the task.
    pub granularity: CleanupGranularity,
    /// Room the task reclaims.
    pub room_id: RoomId,
    /// Member, for user cleanups.
    pub user_id: Option<UserId>,
    /// Round, for session cleanups.
    pub round_id: Option<RoundId>,
    /// Whether this is the non-cancellable backstop of a session cleanup.
    pub forced: bool,
    /// When the task is due.
    pub fire_at: Instant,
    /// Lifecycle of the task.
    pub state: CleanupTaskState,
}

#[derive(Debug, Clone)]
struct SessionSlot {
    round_id: RoundId,
    task_id: u64,
    token: CancellationToken,
}

/// Schedules and runs user, session, and room reclamation.
///
/// Failures are logged and counted here; nothing is returned to the gameplay path.
#[derive(Clone)]
pub struct CleanupManager {
    store: Arc<GameplayStore>,
    archive: Option<Arc<dyn FrameArchive>>,
    metrics: Arc<SessionMetrics>,
    delay: Duration,
    forced_delay: Duration,
    next_id: Arc<AtomicU64>,
    tasks: Arc<DashMap<u64, CleanupTask>>,
    sessions: Arc<DashMap<RoomId, SessionSlot>>,
}

impl CleanupManager {
    /// Manager reclaiming rooms of `store`, archiving rounds to `archive` when set.
    pub fn new(
        store: Arc<GameplayStore>,
        archive: Option<Arc<dyn FrameArchive>>,
        metrics: Arc<SessionMetrics>,
        delay: Duration,
        forced_delay: Duration,
    ) -> Self {
        Self {
            store,
            archive,
            metrics,
            delay,
            forced_delay,
            next_id: Arc::new(AtomicU64::new(1)),
            tasks: Arc::new(DashMap::new()),
            sessions: Arc::new(DashMap::new()),
        }
    }

    fn track(
        &self,
        granularity: CleanupGranularity,
        room_id: RoomId,
        user_id: Option<UserId>,
        round_id: Option<RoundId>,
        forced: bool,
        after: Duration,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.tasks.insert(
            id,
            CleanupTask {
                id,
                granularity,
                room_id,
                user_id,
                round_id,
                forced,
                fire_at: Instant::now() + after,
                state: CleanupTaskState::Scheduled,
            },
        );
        id
    }

    /// Retire a tracked task. Finished tasks are dropped from the registry.
    fn finish(&self, id: u64, state: CleanupTaskState) {
        if let Some((_, mut task)) = self.tasks.remove(&id) {
            task.state = state;
            debug!(
                task_id = id,
                room_id = task.room_id,
                granularity = ?task.granularity,
                forced = task.forced,
                state = ?task.state,
                "cleanup task retired"
            );
        }
    }

    /// Schedule the delayed session cleanup of `round_id` and its forced backstop.
    ///
    /// Scheduling the same round twice is a no-op. Scheduling a newer round
    /// cancels the delayed cleanup of the older one. Returns the delayed task id.
    pub fn schedule_session(&self, room_id: RoomId, round_id: RoundId) -> Option<u64> {
        let token = CancellationToken::new();
        let task_id = match self.sessions.entry(room_id) {
            Entry::Occupied(slot) if slot.get().round_id == round_id => return None,
            Entry::Occupied(mut slot) => {
                let task_id = self.track(
                    CleanupGranularity::Session,
                    room_id,
                    None,
                    Some(round_id),
                    false,
                    self.delay,
                );
                let previous = slot.insert(SessionSlot {
                    round_id,
                    task_id,
                    token: token.clone(),
                });
                previous.token.cancel();
                self.finish(previous.task_id, CleanupTaskState::Cancelled);
                task_id
            }
            Entry::Vacant(slot) => {
                let task_id = self.track(
                    CleanupGranularity::Session,
                    room_id,
                    None,
                    Some(round_id),
                    false,
                    self.delay,
                );
                slot.insert(SessionSlot {
                    round_id,
                    task_id,
                    token: token.clone(),
                });
                task_id
            }
        };

        let manager = self.clone();
        let delay = self.delay;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(room_id, %round_id, "session cleanup cancelled");
                }
                _ = sleep(delay) => {
                    manager.run_session_cleanup(room_id, round_id, task_id, &token).await;
                }
            }
        });

        let forced_id = self.track(
            CleanupGranularity::Session,
            room_id,
            None,
            Some(round_id),
            true,
            self.forced_delay,
        );
        let manager = self.clone();
        let forced_delay = self.forced_delay;
        tokio::spawn(async move {
            sleep(forced_delay).await;
            manager.run_forced_cleanup(room_id, round_id, forced_id).await;
        });

        debug!(
            room_id,
            %round_id,
            delay_ms = self.delay.as_millis() as u64,
            forced_delay_ms = self.forced_delay.as_millis() as u64,
            "session cleanup scheduled"
        );
        Some(task_id)
    }

    /// Cancel the pending delayed session cleanup of `room_id`, if any.
    pub fn cancel_session(&self, room_id: RoomId) -> bool {
        match self.sessions.remove(&room_id) {
            Some((_, slot)) => {
                slot.token.cancel();
                self.finish(slot.task_id, CleanupTaskState::Cancelled);
                debug!(room_id, round_id = %slot.round_id, "session cleanup superseded");
                true
            }
            None => false,
        }
    }

    async fn run_session_cleanup(
        &self,
        room_id: RoomId,
        round_id: RoundId,
        task_id: u64,
        token: &CancellationToken,
    ) {
        if let Err(err) = self.archive_round(room_id, round_id).await {
            self.metrics.record_cleanup_failure();
            warn!(
                room_id,
                %round_id,
                error = %err,
                "session cleanup failed; leaving state to the forced cleanup"
            );
            self.release_slot(room_id, task_id);
            self.finish(task_id, CleanupTaskState::Fired);
            return;
        }

        if token.is_cancelled() {
            debug!(room_id, %round_id, "session cleanup superseded while archiving");
            return;
        }

        self.reset_round(room_id, round_id, false).await;
        self.release_slot(room_id, task_id);
        self.finish(task_id, CleanupTaskState::Fired);
    }

    async fn run_forced_cleanup(&self, room_id: RoomId, round_id: RoundId, task_id: u64) {
        self.reset_round(room_id, round_id, true).await;
        self.finish(task_id, CleanupTaskState::Fired);
    }

    async fn archive_round(&self, room_id: RoomId, round_id: RoundId) -> Result<(), CleanupError> {
        let Some(archive) = &self.archive else {
            return Ok(());
        };
        let players = self
            .store
            .read_room(room_id, |room| room.round_buffers(round_id))
            .await
            .unwrap_or_default();
        if players.is_empty() {
            return Ok(());
        }

        archive
            .store_round(RoundFrames {
                room_id,
                round_id,
                players,
            })
            .await
            .map_err(|source| CleanupError::Archive { room_id, source })
    }

    async fn reset_round(&self, room_id: RoomId, round_id: RoundId, forced: bool) {
        match self
            .store
            .with_room(room_id, |room| room.reset_session(round_id))
            .await
        {
            Ok(Some(frames)) => {
                self.metrics.record_cleanup_executed();
                if forced {
                    warn!(room_id, %round_id, frames, "forced cleanup reclaimed a session");
                } else {
                    info!(room_id, %round_id, frames, "session cleaned up");
                }
            }
            Ok(None) => debug!(room_id, %round_id, forced, "session already clean"),
            Err(err) => debug!(room_id, %round_id, forced, error = %err, "session cleanup skipped"),
        }
    }

    fn release_slot(&self, room_id: RoomId, task_id: u64) {
        self.sessions
            .remove_if(&room_id, |_, slot| slot.task_id == task_id);
    }

    /// Reset one member to `NotReady` with an empty buffer. Idempotent.
    pub async fn cleanup_user(&self, room_id: RoomId, user_id: UserId) -> usize {
        let task_id = self.track(
            CleanupGranularity::User,
            room_id,
            Some(user_id),
            None,
            false,
            Duration::ZERO,
        );
        let frames = match self
            .store
            .with_room(room_id, |room| room.reset_user(user_id))
            .await
        {
            Ok(Ok(frames)) => {
                self.count_user_reset(room_id, user_id, frames);
                frames
            }
            Ok(Err(err)) | Err(err) => {
                debug!(room_id, user_id, error = %err, "user cleanup skipped");
                0
            }
        };
        self.finish(task_id, CleanupTaskState::Fired);
        frames
    }

    /// Account for a user reset the caller already applied under the room lock.
    pub fn record_user_reset(&self, room_id: RoomId, user_id: UserId, frames: usize) {
        let task_id = self.track(
            CleanupGranularity::User,
            room_id,
            Some(user_id),
            None,
            false,
            Duration::ZERO,
        );
        self.count_user_reset(room_id, user_id, frames);
        self.finish(task_id, CleanupTaskState::Fired);
    }

    fn count_user_reset(&self, room_id: RoomId, user_id: UserId, frames: usize) {
        if frames > 0 {
            self.metrics.record_cleanup_executed();
        }
        debug!(room_id, user_id, frames, "user cleaned up");
    }

    /// Tear the room down and release its entry. Supersedes any pending
    /// session cleanup. Returns `false` when the room was already gone.
    pub async fn cleanup_room(&self, room_id: RoomId) -> bool {
        self.cancel_session(room_id);
        let task_id = self.track(
            CleanupGranularity::Room,
            room_id,
            None,
            None,
            false,
            Duration::ZERO,
        );

        let released = match self.store.with_room(room_id, |room| room.close()).await {
            Ok(frames) if self.store.remove_room(room_id) => {
                self.metrics.record_cleanup_executed();
                self.retire_room_tasks(room_id, task_id);
                info!(room_id, frames, "room cleaned up");
                true
            }
            _ => {
                debug!(room_id, "room already released");
                false
            }
        };
        self.finish(task_id, CleanupTaskState::Fired);
        released
    }

    /// Forced cleanups of a released room have nothing left to reclaim; stop
    /// reporting them as pending. Their timers still fire and find no room.
    fn retire_room_tasks(&self, room_id: RoomId, keep: u64) {
        let superseded: Vec<u64> = self
            .tasks
            .iter()
            .filter(|task| task.room_id == room_id && task.id != keep)
            .map(|task| task.id)
            .collect();
        for id in superseded {
            self.finish(id, CleanupTaskState::Cancelled);
        }
    }

    /// Tracked task, while it is still scheduled.
    pub fn task(&self, id: u64) -> Option<CleanupTask> {
        self.tasks.get(&id).map(|task| task.clone())
    }

    /// Number of tasks still scheduled.
    pub fn active_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Observability view over pending cleanup work.
    pub async fn stats(&self) -> CleanupStats {
        let mut per_room: BTreeMap<RoomId, usize> = BTreeMap::new();
        for task in self.tasks.iter() {
            *per_room.entry(task.room_id).or_default() += 1;
        }

        let mut stats = CleanupStats {
            active_cleanup_tasks: self.tasks.len(),
            counters: self.metrics.snapshot(),
            ..CleanupStats::default()
        };
        for (room_id, active_cleanup_tasks) in per_room {
            let buffered_frames = self
                .store
                .read_room(room_id, |room| room.buffered_frames())
                .await
                .unwrap_or(0);
            stats.pending_frames += buffered_frames;
            stats.rooms_with_pending_cleanup.push(room_id);
            stats.per_room.push(RoomCleanupStats {
                room_id,
                active_cleanup_tasks,
                buffered_frames,
            });
        }
        stats
    }
}
