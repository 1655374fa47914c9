use std::sync::atomic::{AtomicU64, Ordering};

use crate::dto::stats::SessionCounters;

/// Process-wide counters for dropped data and isolated failures.
#[derive(Debug, Default)]
pub struct SessionMetrics {
    cleanup_failures: AtomicU64,
    cleanups_executed: AtomicU64,
    stale_frames: AtomicU64,
    stale_rounds: AtomicU64,
    sync_publish_failures: AtomicU64,
}

impl SessionMetrics {
    /// All counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// A cleanup left state in place.
    pub fn record_cleanup_failure(&self) {
        self.cleanup_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// A cleanup reclaimed state.
    pub fn record_cleanup_executed(&self) {
        self.cleanups_executed.fetch_add(1, Ordering::Relaxed);
    }

    /// A frame was rejected as stale.
    pub fn record_stale_frame(&self) {
        self.stale_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// A frame named a superseded round.
    pub fn record_stale_round(&self) {
        self.stale_rounds.fetch_add(1, Ordering::Relaxed);
    }

    /// A bus publish failed.
    pub fn record_sync_publish_failure(&self) {
        self.sync_publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy every counter.
    pub fn snapshot(&self) -> SessionCounters {
        SessionCounters {
            cleanup_failures: self.cleanup_failures.load(Ordering::Relaxed),
            cleanups_executed: self.cleanups_executed.load(Ordering::Relaxed),
            stale_frames: self.stale_frames.load(Ordering::Relaxed),
            stale_rounds: self.stale_rounds.load(Ordering::Relaxed),
            sync_publish_failures: self.sync_publish_failures.load(Ordering::Relaxed),
        }
    }
}
