use std::time::SystemTime;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// Health payload.
pub mod health;
/// Events streamed to observers.
pub mod observer;
/// Point-in-time room views.
pub mod snapshot;
/// SSE encoding.
pub mod sse;
/// Cleanup and counter statistics.
pub mod stats;
/// Cross-process events.
pub mod sync;

fn format_system_time(time: SystemTime) -> String {
    OffsetDateTime::from(time)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}
