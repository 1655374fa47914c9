use crate::{
    dto::{health::HealthResponse, stats::CleanupStats},
    state::SharedState,
};

/// Report liveness together with the process role and room count.
pub fn health_status(state: &SharedState) -> HealthResponse {
    HealthResponse::ok(state.role(), state.store().len())
}

/// Observability query over pending cleanup work and session counters.
pub async fn cleanup_stats(state: &SharedState) -> CleanupStats {
    state.cleanup().stats().await
}
