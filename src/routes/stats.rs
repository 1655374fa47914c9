use axum::{Json, Router, extract::State, routing::get};

use crate::{dto::stats::CleanupStats, services::health_service, state::SharedState};

/// Pending cleanup work and session counters, for operational tooling.
pub async fn stats(State(state): State<SharedState>) -> Json<CleanupStats> {
    Json(health_service::cleanup_stats(&state).await)
}

/// Configure the observability endpoint.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/stats", get(stats))
}
