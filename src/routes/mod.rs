use axum::Router;

use crate::state::SharedState;

/// Health endpoint.
pub mod health;
/// Observer SSE endpoint.
pub mod observe;
/// Statistics endpoint.
pub mod stats;

/// Compose all route trees, wiring in shared state.
pub fn router(state: SharedState) -> Router<()> {
    health::router()
        .merge(stats::router())
        .merge(observe::router())
        .with_state(state)
}
