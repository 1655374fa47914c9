use serde::Serialize;

use crate::config::ProcessRole;

/// Simple health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Health status, always "ok" while the process serves requests.
    pub status: String,
    /// Whether this process owns rounds or mirrors them.
    pub role: ProcessRole,
    /// Number of live rooms.
    pub rooms: usize,
}

impl HealthResponse {
    /// Create a health response indicating the system is operational.
    pub fn ok(role: ProcessRole, rooms: usize) -> Self {
        Self {
            status: "ok".to_string(),
            role,
            rooms,
        }
    }
}
