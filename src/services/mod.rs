/// Periodic leaderboard broadcasting.
pub mod broadcast;
/// Delayed, forced and immediate state reclamation.
pub mod cleanup;
/// Health and observability queries.
pub mod health_service;
/// Observer subscriptions and SSE streaming.
pub mod observer_service;
/// Room and round lifecycle orchestration.
pub mod room_controller;
/// Cross-process event publishing and application.
pub mod sync_gateway;
