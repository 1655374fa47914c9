//! Real-time multiplayer session layer: live room state, score buffering,
//! leaderboards, observer snapshots, cleanup and cross-process sync.

/// Configuration loading.
pub mod config;
/// External collaborators: bus and archive.
pub mod dao;
/// Wire payloads.
pub mod dto;
/// Error types.
pub mod error;
/// HTTP routes.
pub mod routes;
/// Operations over the shared state.
pub mod services;
/// Rooms and the shared application state.
pub mod state;
