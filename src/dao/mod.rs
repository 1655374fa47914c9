/// Replay archive collaborator fed by session cleanup.
pub mod archive;
/// Cross-process message bus abstraction.
pub mod bus;
/// In-process bus implementation.
pub mod local_bus;
