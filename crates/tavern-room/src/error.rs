//! Error types for the room layer.

/// Errors that can occur during room operations.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// The room's command channel is closed — its actor is gone.
    #[error("room {0} is unavailable")]
    Unavailable(String),
}
