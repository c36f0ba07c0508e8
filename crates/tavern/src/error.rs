//! Unified server error type.

use tavern_llm::LlmError;
use tavern_room::RoomError;
use tavern_session::SessionError;
use tavern_transport::TransportError;

/// Top-level error for server construction and the accept loop.
///
/// Per-connection failures never surface here; a connection that errors
/// is torn down by its own task.
#[derive(Debug, thiserror::Error)]
pub enum TavernError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Room(#[from] RoomError),

    #[error(transparent)]
    Llm(#[from] LlmError),
}
