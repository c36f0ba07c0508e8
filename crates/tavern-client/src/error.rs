//! Error types for the client.

use tavern_transport::TransportError;

/// Errors surfaced by client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The client has shut down and accepts no further work.
    #[error("client is shutting down")]
    Terminated,
}
