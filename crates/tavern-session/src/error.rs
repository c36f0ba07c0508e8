//! Error types for the session layer.

use std::io;

/// Errors that can occur during authentication and session management.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Username unknown or password mismatch.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Registration attempted with a username that already exists.
    #[error("username {0} is already registered")]
    UsernameTaken(String),

    /// The username already has a live connection.
    #[error("username {0} is already active")]
    AlreadyActive(String),

    /// Reconnection token unknown or past its TTL.
    #[error("invalid or expired token")]
    InvalidToken,

    /// Password hashing failed.
    #[error("password hashing failed: {0}")]
    Hash(String),

    /// The credential file could not be read or written.
    #[error("credential storage error")]
    Storage(#[from] io::Error),
}
