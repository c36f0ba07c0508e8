//! Transport layer for Tavern: newline-framed text over TCP.
//!
//! The wire is plain line-delimited UTF-8. TLS wrapping is left to the
//! deployment (certificate and trust-store setup live outside this
//! codebase), so the transport here only deals with framing, connection
//! identity, and clean teardown.

mod error;
mod tcp;

pub use error::TransportError;
pub use tcp::{LineConnection, TcpTransport};

use std::fmt;

/// Opaque identifier for a connection.
///
/// Two sessions for the same username can briefly coexist during a
/// reconnection handoff; the connection id is what still tells them
/// apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}
