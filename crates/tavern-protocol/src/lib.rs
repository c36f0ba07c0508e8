//! Wire protocol for Tavern.
//!
//! Tavern speaks a newline-delimited text protocol over an encrypted
//! stream (transport security is set up outside this crate). This crate
//! defines the "language" both sides share:
//!
//! - **Commands** ([`Command`], [`AuthRequest`]) — what clients send.
//! - **Markers** ([`AUTH_TOKEN_PREFIX`], [`WELCOME_PREFIX`],
//!   [`RECONNECTED_PREFIX`]) — the few server lines the client must
//!   recognize among otherwise free-text responses.
//! - **Errors** ([`ProtocolError`]) — malformed authentication lines.
//!
//! The protocol layer knows nothing about connections, rooms, or
//! sessions; it only turns lines into structured requests.

mod error;
mod types;

pub use error::ProtocolError;
pub use types::{
    AUTH_TOKEN_PREFIX, AuthRequest, Command, RECONNECTED_PREFIX,
    WELCOME_PREFIX,
};
