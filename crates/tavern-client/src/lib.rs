//! Reconnecting chat client for Tavern.
//!
//! [`ReconnectingClient`] owns the connection and a held reconnection
//! token. User input goes in through
//! [`ReconnectingClient::handle_command`]; everything the user should
//! see, server lines and client status alike, comes out of one event
//! channel. When the link drops, the client redials on its own with
//! exponential backoff and resumes the session.

mod client;
mod config;
mod error;

pub use client::ReconnectingClient;
pub use config::ClientConfig;
pub use error::ClientError;
