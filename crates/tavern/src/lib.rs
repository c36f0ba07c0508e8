//! Tavern: a multi-room chat server with persistent, token-resumable
//! sessions.
//!
//! Clients authenticate with credentials or a previously issued
//! reconnection token, join named rooms (plain broadcast rooms or
//! fresh bot-backed chats), and exchange newline-delimited text. A
//! dropped connection can resume its identity and room membership by
//! presenting its token within the TTL; the stale connection is kicked
//! and the live one takes over in a single handoff.
//!
//! ```no_run
//! use tavern::{BcryptHasher, TavernServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tavern::TavernError> {
//!     let server = TavernServer::builder()
//!         .bind_addr("0.0.0.0:7000")
//!         .credentials_path("users.txt")
//!         .build(BcryptHasher::default())
//!         .await?;
//!     server.run().await
//! }
//! ```

mod error;
mod handler;
mod server;

pub use error::TavernError;
pub use server::{ServerConfig, TavernServer, TavernServerBuilder};

pub use tavern_session::{BcryptHasher, PasswordHasher};
