//! Session layer for Tavern: who is connected, how they authenticate,
//! and the tokens that let a dropped connection resume its identity.
//!
//! # Key types
//!
//! - [`CredentialStore`] — registered users, persisted as a flat file
//! - [`PasswordHasher`] / [`BcryptHasher`] — password hashing seam
//! - [`TokenStore`] — time-limited reconnection tokens
//! - [`SessionRegistry`] — the one live session per username
//! - [`ActiveUsers`] — usernames with an open connection
//!
//! Each of these is a plain synchronous structure; the server wraps
//! every one in its own async lock and defines the cross-structure
//! critical sections (registration, reconnection handoff) itself.

mod active;
mod credentials;
mod error;
mod password;
mod registry;
mod token;

pub use active::ActiveUsers;
pub use credentials::CredentialStore;
pub use error::SessionError;
pub use password::{BcryptHasher, PasswordHasher};
pub use registry::{SessionHandle, SessionRegistry};
pub use token::{DEFAULT_TOKEN_TTL, TokenStore};
