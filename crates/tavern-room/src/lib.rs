//! Room layer for Tavern.
//!
//! Each room is an isolated Tokio actor owning its ordered member list
//! and append-only message log; all mutation goes through the actor's
//! mailbox, which is what makes broadcast order identical for every
//! member of a room.
//!
//! # Key types
//!
//! - [`RoomRegistry`] — name → room, create-if-absent for plain rooms
//! - [`RoomHandle`] — send commands to a running room actor
//! - [`Member`] — a joined connection and its outbound line channel
//! - [`BOT_LABEL`] — the fixed identity bot replies are attributed to

mod error;
mod registry;
mod room;

pub use error::RoomError;
pub use registry::RoomRegistry;
pub use room::{BOT_LABEL, Member, RoomHandle, spawn_bot};
