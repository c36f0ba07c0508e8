//! Room registry: creates and tracks named rooms.

use std::collections::BTreeMap;

use tavern_llm::{ChatSession, LlmResult};

use crate::room::{spawn_bot, spawn_plain};
use crate::RoomHandle;

/// Tracks all plain rooms by name.
///
/// Plain rooms are created lazily on first join and live for the server
/// process lifetime. Bot-backed rooms are deliberately *not* tracked
/// here — see [`RoomRegistry::create_bot_room`].
pub struct RoomRegistry {
    rooms: BTreeMap<String, RoomHandle>,
}

impl RoomRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            rooms: BTreeMap::new(),
        }
    }

    /// Returns the room with this name, creating it if absent.
    pub fn get_or_create(&mut self, name: &str) -> RoomHandle {
        if let Some(handle) = self.rooms.get(name) {
            return handle.clone();
        }
        let handle = spawn_plain(name);
        self.rooms.insert(name.to_string(), handle.clone());
        tracing::info!(room = name, "room created");
        handle
    }

    /// Lists plain room names in sorted order.
    pub fn list(&self) -> Vec<String> {
        self.rooms.keys().cloned().collect()
    }

    /// Returns the number of plain rooms.
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Returns `true` if no plain room exists yet.
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Creates a fresh bot-backed room bound to `model`.
    ///
    /// Unlike plain rooms, bot rooms are not deduplicated: every call
    /// spawns a new room instance even for a model name used before.
    /// That mirrors the original system's observable behavior, surprising
    /// as it is, so two users joining the same model chat privately.
    ///
    /// # Errors
    /// Fails when the model is not installed or the service is
    /// unreachable; the caller's room state must stay untouched then.
    pub async fn create_bot_room(
        host: &str,
        model: &str,
    ) -> LlmResult<RoomHandle> {
        let session = ChatSession::connect(host, model).await?;
        tracing::info!(room = model, "bot room created");
        Ok(spawn_bot(model, Box::new(session)))
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// =========================================================================
// Tests
// =========================================================================
