//! Session registry: the live connection behind each username.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tavern_room::RoomHandle;
use tavern_transport::ConnectionId;
use tokio::sync::{Notify, mpsc};

/// The per-connection state a session exposes to the rest of the server.
///
/// Cloning is cheap; every field is shared. Two handles for the same
/// username can exist briefly during a reconnection handoff, which is
/// why [`ConnectionId`] and not the username identifies a session.
#[derive(Clone)]
pub struct SessionHandle {
    conn_id: ConnectionId,
    outbound: mpsc::UnboundedSender<String>,
    current_room: Arc<Mutex<Option<RoomHandle>>>,
    kicked: Arc<Notify>,
}

impl SessionHandle {
    pub fn new(
        conn_id: ConnectionId,
        outbound: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            conn_id,
            outbound,
            current_room: Arc::new(Mutex::new(None)),
            kicked: Arc::new(Notify::new()),
        }
    }

    pub fn conn_id(&self) -> ConnectionId {
        self.conn_id
    }

    /// Queues a line for this session's writer task.
    pub fn send(&self, line: impl Into<String>) -> bool {
        self.outbound.send(line.into()).is_ok()
    }

    /// The room this session currently occupies, if any.
    pub fn room(&self) -> Option<RoomHandle> {
        self.room_slot().clone()
    }

    /// Replaces the current room, returning the previous one.
    pub fn set_room(&self, room: Option<RoomHandle>) -> Option<RoomHandle> {
        std::mem::replace(&mut *self.room_slot(), room)
    }

    /// Takes the current room, leaving the session roomless.
    ///
    /// A reconnection handoff takes the old session's room so that the
    /// old connection's cleanup finds nothing to leave.
    pub fn take_room(&self) -> Option<RoomHandle> {
        self.room_slot().take()
    }

    /// Signals the connection owning this session to terminate.
    pub fn kick(&self) {
        self.kicked.notify_one();
    }

    /// Resolves when [`SessionHandle::kick`] has been called.
    ///
    /// `Notify` stores a permit, so a kick issued before the first await
    /// is not lost.
    pub async fn kicked(&self) {
        self.kicked.notified().await;
    }

    fn room_slot(&self) -> std::sync::MutexGuard<'_, Option<RoomHandle>> {
        // The slot is held only for field access, never across await
        // points, so poisoning can only come from a panicking peek.
        self.current_room
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Maps usernames to their live session.
///
/// At most one entry per username. The server serializes all access
/// through a single async lock; the handoff critical section (swap the
/// entry, transfer the room) happens entirely under that lock.
pub struct SessionRegistry {
    sessions: HashMap<String, SessionHandle>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }

    /// Installs `handle` as the live session for `username`, returning
    /// the superseded session if one existed.
    pub fn insert(
        &mut self,
        username: &str,
        handle: SessionHandle,
    ) -> Option<SessionHandle> {
        self.sessions.insert(username.to_string(), handle)
    }

    pub fn get(&self, username: &str) -> Option<&SessionHandle> {
        self.sessions.get(username)
    }

    /// Removes the entry for `username` only if it still belongs to
    /// `conn_id`. Returns whether an entry was removed.
    ///
    /// Cleanup of a superseded connection must not evict the session
    /// that replaced it; the connection id check makes teardown
    /// idempotent under that race.
    pub fn remove_if(
        &mut self,
        username: &str,
        conn_id: ConnectionId,
    ) -> bool {
        match self.sessions.get(username) {
            Some(handle) if handle.conn_id() == conn_id => {
                self.sessions.remove(username);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// =========================================================================
// Tests
// =========================================================================
