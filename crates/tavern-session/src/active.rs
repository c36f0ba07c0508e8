//! Tracks which usernames currently have a live connection.

use std::collections::HashSet;

/// The set of usernames with an open, authenticated connection.
///
/// A fresh LOGIN or REGISTER claims the username here and is refused if
/// it is already claimed; RECONNECT bypasses this set entirely because
/// it takes over the existing claim rather than adding one.
#[derive(Default)]
pub struct ActiveUsers {
    users: HashSet<String>,
}

impl ActiveUsers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `username`. Returns `false` if it was already active.
    pub fn claim(&mut self, username: &str) -> bool {
        self.users.insert(username.to_string())
    }

    /// Releases `username`. Returns whether it was claimed.
    pub fn release(&mut self, username: &str) -> bool {
        self.users.remove(username)
    }

    pub fn contains(&self, username: &str) -> bool {
        self.users.contains(username)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
