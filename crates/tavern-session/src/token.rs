//! Reconnection tokens: opaque, random, and time-limited.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::Rng;

/// How long an issued token stays redeemable.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(1200);

/// Number of random bytes behind each token.
const TOKEN_BYTES: usize = 32;

struct TokenEntry {
    username: String,
    expires_at: Instant,
}

/// In-memory store of reconnection tokens.
///
/// Tokens are pure bearer capabilities: resolving one neither consumes
/// it nor extends its TTL, and a user may hold several live tokens at
/// once (one per successful authentication). Expired entries linger
/// until [`TokenStore::sweep`] runs, but [`TokenStore::resolve`] never
/// honors them.
pub struct TokenStore {
    tokens: HashMap<String, TokenEntry>,
    ttl: Duration,
}

impl TokenStore {
    /// Creates a store issuing tokens with the default TTL.
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TOKEN_TTL)
    }

    /// Creates a store issuing tokens with the given TTL.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            tokens: HashMap::new(),
            ttl,
        }
    }

    /// Issues a fresh token for `username`.
    ///
    /// Earlier tokens for the same user stay valid until they expire on
    /// their own.
    pub fn issue(&mut self, username: &str) -> String {
        let bytes: [u8; TOKEN_BYTES] = rand::rng().random();
        let token = STANDARD.encode(bytes);
        self.tokens.insert(
            token.clone(),
            TokenEntry {
                username: username.to_string(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        tracing::debug!(username, "token issued");
        token
    }

    /// Resolves a token to its username, if the token is live.
    pub fn resolve(&self, token: &str) -> Option<&str> {
        let entry = self.tokens.get(token)?;
        if Instant::now() < entry.expires_at {
            Some(&entry.username)
        } else {
            None
        }
    }

    /// Removes a token. Returns whether it was present.
    pub fn invalidate(&mut self, token: &str) -> bool {
        self.tokens.remove(token).is_some()
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn sweep(&mut self) -> usize {
        let now = Instant::now();
        let before = self.tokens.len();
        self.tokens.retain(|_, entry| now < entry.expires_at);
        let removed = before - self.tokens.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = self.tokens.len(), "token sweep");
        }
        removed
    }

    /// Returns the number of stored tokens, expired ones included.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Returns `true` if no token is stored.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new()
    }
}

// =========================================================================
// Tests
// =========================================================================
