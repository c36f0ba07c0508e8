//! Password hashing behind a trait seam.

use crate::SessionError;

/// Hashes and verifies passwords.
///
/// The server is generic over this so tests can drop the work factor
/// without touching production settings.
pub trait PasswordHasher: Send + Sync + 'static {
    /// Produces a self-describing hash of `password`.
    fn hash(&self, password: &str) -> Result<String, SessionError>;

    /// Checks `password` against a stored hash. A malformed hash
    /// verifies as `false` rather than erroring.
    fn verify(&self, password: &str, hash: &str) -> bool;
}

/// bcrypt-backed [`PasswordHasher`].
pub struct BcryptHasher {
    cost: u32,
}

impl BcryptHasher {
    /// The production work factor.
    pub const DEFAULT_COST: u32 = 10;

    pub fn new(cost: u32) -> Self {
        Self { cost }
    }
}

impl Default for BcryptHasher {
    fn default() -> Self {
        Self::new(Self::DEFAULT_COST)
    }
}

impl PasswordHasher for BcryptHasher {
    fn hash(&self, password: &str) -> Result<String, SessionError> {
        bcrypt::hash(password, self.cost)
            .map_err(|e| SessionError::Hash(e.to_string()))
    }

    fn verify(&self, password: &str, hash: &str) -> bool {
        bcrypt::verify(password, hash).unwrap_or(false)
    }
}
