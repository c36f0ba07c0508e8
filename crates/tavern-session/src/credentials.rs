//! Credential store: a flat file of `username:hash` lines.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

/// Registered users and their password hashes, backed by a flat file.
///
/// The file holds one `username:hash` line per user. Hashes are
/// self-describing, so the colon after the username is the only
/// delimiter that matters; malformed lines are skipped on load. The
/// server keeps this store behind one async lock, which is what makes
/// the exists-check plus append of registration atomic.
pub struct CredentialStore {
    path: PathBuf,
    entries: HashMap<String, String>,
}

impl CredentialStore {
    /// Loads the store from `path`. A missing file yields an empty
    /// store; the file is created on first registration.
    pub async fn load(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut entries = HashMap::new();

        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                for line in contents.lines() {
                    let Some((username, hash)) = line.split_once(':') else {
                        tracing::warn!(path = %path.display(), "skipping malformed credential line");
                        continue;
                    };
                    entries.insert(username.to_string(), hash.to_string());
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "credential file absent, starting empty");
            }
            Err(e) => return Err(e),
        }

        tracing::info!(path = %path.display(), users = entries.len(), "credentials loaded");
        Ok(Self { path, entries })
    }

    /// Returns the stored password hash for `username`.
    pub fn lookup(&self, username: &str) -> Option<&str> {
        self.entries.get(username).map(String::as_str)
    }

    pub fn contains(&self, username: &str) -> bool {
        self.entries.contains_key(username)
    }

    /// Records a new user and appends the entry to the backing file.
    ///
    /// The caller must have checked [`CredentialStore::contains`] under
    /// the same lock that guards this call.
    pub async fn register(
        &mut self,
        username: &str,
        hash: &str,
    ) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(format!("{username}:{hash}\n").as_bytes())
            .await?;
        file.flush().await?;

        self.entries
            .insert(username.to_string(), hash.to_string());
        tracing::info!(username, "user registered");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =========================================================================
// Tests
// =========================================================================
