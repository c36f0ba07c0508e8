//! Server construction and the accept loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tavern_session::{
    ActiveUsers, CredentialStore, PasswordHasher, SessionRegistry,
    TokenStore,
};
use tavern_room::RoomRegistry;
use tavern_transport::TcpTransport;
use tokio::sync::Mutex;

use crate::TavernError;
use crate::handler::handle_connection;

/// Tunable server parameters.
///
/// Defaults match production behavior; tests shrink the durations so
/// time-dependent paths run without real waiting.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Read timeout after which an idle connection is dropped.
    pub idle_timeout: Duration,
    /// Authentication attempts before the server disconnects.
    pub max_auth_attempts: u32,
    /// Lifetime of issued reconnection tokens.
    pub token_ttl: Duration,
    /// How often expired tokens are swept.
    pub sweep_interval: Duration,
    /// Base URL of the chat-completion service.
    pub llm_host: String,
    /// Flat credential file, created on first registration.
    pub credentials_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(120),
            max_auth_attempts: 3,
            token_ttl: tavern_session::DEFAULT_TOKEN_TTL,
            sweep_interval: Duration::from_secs(360),
            llm_host: "http://localhost:11434".to_string(),
            credentials_path: PathBuf::from("users.txt"),
        }
    }
}

/// Shared state behind every connection task.
///
/// Each registry sits behind its own async lock. Cross-registry
/// critical sections (registration, the reconnection handoff) are
/// defined by the handler's lock acquisition order: credentials,
/// active, sessions, tokens, rooms — always in that order, never
/// holding two unless the operation requires it.
pub(crate) struct ServerState {
    pub(crate) config: ServerConfig,
    pub(crate) hasher: Box<dyn PasswordHasher>,
    pub(crate) credentials: Mutex<CredentialStore>,
    pub(crate) active: Mutex<ActiveUsers>,
    pub(crate) sessions: Mutex<SessionRegistry>,
    pub(crate) tokens: Mutex<TokenStore>,
    pub(crate) rooms: Mutex<RoomRegistry>,
}

/// Builder for [`TavernServer`].
pub struct TavernServerBuilder {
    bind_addr: String,
    config: ServerConfig,
}

impl TavernServerBuilder {
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:7000".to_string(),
            config: ServerConfig::default(),
        }
    }

    pub fn bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    pub fn credentials_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.credentials_path = path.into();
        self
    }

    pub fn llm_host(mut self, host: impl Into<String>) -> Self {
        self.config.llm_host = host.into();
        self
    }

    pub fn token_ttl(mut self, ttl: Duration) -> Self {
        self.config.token_ttl = ttl;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    pub fn max_auth_attempts(mut self, attempts: u32) -> Self {
        self.config.max_auth_attempts = attempts;
        self
    }

    /// Binds the listener and loads the credential file.
    ///
    /// # Errors
    /// Fails when the address cannot be bound or the credential file
    /// exists but cannot be read.
    pub async fn build<H: PasswordHasher>(
        self,
        hasher: H,
    ) -> Result<TavernServer, TavernError> {
        let transport = TcpTransport::bind(&self.bind_addr).await?;
        let credentials =
            CredentialStore::load(&self.config.credentials_path)
                .await
                .map_err(tavern_session::SessionError::from)?;

        let token_ttl = self.config.token_ttl;
        let state = Arc::new(ServerState {
            config: self.config,
            hasher: Box::new(hasher),
            credentials: Mutex::new(credentials),
            active: Mutex::new(ActiveUsers::new()),
            sessions: Mutex::new(SessionRegistry::new()),
            tokens: Mutex::new(TokenStore::with_ttl(token_ttl)),
            rooms: Mutex::new(RoomRegistry::new()),
        });

        Ok(TavernServer { transport, state })
    }
}

impl Default for TavernServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The chat server: accept loop plus one background token sweeper.
pub struct TavernServer {
    transport: TcpTransport,
    state: Arc<ServerState>,
}

impl TavernServer {
    pub fn builder() -> TavernServerBuilder {
        TavernServerBuilder::new()
    }

    /// The bound listen address, useful with a port of 0.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// Serves connections until the task is dropped.
    ///
    /// Spawns exactly one recurring sweep task for the server's
    /// lifetime, then accepts connections forever, one task each.
    pub async fn run(self) -> Result<(), TavernError> {
        let sweep_state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(sweep_state.config.sweep_interval);
            // The first tick completes immediately; skip it.
            interval.tick().await;
            loop {
                interval.tick().await;
                let removed = sweep_state.tokens.lock().await.sweep();
                tracing::debug!(removed, "token sweep completed");
            }
        });

        loop {
            let conn = self.transport.accept().await?;
            let state = Arc::clone(&self.state);
            tokio::spawn(handle_connection(state, conn));
        }
    }
}
