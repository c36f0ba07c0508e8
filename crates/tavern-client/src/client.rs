//! The reconnecting client state machine.
//!
//! A background reader task drains server lines into an event channel
//! while the foreground feeds user commands in. When the connection
//! drops, a single reconnection procedure (guarded so concurrent
//! triggers collapse into one) redials with exponential backoff and
//! resumes the session with the held token, re-joining the previous
//! room once the server confirms.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tavern_protocol::{AUTH_TOKEN_PREFIX, RECONNECTED_PREFIX, WELCOME_PREFIX};
use tavern_transport::{LineConnection, TransportError};
use tokio::sync::{Mutex, Notify, mpsc};

use crate::{ClientConfig, ClientError};

/// A chat client that survives connection loss.
///
/// All server output and client status lines arrive as plain strings on
/// the event channel returned by [`ReconnectingClient::new`]; a binary
/// prints them, a test asserts on them.
#[derive(Clone)]
pub struct ReconnectingClient {
    shared: Arc<Shared>,
}

struct Shared {
    addr: String,
    config: ClientConfig,
    events: mpsc::UnboundedSender<String>,
    token: StdMutex<Option<String>>,
    current_room: StdMutex<Option<String>>,
    conn: Mutex<Option<Arc<LineConnection>>>,
    /// Collapses concurrent reconnection triggers into one procedure.
    reconnect_gate: Mutex<()>,
    reconnecting: AtomicBool,
    /// Set while a RECONNECT is in flight; gates the reader's echo
    /// suppression and its success detection.
    awaiting_auth: AtomicBool,
    should_exit: AtomicBool,
    exit: Notify,
}

impl ReconnectingClient {
    /// Creates a client for `addr` and returns it with the receiving
    /// end of its event channel. No connection is made yet.
    pub fn new(
        addr: impl Into<String>,
        config: ClientConfig,
    ) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            addr: addr.into(),
            config,
            events,
            token: StdMutex::new(None),
            current_room: StdMutex::new(None),
            conn: Mutex::new(None),
            reconnect_gate: Mutex::new(()),
            reconnecting: AtomicBool::new(false),
            awaiting_auth: AtomicBool::new(false),
            should_exit: AtomicBool::new(false),
            exit: Notify::new(),
        });
        (Self { shared }, events_rx)
    }

    /// Dials the server and starts the reader task.
    ///
    /// # Errors
    /// Fails when the server cannot be reached; the caller decides
    /// whether to retry.
    pub async fn connect(&self) -> Result<(), ClientError> {
        if self.shared.should_exit.load(Ordering::SeqCst) {
            return Err(ClientError::Terminated);
        }
        Shared::dial(&self.shared).await?;
        Ok(())
    }

    /// Feeds one line of user input through the client.
    pub async fn handle_command(&self, input: &str) {
        let shared = &self.shared;

        if input.eq_ignore_ascii_case("exit") {
            shared.terminate().await;
            return;
        }

        if input == "SIM" {
            shared.emit("Simulating a connection loss...");
            let conn = shared.conn.lock().await.clone();
            if let Some(conn) = conn {
                let _ = conn.close().await;
            }
            return;
        }

        // Track the room locally so it can be re-joined after a
        // reconnect; the server confirms separately.
        if let Some(room) = input.strip_prefix("JOIN ") {
            shared.set_room(Some(room.to_string()));
        } else if input == "LEAVE" {
            shared.set_room(None);
        }

        if shared.reconnecting.load(Ordering::SeqCst) {
            shared.emit("Cannot send command while reconnecting. Please wait...");
            return;
        }

        let conn = shared.conn.lock().await.clone();
        let sent = match conn {
            Some(conn) => conn.send_line(input).await.is_ok(),
            None => false,
        };
        if !sent {
            shared.emit("Not connected to server. Attempting to reconnect...");
            tokio::spawn(Shared::reconnect(Arc::clone(shared)));
        }
    }

    /// The held reconnection token, if the server has issued one.
    pub fn token(&self) -> Option<String> {
        self.shared.token.lock().map(|t| t.clone()).unwrap_or(None)
    }

    /// The room this client believes it is in.
    pub fn current_room(&self) -> Option<String> {
        self.shared
            .current_room
            .lock()
            .map(|r| r.clone())
            .unwrap_or(None)
    }

    pub fn is_exiting(&self) -> bool {
        self.shared.should_exit.load(Ordering::SeqCst)
    }

    /// Resolves once the client has shut down, whether by `exit`, by a
    /// reconnect with no token, or by exhausting its attempts.
    pub async fn exited(&self) {
        let notified = self.shared.exit.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.shared.should_exit.load(Ordering::SeqCst) {
            return;
        }
        notified.await;
    }
}

impl Shared {
    fn emit(&self, line: impl Into<String>) {
        let _ = self.events.send(line.into());
    }

    fn set_room(&self, room: Option<String>) {
        if let Ok(mut slot) = self.current_room.lock() {
            *slot = room;
        }
    }

    fn room(&self) -> Option<String> {
        self.current_room
            .lock()
            .map(|r| r.clone())
            .unwrap_or(None)
    }

    fn held_token(&self) -> Option<String> {
        self.token.lock().map(|t| t.clone()).unwrap_or(None)
    }

    async fn terminate(&self) {
        self.should_exit.store(true, Ordering::SeqCst);
        self.exit.notify_waiters();
        let conn = self.conn.lock().await.take();
        if let Some(conn) = conn {
            let _ = conn.close().await;
        }
    }

    /// Dials, installs the connection, starts its reader, and resumes
    /// the session when a token is held.
    async fn dial(shared: &Arc<Self>) -> Result<(), TransportError> {
        let conn = LineConnection::connect(&shared.addr).await?;
        *shared.conn.lock().await = Some(Arc::clone(&conn));
        tokio::spawn(Self::read_loop(
            Arc::clone(shared),
            Arc::clone(&conn),
        ));

        if let Some(token) = shared.held_token() {
            shared.awaiting_auth.store(true, Ordering::SeqCst);
            shared.emit("Reconnecting to server...");
            conn.send_line(&format!("RECONNECT {token}")).await?;
        } else {
            shared.emit("Connected to server!");
        }
        Ok(())
    }

    async fn read_loop(self: Arc<Self>, conn: Arc<LineConnection>) {
        loop {
            match conn.recv_line().await {
                Ok(Some(line)) => {
                    self.handle_server_line(&conn, &line).await;
                }
                Ok(None) | Err(_) => break,
            }
        }

        if self.should_exit.load(Ordering::SeqCst) {
            return;
        }
        // Only the reader of the *current* connection may trigger a
        // reconnect; readers of connections already replaced fall out
        // silently.
        let is_current = {
            let slot = self.conn.lock().await;
            slot.as_ref().is_some_and(|c| Arc::ptr_eq(c, &conn))
        };
        if is_current && !self.reconnecting.load(Ordering::SeqCst) {
            self.emit("Connection lost");
            tokio::spawn(Self::reconnect(Arc::clone(&self)));
        }
    }

    async fn handle_server_line(
        &self,
        conn: &Arc<LineConnection>,
        line: &str,
    ) {
        let awaiting = self.awaiting_auth.load(Ordering::SeqCst);

        // While our RECONNECT is in flight, the resumed session's auth
        // chatter would read like a prompt to the user; drop it.
        if awaiting
            && (line.contains("LOGIN")
                || line.contains("REGISTER")
                || line.contains("RECONNECT"))
        {
            return;
        }

        if let Some(token) = line.strip_prefix(AUTH_TOKEN_PREFIX) {
            if let Ok(mut slot) = self.token.lock() {
                *slot = Some(token.to_string());
            }
            self.emit("Server authentication token received");
            return;
        }

        if awaiting {
            if let Some(room) = line.strip_prefix(RECONNECTED_PREFIX) {
                self.awaiting_auth.store(false, Ordering::SeqCst);
                self.set_room(Some(room.to_string()));
                self.emit(format!("Successfully reconnected to {room}"));
                return;
            }
            if line.starts_with(WELCOME_PREFIX) {
                self.awaiting_auth.store(false, Ordering::SeqCst);
                self.emit("Successfully reconnected to server");
                // The server restored the identity but not a room; if
                // we were in one, rejoin it.
                if let Some(room) = self.room() {
                    if conn
                        .send_line(&format!("JOIN {room}"))
                        .await
                        .is_ok()
                    {
                        self.emit(format!("Rejoining room: {room}"));
                    }
                }
                return;
            }
        }

        self.emit(line.to_string());
    }

    /// The reconnection procedure: bounded attempts with doubling
    /// delays, cancelable by exit, one instance at a time.
    ///
    /// Returns a boxed future to break the opaque-type cycle
    /// (`reconnect` → `dial` → `read_loop` → `reconnect`) that
    /// otherwise prevents the compiler from proving `Send`.
    fn reconnect(self: Arc<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(self.reconnect_inner())
    }

    async fn reconnect_inner(self: Arc<Self>) {
        let _gate = self.reconnect_gate.lock().await;
        if self.reconnecting.swap(true, Ordering::SeqCst)
            || self.should_exit.load(Ordering::SeqCst)
        {
            return;
        }

        if self.held_token().is_none() {
            self.emit("No authentication token available. Please restart the client.");
            self.reconnecting.store(false, Ordering::SeqCst);
            self.terminate().await;
            return;
        }

        let max = self.config.max_attempts;
        for attempt in 1..=max {
            self.emit(format!("Attempting to reconnect... ({attempt}/{max})"));

            let delay = self.config.backoff_delay(attempt);
            tokio::select! {
                _ = self.exit.notified() => {
                    self.reconnecting.store(false, Ordering::SeqCst);
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            if self.should_exit.load(Ordering::SeqCst) {
                self.reconnecting.store(false, Ordering::SeqCst);
                return;
            }

            match Self::dial(&self).await {
                Ok(()) => {
                    self.reconnecting.store(false, Ordering::SeqCst);
                    tracing::info!(attempt, "reconnected");
                    return;
                }
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "reconnect attempt failed");
                    self.emit(format!("Reconnection failed: {e}"));
                }
            }
        }

        self.emit(format!("Failed to reconnect after {max} attempts."));
        self.reconnecting.store(false, Ordering::SeqCst);
        self.terminate().await;
    }
}
