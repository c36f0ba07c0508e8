//! Per-connection session handler.
//!
//! Each accepted connection runs this state machine in its own task:
//! authenticate (at most a few attempts), then serve commands until the
//! peer disconnects, goes idle, quits, or is superseded by a
//! reconnection. Teardown runs on every exit path and is idempotent.
//!
//! All outbound lines go through one unbounded channel drained by a
//! dedicated writer task, so room actors and this handler never contend
//! on the socket.

use std::sync::Arc;
use std::time::Duration;

use tavern_protocol::{AuthRequest, Command};
use tavern_room::{Member, RoomRegistry};
use tavern_session::SessionHandle;
use tavern_transport::{ConnectionId, LineConnection};
use tokio::sync::mpsc;

use crate::server::ServerState;

/// Why the command loop ended.
#[derive(Debug)]
enum Close {
    Quit,
    Disconnected,
    IdleTimeout,
    Superseded,
}

pub(crate) async fn handle_connection(
    state: Arc<ServerState>,
    conn: LineConnection,
) {
    let conn = Arc::new(conn);
    let conn_id = conn.id();
    let (out, mut out_rx) = mpsc::unbounded_channel::<String>();

    // Writer task: the single owner of the socket's write half. It
    // drains queued lines, then closes the connection once every sender
    // (handler, session registry entry, room membership) is gone.
    let writer_conn = Arc::clone(&conn);
    let writer = tokio::spawn(async move {
        while let Some(line) = out_rx.recv().await {
            if writer_conn.send_line(&line).await.is_err() {
                break;
            }
        }
        let _ = writer_conn.close().await;
    });

    if let Some((username, session)) =
        authenticate(&state, &conn, conn_id, &out).await
    {
        send(&out, format!("Welcome {username}!"));
        tracing::info!(%conn_id, %username, "authenticated");

        let ctx = SessionCtx {
            state: Arc::clone(&state),
            conn_id,
            username,
            session,
            out: out.clone(),
        };
        let reason = ctx.command_loop(&conn).await;
        tracing::info!(%conn_id, username = %ctx.username, ?reason, "session closed");
        ctx.cleanup().await;
    }

    drop(out);
    let _ = writer.await;
}

fn send(out: &mpsc::UnboundedSender<String>, line: impl Into<String>) {
    let _ = out.send(line.into());
}

/// Reads one line, bounded by the idle timeout.
///
/// Returns `None` on timeout, clean close, or transport error; the
/// caller treats all three as the end of the connection.
async fn read_line_idle(
    conn: &LineConnection,
    idle: Duration,
) -> Option<String> {
    match tokio::time::timeout(idle, conn.recv_line()).await {
        Ok(Ok(Some(line))) => Some(line),
        Ok(Ok(None)) | Ok(Err(_)) | Err(_) => None,
    }
}

// ---------------------------------------------------------------------------
// Authentication phase
// ---------------------------------------------------------------------------

/// Runs the bounded authentication loop.
///
/// Returns the username and registered session on success, `None` when
/// the peer vanished or ran out of attempts. Every failure names itself
/// to the client before the attempt counter line.
async fn authenticate(
    state: &ServerState,
    conn: &LineConnection,
    conn_id: ConnectionId,
    out: &mpsc::UnboundedSender<String>,
) -> Option<(String, SessionHandle)> {
    let max = state.config.max_auth_attempts;
    let mut attempts = 0u32;

    loop {
        send(
            out,
            "LOGIN <username> <password> or REGISTER <username> <password>",
        );
        let line =
            read_line_idle(conn, state.config.idle_timeout).await?;

        let outcome = match AuthRequest::parse(&line) {
            Ok(AuthRequest::Login { username, password }) => {
                try_login(state, &username, &password, conn_id, out).await
            }
            Ok(AuthRequest::Register { username, password }) => {
                try_register(state, &username, &password, conn_id, out)
                    .await
            }
            Ok(AuthRequest::Reconnect { token }) => {
                try_reconnect(state, &token, conn_id, out).await
            }
            Err(_) => {
                send(out, "Invalid authentication format");
                None
            }
        };

        if let Some(result) = outcome {
            return Some(result);
        }

        attempts += 1;
        send(out, format!("Authentication failed. Attempt {attempts} of {max}"));
        if attempts >= max {
            send(out, "Maximum authentication attempts reached. Disconnecting...");
            tracing::info!(%conn_id, attempts, "auth attempts exhausted");
            return None;
        }
    }
}

async fn try_login(
    state: &ServerState,
    username: &str,
    password: &str,
    conn_id: ConnectionId,
    out: &mpsc::UnboundedSender<String>,
) -> Option<(String, SessionHandle)> {
    let verified = {
        let credentials = state.credentials.lock().await;
        credentials
            .lookup(username)
            .is_some_and(|hash| state.hasher.verify(password, hash))
    };
    if !verified {
        send(out, "Invalid username or password");
        return None;
    }
    finish_fresh_auth(state, username, conn_id, out).await
}

async fn try_register(
    state: &ServerState,
    username: &str,
    password: &str,
    conn_id: ConnectionId,
    out: &mpsc::UnboundedSender<String>,
) -> Option<(String, SessionHandle)> {
    // Exists-check, hash, and file append form one critical section;
    // two concurrent REGISTERs for the same name serialize here and
    // exactly one wins.
    {
        let mut credentials = state.credentials.lock().await;
        if credentials.contains(username) {
            send(
                out,
                "Username already exists. Please choose a different username.",
            );
            return None;
        }
        let hash = match state.hasher.hash(password) {
            Ok(hash) => hash,
            Err(e) => {
                tracing::error!(%conn_id, error = %e, "password hashing failed");
                send(out, "Error saving credentials. Please try again.");
                return None;
            }
        };
        if let Err(e) = credentials.register(username, &hash).await {
            tracing::error!(%conn_id, error = %e, "credential persist failed");
            send(out, "Error saving credentials. Please try again.");
            return None;
        }
    }
    send(out, "Registration successful.");

    // A registered account whose username is already active still fails
    // the attempt; the account itself persists.
    finish_fresh_auth(state, username, conn_id, out).await
}

/// Shared tail of LOGIN and REGISTER: claim the username, install the
/// session, and hand out a reconnection token.
async fn finish_fresh_auth(
    state: &ServerState,
    username: &str,
    conn_id: ConnectionId,
    out: &mpsc::UnboundedSender<String>,
) -> Option<(String, SessionHandle)> {
    if !state.active.lock().await.claim(username) {
        send(out, "Error: Username already active.");
        return None;
    }

    let session = SessionHandle::new(conn_id, out.clone());
    state
        .sessions
        .lock()
        .await
        .insert(username, session.clone());
    let token = state.tokens.lock().await.issue(username);

    send(out, "Authentication successful.");
    send(out, format!("{}{token}", tavern_protocol::AUTH_TOKEN_PREFIX));
    Some((username.to_string(), session))
}

async fn try_reconnect(
    state: &ServerState,
    token: &str,
    conn_id: ConnectionId,
    out: &mpsc::UnboundedSender<String>,
) -> Option<(String, SessionHandle)> {
    let username = {
        let tokens = state.tokens.lock().await;
        tokens.resolve(token).map(str::to_string)
    };
    let Some(username) = username else {
        send(out, "Invalid or expired token. Please login with credentials.");
        return None;
    };

    // The whole handoff is one critical section under the session
    // registry lock: take over the room, kick the old connection, and
    // install the new entry before anyone else can observe the user.
    let mut sessions = state.sessions.lock().await;
    let session = SessionHandle::new(conn_id, out.clone());

    if let Some(old) = sessions.get(&username).cloned() {
        if let Some(room) = old.take_room() {
            let _ = room.remove_member(old.conn_id()).await;
            let _ = room
                .add_member(Member {
                    conn_id,
                    username: username.clone(),
                    sender: out.clone(),
                })
                .await;
            session.set_room(Some(room.clone()));
            send(
                out,
                format!(
                    "{}{}",
                    tavern_protocol::RECONNECTED_PREFIX,
                    room.name()
                ),
            );
            let _ = room
                .broadcast(format!("[{username} re-enters the room]"))
                .await;
        }
        old.kick();
        tracing::info!(
            %conn_id,
            old_conn_id = %old.conn_id(),
            %username,
            "session handed off"
        );
    }

    sessions.insert(&username, session.clone());
    Some((username, session))
}

// ---------------------------------------------------------------------------
// Command phase
// ---------------------------------------------------------------------------

struct SessionCtx {
    state: Arc<ServerState>,
    conn_id: ConnectionId,
    username: String,
    session: SessionHandle,
    out: mpsc::UnboundedSender<String>,
}

impl SessionCtx {
    fn send(&self, line: impl Into<String>) {
        send(&self.out, line);
    }

    async fn command_loop(&self, conn: &LineConnection) -> Close {
        loop {
            let line = tokio::select! {
                _ = self.session.kicked() => return Close::Superseded,
                read = tokio::time::timeout(
                    self.state.config.idle_timeout,
                    conn.recv_line(),
                ) => match read {
                    Ok(Ok(Some(line))) => line,
                    Ok(Ok(None)) | Ok(Err(_)) => return Close::Disconnected,
                    Err(_) => return Close::IdleTimeout,
                },
            };

            tracing::debug!(
                conn_id = %self.conn_id,
                username = %self.username,
                %line,
                "command"
            );
            match Command::parse(&line) {
                Command::Join(room) => self.join_room(&room).await,
                Command::LlmJoin(model) => self.join_bot_room(&model).await,
                Command::List => self.list_rooms().await,
                Command::LlmList => self.list_models().await,
                Command::Send(text) => self.send_to_room(&text).await,
                Command::Leave => self.leave_room().await,
                Command::Help => self.show_help(),
                Command::Quit => {
                    self.send(format!("Goodbye {}!", self.username));
                    return Close::Quit;
                }
                Command::Unknown(raw) => self.send(format!(
                    "Unknown command: {raw}. Type HELP for a list of commands."
                )),
            }
        }
    }

    /// Leaves the current room, notifying it, if the session is in one.
    async fn depart_current_room(&self) {
        if let Some(room) = self.session.take_room() {
            let _ = room.remove_member(self.conn_id).await;
            let _ = room
                .broadcast(format!("[{} leaves the room]", self.username))
                .await;
            self.send(format!("Left room: {}", room.name()));
        }
    }

    fn member(&self) -> Member {
        Member {
            conn_id: self.conn_id,
            username: self.username.clone(),
            sender: self.out.clone(),
        }
    }

    async fn join_room(&self, name: &str) {
        let room = self.state.rooms.lock().await.get_or_create(name);
        self.depart_current_room().await;

        let _ = room.add_member(self.member()).await;
        self.session.set_room(Some(room.clone()));
        let _ = room
            .broadcast(format!("[{} enters the room]", self.username))
            .await;
        self.send(format!("Joined room: {name}"));
    }

    async fn join_bot_room(&self, model: &str) {
        // Create first: a failure must leave the current room membership
        // untouched.
        let room = match RoomRegistry::create_bot_room(
            &self.state.config.llm_host,
            model,
        )
        .await
        {
            Ok(room) => room,
            Err(e) => {
                self.send(format!("Error processing your request: {e}"));
                return;
            }
        };

        self.depart_current_room().await;
        let _ = room.add_member(self.member()).await;
        self.session.set_room(Some(room.clone()));
        self.send(format!("Joined chat with {}", room.name()));
    }

    async fn list_rooms(&self) {
        let names = self.state.rooms.lock().await.list();
        if names.is_empty() {
            self.send("No rooms available.");
        } else {
            self.send("Available rooms:");
            for name in names {
                self.send(format!("- {name}"));
            }
        }
    }

    async fn list_models(&self) {
        match tavern_llm::list_models(&self.state.config.llm_host).await {
            Ok(models) if models.is_empty() => {
                self.send("No models available.");
            }
            Ok(models) => {
                self.send("Available LLM models:");
                for model in models {
                    self.send(format!("- {model}"));
                }
            }
            Err(e) => self.send(format!("Failed to fetch models: {e}")),
        }
    }

    async fn send_to_room(&self, text: &str) {
        let Some(room) = self.session.room() else {
            self.send(
                "You are not in a room. Use JOIN <room_name> to join a room.",
            );
            return;
        };
        let _ = room.post(&self.username, text).await;
    }

    async fn leave_room(&self) {
        if self.session.room().is_some() {
            self.depart_current_room().await;
        } else {
            self.send("You are not in a room.");
        }
    }

    fn show_help(&self) {
        self.send("Available commands:");
        self.send("JOIN <room_name> - Join a room");
        self.send("LIST - List available rooms");
        self.send("LLM LIST - List available LLM rooms");
        self.send("LLM JOIN <llm_name> - Join a LLM room");
        self.send("SEND <message> - Send a message to the current room");
        self.send("LEAVE - Leave the current room");
        self.send("HELP - Show this help message");
        self.send("QUIT - Disconnect from the server");
    }

    /// Tears the session down. Safe to run from every exit path.
    ///
    /// Room removal runs unconditionally: it is keyed by connection id,
    /// so it can never evict a successor, and a superseded session may
    /// still hold a membership when its own JOIN raced the handoff's
    /// `take_room`. Leaving that membership behind would keep a clone of
    /// the outbound sender alive inside the room and the writer task
    /// would never close the socket. Only the departure broadcast and
    /// the active claim belong to the live session.
    async fn cleanup(&self) {
        let was_live = self
            .state
            .sessions
            .lock()
            .await
            .remove_if(&self.username, self.conn_id);

        if let Some(room) = self.session.take_room() {
            let _ = room.remove_member(self.conn_id).await;
            if was_live {
                let _ = room
                    .broadcast(format!("[{} leaves the room]", self.username))
                    .await;
            }
        }
        if was_live {
            self.state.active.lock().await.release(&self.username);
        }
    }
}
