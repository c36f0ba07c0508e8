//! Room actor: an isolated Tokio task that owns one room.
//!
//! Each room runs in its own task and is reached only through an mpsc
//! channel, so the member list, the message log, and broadcast order
//! are all serialized by the actor's mailbox — no shared mutable state.
//!
//! Two variants share the contract: a plain room (pure broadcast + log)
//! and a bot-backed room, which additionally owns a [`ChatBackend`] and
//! answers every posted message with exactly one bot reply.

use std::sync::Arc;

use tavern_llm::ChatBackend;
use tavern_transport::ConnectionId;
use tokio::sync::{mpsc, oneshot};

use crate::RoomError;

/// The author label for replies from a bot-backed room's model.
pub const BOT_LABEL: &str = "Bot";

/// Command channel size for room actors.
const CHANNEL_SIZE: usize = 64;

/// A room member: who they are and how to reach their connection.
///
/// The sender feeds the member's per-connection writer task, so a slow
/// socket queues behind its own channel instead of stalling the room.
#[derive(Debug, Clone)]
pub struct Member {
    /// The member's connection, distinguishing old and new sessions of
    /// the same user during a reconnection handoff.
    pub conn_id: ConnectionId,
    /// The member's username, as shown in notices.
    pub username: String,
    /// Outbound line channel to the member's connection.
    pub sender: mpsc::UnboundedSender<String>,
}

/// Commands sent to a room actor through its channel.
enum RoomCommand {
    AddMember {
        member: Member,
        reply: oneshot::Sender<()>,
    },
    RemoveMember {
        conn_id: ConnectionId,
        reply: oneshot::Sender<bool>,
    },
    /// Deliver a raw line to every member (notices).
    Broadcast { text: String },
    /// Append an authored message to the log and deliver it; bot rooms
    /// then ask their backend for a reply.
    Post { author: String, text: String },
    /// Snapshot of member usernames, in join order.
    Members { reply: oneshot::Sender<Vec<String>> },
    /// Snapshot of the message log.
    Log { reply: oneshot::Sender<Vec<String>> },
}

/// Handle to a running room actor. Cheap to clone.
#[derive(Clone)]
pub struct RoomHandle {
    name: Arc<str>,
    sender: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    /// The room's name (for bot rooms, the model name).
    pub fn name(&self) -> &str {
        &self.name
    }

    fn unavailable(&self) -> RoomError {
        RoomError::Unavailable(self.name.to_string())
    }

    /// Adds a member; a member with the same connection is replaced.
    pub async fn add_member(&self, member: Member) -> Result<(), RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(RoomCommand::AddMember {
                member,
                reply: reply_tx,
            })
            .await
            .map_err(|_| self.unavailable())?;
        reply_rx.await.map_err(|_| self.unavailable())
    }

    /// Removes a member by connection. Returns whether it was present.
    pub async fn remove_member(
        &self,
        conn_id: ConnectionId,
    ) -> Result<bool, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(RoomCommand::RemoveMember {
                conn_id,
                reply: reply_tx,
            })
            .await
            .map_err(|_| self.unavailable())?;
        reply_rx.await.map_err(|_| self.unavailable())
    }

    /// Sends a notice line to every current member (fire-and-forget).
    pub async fn broadcast(
        &self,
        text: impl Into<String>,
    ) -> Result<(), RoomError> {
        self.sender
            .send(RoomCommand::Broadcast { text: text.into() })
            .await
            .map_err(|_| self.unavailable())
    }

    /// Posts an authored message (fire-and-forget). The room logs and
    /// delivers `"author: text"`; a bot-backed room then produces its
    /// reply before processing anything else.
    pub async fn post(
        &self,
        author: &str,
        text: &str,
    ) -> Result<(), RoomError> {
        self.sender
            .send(RoomCommand::Post {
                author: author.to_string(),
                text: text.to_string(),
            })
            .await
            .map_err(|_| self.unavailable())
    }

    /// Returns the current member usernames, in join order.
    pub async fn members(&self) -> Result<Vec<String>, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(RoomCommand::Members { reply: reply_tx })
            .await
            .map_err(|_| self.unavailable())?;
        reply_rx.await.map_err(|_| self.unavailable())
    }

    /// Returns the append-only message log.
    pub async fn log(&self) -> Result<Vec<String>, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(RoomCommand::Log { reply: reply_tx })
            .await
            .map_err(|_| self.unavailable())?;
        reply_rx.await.map_err(|_| self.unavailable())
    }
}

/// The internal room actor state. Runs inside a Tokio task.
struct RoomActor {
    name: Arc<str>,
    members: Vec<Member>,
    log: Vec<String>,
    bot: Option<Box<dyn ChatBackend>>,
    receiver: mpsc::Receiver<RoomCommand>,
}

impl RoomActor {
    async fn run(mut self) {
        tracing::info!(room = %self.name, bot = self.bot.is_some(), "room actor started");

        while let Some(cmd) = self.receiver.recv().await {
            match cmd {
                RoomCommand::AddMember { member, reply } => {
                    self.handle_add(member);
                    let _ = reply.send(());
                }
                RoomCommand::RemoveMember { conn_id, reply } => {
                    let removed = self.handle_remove(conn_id);
                    let _ = reply.send(removed);
                }
                RoomCommand::Broadcast { text } => self.deliver(&text),
                RoomCommand::Post { author, text } => {
                    self.handle_post(&author, &text).await;
                }
                RoomCommand::Members { reply } => {
                    let names = self
                        .members
                        .iter()
                        .map(|m| m.username.clone())
                        .collect();
                    let _ = reply.send(names);
                }
                RoomCommand::Log { reply } => {
                    let _ = reply.send(self.log.clone());
                }
            }
        }

        tracing::info!(room = %self.name, "room actor stopped");
    }

    fn handle_add(&mut self, member: Member) {
        // A rejoin on the same connection replaces the stale entry.
        self.members.retain(|m| m.conn_id != member.conn_id);
        tracing::info!(
            room = %self.name,
            conn_id = %member.conn_id,
            username = %member.username,
            members = self.members.len() + 1,
            "member joined"
        );
        self.members.push(member);
    }

    fn handle_remove(&mut self, conn_id: ConnectionId) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m.conn_id != conn_id);
        let removed = self.members.len() < before;
        if removed {
            tracing::info!(
                room = %self.name,
                %conn_id,
                members = self.members.len(),
                "member left"
            );
        }
        removed
    }

    /// Delivers a line to every member. A member whose channel is gone
    /// is logged and skipped; one dead connection never blocks the rest.
    fn deliver(&self, text: &str) {
        for member in &self.members {
            if member.sender.send(text.to_string()).is_err() {
                tracing::warn!(
                    room = %self.name,
                    username = %member.username,
                    "member unreachable, skipping delivery"
                );
            }
        }
    }

    async fn handle_post(&mut self, author: &str, text: &str) {
        let line = format!("{author}: {text}");
        self.log.push(line.clone());
        self.deliver(&line);

        // Bot rooms answer synchronously: the room processes nothing
        // else until the reply (or failure) has been delivered, which
        // keeps log order identical for every member.
        if let Some(bot) = self.bot.as_mut() {
            match bot.reply(text).await {
                Ok(reply) => {
                    let line = format!("{BOT_LABEL}: {reply}");
                    self.log.push(line.clone());
                    self.deliver(&line);
                }
                Err(e) => {
                    tracing::warn!(
                        room = %self.name,
                        error = %e,
                        "chat backend failed"
                    );
                    self.deliver(&format!("Error: {e}"));
                }
            }
        }
    }
}

fn spawn_room(
    name: &str,
    bot: Option<Box<dyn ChatBackend>>,
) -> RoomHandle {
    let (tx, rx) = mpsc::channel(CHANNEL_SIZE);
    let name: Arc<str> = Arc::from(name);

    let actor = RoomActor {
        name: Arc::clone(&name),
        members: Vec::new(),
        log: Vec::new(),
        bot,
        receiver: rx,
    };
    tokio::spawn(actor.run());

    RoomHandle { name, sender: tx }
}

/// Spawns a plain broadcast room.
pub(crate) fn spawn_plain(name: &str) -> RoomHandle {
    spawn_room(name, None)
}

/// Spawns a bot-backed room bound to the given backend.
///
/// [`RoomRegistry::create_bot_room`](crate::RoomRegistry::create_bot_room)
/// is the usual entry point; this constructor accepts any backend, so a
/// room can be driven by something other than a live model service.
pub fn spawn_bot(
    model: &str,
    backend: Box<dyn ChatBackend>,
) -> RoomHandle {
    spawn_room(model, Some(backend))
}
