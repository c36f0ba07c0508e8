//! The command language clients speak, and the few server lines that
//! are structured rather than free text.
//!
//! The wire format is newline-delimited UTF-8. Keywords are
//! case-sensitive and space-separated; room names and message bodies are
//! rest-of-line, so they may contain spaces.

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Structured server markers
// ---------------------------------------------------------------------------

/// Prefix of the one line that carries the reconnection token.
///
/// Emitted exactly once, right after a successful fresh `LOGIN` or
/// `REGISTER`. Everything after the prefix is the opaque token.
pub const AUTH_TOKEN_PREFIX: &str = "AUTH_TOKEN ";

/// Prefix of the greeting sent after any successful authentication.
///
/// The client uses this to detect that an in-flight reconnection
/// completed even when no room membership was restored.
pub const WELCOME_PREFIX: &str = "Welcome ";

/// Prefix of the confirmation sent when a `RECONNECT` handoff restored
/// the previous session's room membership. The suffix is the room name.
pub const RECONNECTED_PREFIX: &str = "Reconnected to room: ";

// ---------------------------------------------------------------------------
// AuthRequest
// ---------------------------------------------------------------------------

/// The single line a client sends while in the authentication phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthRequest {
    /// `LOGIN <username> <password>` — verify against stored credentials.
    Login { username: String, password: String },
    /// `REGISTER <username> <password>` — create a new account.
    Register { username: String, password: String },
    /// `RECONNECT <token>` — resume a prior session without credentials.
    Reconnect { token: String },
}

impl AuthRequest {
    /// Parses an authentication line.
    ///
    /// The line is split into at most three fields, so passwords may
    /// contain spaces while usernames and tokens may not.
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidAuthFormat`] when the line matches
    /// none of the three accepted shapes.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let mut parts = line.splitn(3, ' ');
        let keyword = parts.next().unwrap_or_default();
        let first = parts.next();
        let second = parts.next();

        match (keyword, first, second) {
            ("RECONNECT", Some(token), None) => Ok(Self::Reconnect {
                token: token.to_string(),
            }),
            ("LOGIN", Some(username), Some(password)) => Ok(Self::Login {
                username: username.to_string(),
                password: password.to_string(),
            }),
            ("REGISTER", Some(username), Some(password)) => {
                Ok(Self::Register {
                    username: username.to_string(),
                    password: password.to_string(),
                })
            }
            _ => Err(ProtocolError::InvalidAuthFormat),
        }
    }
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// A command line from an authenticated client.
///
/// Parsing is infallible: anything unrecognized becomes
/// [`Command::Unknown`], which the server answers with an error line
/// while keeping the connection open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `JOIN <name>` — join (creating if needed) a plain room.
    Join(String),
    /// `LLM JOIN <name>` — open a fresh bot-backed room for that model.
    LlmJoin(String),
    /// `LIST` — list plain room names.
    List,
    /// `LLM LIST` — list models known to the external service.
    LlmList,
    /// `SEND <text>` — post to the current room.
    Send(String),
    /// `LEAVE` — leave the current room.
    Leave,
    /// `HELP` — static command listing.
    Help,
    /// `QUIT` — farewell and disconnect.
    Quit,
    /// Anything else, carried verbatim for the error response.
    Unknown(String),
}

impl Command {
    /// Parses one post-authentication command line.
    pub fn parse(line: &str) -> Self {
        if let Some(room) = line.strip_prefix("JOIN ") {
            return Self::Join(room.to_string());
        }
        if let Some(text) = line.strip_prefix("SEND ") {
            return Self::Send(text.to_string());
        }
        if let Some(rest) = line.strip_prefix("LLM ") {
            if rest == "LIST" {
                return Self::LlmList;
            }
            if let Some(model) = rest.strip_prefix("JOIN ") {
                return Self::LlmJoin(model.to_string());
            }
            return Self::Unknown(line.to_string());
        }
        match line {
            "LIST" => Self::List,
            "LEAVE" => Self::Leave,
            "HELP" => Self::Help,
            "QUIT" => Self::Quit,
            _ => Self::Unknown(line.to_string()),
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
