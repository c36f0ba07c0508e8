//! External chat-completion collaborator for Tavern's bot-backed rooms.
//!
//! Talks to an Ollama-compatible HTTP service:
//!
//! - `GET /api/tags` — which models are installed ([`list_models`],
//!   availability check at session construction)
//! - `POST /api/chat` — one completion over the accumulated exchange
//!   history ([`ChatSession`])
//!
//! Rooms depend only on the [`ChatBackend`] trait, so tests can swap in
//! a scripted backend without a running service.

mod ollama;

pub use ollama::{ChatSession, ChatTurn, list_models};

use async_trait::async_trait;

/// Result type for chat-completion operations.
pub type LlmResult<T> = Result<T, LlmError>;

/// Errors that can occur while talking to the chat-completion service.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// The requested model is not installed on the service.
    #[error("model {0} is not installed")]
    ModelUnavailable(String),

    /// The service could not be reached or answered malformed data.
    #[error("chat service unreachable: {0}")]
    ServiceUnreachable(#[source] reqwest::Error),
}

/// One conversational turn: the caller supplies the user's text, the
/// backend returns the assistant's reply and remembers both for the
/// next call.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Produces the reply to `user_text`, given all prior turns.
    async fn reply(&mut self, user_text: &str) -> LlmResult<String>;
}
