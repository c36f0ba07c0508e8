//! Ollama provider: model listing and history-carrying chat sessions.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{ChatBackend, LlmError, LlmResult};

/// Per-request timeout for completions. Generation can be slow on
/// modest hardware, so this is deliberately generous.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// One `{role, content}` message in the chat history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    /// `"user"` or `"assistant"`.
    pub role: String,
    /// The message text.
    pub content: String,
}

impl ChatTurn {
    /// A turn spoken by the user.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// A turn spoken by the model.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatTurn,
}

#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<ModelTag>,
}

#[derive(Deserialize)]
struct ModelTag {
    name: String,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn trimmed_host(host: &str) -> &str {
    host.trim_end_matches('/')
}

/// Ollama reports pulled models as `name:tag`; a bare `name` means the
/// `latest` tag, so `mistral:latest` and `mistral` are the same model.
fn canonical_name(name: &str) -> &str {
    name.strip_suffix(":latest").unwrap_or(name)
}

async fn fetch_model_names(
    client: &reqwest::Client,
    host: &str,
) -> LlmResult<Vec<String>> {
    let url = format!("{}/api/tags", trimmed_host(host));
    let tags: TagsResponse = client
        .get(&url)
        .send()
        .await
        .map_err(LlmError::ServiceUnreachable)?
        .json()
        .await
        .map_err(LlmError::ServiceUnreachable)?;
    Ok(tags.models.into_iter().map(|m| m.name).collect())
}

/// Lists the models installed on the service at `host`, in the
/// service's own order.
pub async fn list_models(host: &str) -> LlmResult<Vec<String>> {
    let client = reqwest::Client::new();
    fetch_model_names(&client, host).await
}

// ---------------------------------------------------------------------------
// ChatSession
// ---------------------------------------------------------------------------

/// A chat bound to one model, carrying the full exchange history.
///
/// Construction verifies the model is installed; a bot-backed room that
/// cannot reach its model must fail before it ever accepts a member.
pub struct ChatSession {
    client: reqwest::Client,
    host: String,
    model: String,
    history: Vec<ChatTurn>,
}

impl ChatSession {
    /// Connects to the service and verifies `model` is installed.
    ///
    /// # Errors
    /// - [`LlmError::ModelUnavailable`] — the service answered but does
    ///   not have the model
    /// - [`LlmError::ServiceUnreachable`] — transport or decode failure
    pub async fn connect(host: &str, model: &str) -> LlmResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(LlmError::ServiceUnreachable)?;

        let installed = fetch_model_names(&client, host).await?;
        if !installed.iter().any(|n| canonical_name(n) == model) {
            return Err(LlmError::ModelUnavailable(model.to_string()));
        }

        tracing::debug!(model, host, "chat session ready");
        Ok(Self {
            client,
            host: trimmed_host(host).to_string(),
            model: model.to_string(),
            history: Vec::new(),
        })
    }

    /// The model this session is bound to.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// All turns exchanged so far, oldest first.
    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }
}

#[async_trait]
impl ChatBackend for ChatSession {
    async fn reply(&mut self, user_text: &str) -> LlmResult<String> {
        self.history.push(ChatTurn::user(user_text));

        let request = ChatRequest {
            model: &self.model,
            messages: &self.history,
            stream: false,
        };
        let response: ChatResponse = self
            .client
            .post(format!("{}/api/chat", self.host))
            .json(&request)
            .send()
            .await
            .map_err(LlmError::ServiceUnreachable)?
            .json()
            .await
            .map_err(LlmError::ServiceUnreachable)?;

        let reply = response.message.content;
        self.history.push(ChatTurn::assistant(reply.clone()));
        Ok(reply)
    }
}

// =========================================================================
// Tests
// =========================================================================
