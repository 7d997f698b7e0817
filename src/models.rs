use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::error::GatewayError;
use crate::prompt::Topic;

pub const DEFAULT_USER: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

// One web search result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    #[serde(default)]
    pub snippet: String,
    pub link: String,
}

fn default_user() -> String {
    DEFAULT_USER.to_string()
}

// Incoming chat turn
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default = "default_user")]
    pub user_id: String,
    // augment the prompt with web search results
    #[serde(default)]
    pub search: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub reply: String,
    pub topic: Topic,
    #[serde(default)]
    pub sources: Vec<SearchHit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConversationView {
    pub user_id: String,
    pub messages: Vec<ChatMessage>,
}

// Queued chat turn - request + channels back to the handler
pub struct ChatJob {
    pub request: ChatRequest,
    // Some(_) when the client wants fragments as they arrive
    pub fragments: Option<mpsc::UnboundedSender<String>>,
    pub response_tx: oneshot::Sender<Result<ChatReply, GatewayError>>,
}
