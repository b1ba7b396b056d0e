use crate::stream::StreamEvent;
use crate::types::{ChatRequest, Conversation, ModelInfo};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Shown when a streaming request is attempted without a token.
pub const SESSION_MISSING: &str = "No session found. Please log in again.";
/// Shown when the backend rejects the token (401/403).
pub const SESSION_EXPIRED: &str = "Your session has expired or is invalid. Please log in again.";

/// The backend seam a [`ChatSession`](crate::session::ChatSession) talks to.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Stream one chat exchange. Every failure arrives on `tx` as a
    /// [`StreamEvent::Error`]; cancellation ends the stream silently.
    async fn stream_chat(
        &self,
        request: ChatRequest,
        tx: mpsc::UnboundedSender<StreamEvent>,
        cancel: CancellationToken,
    );

    /// Fetch a conversation with its messages.
    async fn load_conversation(&self, id: i64) -> Result<Conversation, ClientError>;

    /// The user's most recent conversations, newest first, without messages.
    async fn recent_conversations(&self) -> Result<Vec<Conversation>, ClientError>;

    async fn delete_conversation(&self, id: i64) -> Result<(), ClientError>;

    /// Models the picker can offer.
    async fn models(&self) -> Vec<ModelInfo>;
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Missing, expired or rejected credentials.
    #[error("{0}")]
    Auth(String),
    /// Non-success status; `message` is what the backend said.
    #[error("{message}")]
    Http { status: u16, message: String },
    #[error("Too Many Requests (HTTP 429)")]
    RateLimited { retry_after_ms: Option<u64> },
    #[error("Network error: {0}")]
    Network(String),
    #[error("No response body")]
    NoBody,
    /// The response body failed mid-read.
    #[error("{0}")]
    Stream(String),
    #[error("Invalid response: {0}")]
    Decode(String),
    #[error("Cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}
