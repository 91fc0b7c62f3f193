//! Backend seam between the chat orchestrator and an inference server.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::session::Turn;

/// Text deltas of one reply in arrival order. Ends after the final delta, or after the first error.
pub type ChunkStream = BoxStream<'static, Result<String, LlmError>>;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("inference request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("inference api error: {0}")]
    Api(String),
    #[error("malformed inference response: {0}")]
    Malformed(String),
    #[error("inference stream ended before the reply was complete")]
    Incomplete,
}

/// One `{role, content}` entry of a chat request. Timestamps are not sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
}

impl From<&Turn> for ChatMessage {
    fn from(turn: &Turn) -> Self {
        Self {
            role: turn.role.as_str().to_string(),
            content: turn.content.clone(),
        }
    }
}

/// A locally installed model as reported by the inference server. The name is opaque.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// An inference server that can list its models and stream a chat reply.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Models available locally on the server.
    async fn list_models(&self) -> Result<Vec<ModelDescriptor>, LlmError>;

    /// Issue one streaming chat request. Errors before the first byte are returned here;
    /// errors after that arrive as the last item of the stream.
    async fn chat_stream(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<ChunkStream, LlmError>;
}
