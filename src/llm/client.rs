//! ChatClient trait definition

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{ChatRequest, ChatResponse, LlmError, StreamChunk};

/// Tool-aware chat client over an OpenAI-compatible endpoint
///
/// Implementations own retry, rate limiting and token accounting; callers
/// see either a complete response or a terminal error.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Send a request and wait for the complete response
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError>;

    /// Send a request, forwarding chunks as they arrive
    ///
    /// The returned response has the same shape as the non-streaming one,
    /// synthesized from the stream.
    async fn chat_stream(
        &self,
        request: ChatRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
    ) -> Result<ChatResponse, LlmError>;
}
