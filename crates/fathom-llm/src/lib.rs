//! Chat-completions and embeddings clients.
//!
//! `ChatApi` / `EmbeddingsApi` are the seams the workers program against:
//! the Azure-style HTTP clients are the production path, `scripted` holds
//! the deterministic bindings the test suite drives turns with. Streaming
//! responses arrive as `StreamEvent`s over an mpsc channel; tool-call
//! deltas are reassembled with `ToolCallAccumulator`, which is keyed by
//! delta index because the call id can arrive several chunks late.

use async_trait::async_trait;
use tokio::sync::mpsc;

pub mod accumulate;
pub mod azure;
pub mod error;
pub mod scripted;
pub mod stream;
pub mod types;

pub use accumulate::ToolCallAccumulator;
pub use azure::{AzureChatClient, AzureEmbeddingsClient};
pub use error::LlmError;
pub use stream::StreamEvent;
pub use types::{ChatMessage, ChatRequest, ChatResponse, JsonSchemaFormat, ToolCall, ToolDefinition, Usage};

/// Chat-completions endpoint.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Streaming completion: deltas are emitted on `tx` in arrival order,
    /// ending with `StreamEvent::Done` (or `StreamEvent::Error`).
    async fn stream_chat(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), LlmError>;

    /// Non-streaming completion, used for title generation and the
    /// structured extraction calls.
    async fn complete(&self, req: &ChatRequest) -> Result<ChatResponse, LlmError>;
}

/// Batch embeddings endpoint.
#[async_trait]
pub trait EmbeddingsApi: Send + Sync {
    /// One fixed-dimension vector per input, in input order.
    async fn embed(&self, input: &[String]) -> Result<Vec<Vec<f32>>, LlmError>;
}
