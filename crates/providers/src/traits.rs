use cl_domain::chat::ChatMessage;
use cl_domain::error::Result;
use cl_domain::stream::{BoxStream, StreamEvent, Usage};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic chat completion request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// The conversation messages to send.
    pub messages: Vec<ChatMessage>,
    /// System prompt, prepended as the first message when present.
    pub system: Option<String>,
    /// Sampling temperature. `None` uses the provider default.
    pub temperature: Option<f32>,
    /// Maximum tokens in the response. `None` uses the provider default.
    pub max_tokens: Option<u32>,
}

/// A provider-agnostic chat completion response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub usage: Option<Usage>,
    /// The model that actually produced the response.
    pub model: String,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EmbeddingsRequest {
    pub input: Vec<String>,
    /// Model override. `None` uses the provider's embedding default.
    pub model: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EmbeddingsResponse {
    pub embeddings: Vec<Vec<f32>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Narrow adapter over a chat/completions endpoint.
///
/// The ReAct loop only needs text in and text-deltas out; tool calls ride
/// inside the text as tag-delimited content, so this trait deliberately
/// has no structured tool-call surface.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Non-streaming chat completion.
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse>;

    /// Streaming chat completion; yields token deltas then a `Done`.
    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>>;

    /// Embed a batch of texts (used by knowledge search).
    async fn embeddings(&self, req: EmbeddingsRequest) -> Result<EmbeddingsResponse>;

    /// Stable provider id (e.g. `"deepseek"`).
    fn provider_id(&self) -> &str;

    /// The default model this provider resolves to.
    fn model(&self) -> &str;
}
