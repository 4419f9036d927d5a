//! LLM provider adapters.
//!
//! One narrow, vendor-agnostic interface ([`LlmProvider`]) and one adapter
//! ([`OpenAiCompatProvider`]) that speaks the OpenAI chat-completions wire
//! format, which covers DeepSeek, OpenAI, DashScope, Ollama, vLLM and
//! every other compatible endpoint this backend talks to.

mod openai_compat;
mod registry;
mod sse;
mod traits;

pub use openai_compat::OpenAiCompatProvider;
pub use registry::ProviderRegistry;
pub use traits::{
    ChatRequest, ChatResponse, EmbeddingsRequest, EmbeddingsResponse, LlmProvider,
};

/// Map a reqwest error onto the shared error type, preserving the
/// timeout distinction (callers surface timeouts differently).
pub(crate) fn from_reqwest(e: reqwest::Error) -> cl_domain::error::Error {
    if e.is_timeout() {
        cl_domain::error::Error::Timeout(e.to_string())
    } else {
        cl_domain::error::Error::Http(e.to_string())
    }
}
