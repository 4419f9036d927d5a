//! OpenAI-compatible adapter.
//!
//! Works with DeepSeek, OpenAI, DashScope, Ollama, vLLM, LM Studio, and
//! any other endpoint that follows the OpenAI chat completions contract.

use crate::from_reqwest;
use crate::traits::{
    ChatRequest, ChatResponse, EmbeddingsRequest, EmbeddingsResponse, LlmProvider,
};
use cl_domain::chat::ChatMessage;
use cl_domain::config::{EmbeddingConfig, ProviderConfig};
use cl_domain::error::{Error, Result};
use cl_domain::stream::{BoxStream, StreamEvent, Usage};
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An LLM adapter for any OpenAI-compatible API endpoint.
pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    embedding_model: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a provider from the deserialized provider config.
    pub fn from_config(id: &str, cfg: &ProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: id.to_string(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.resolve_api_key(),
            model: cfg.model.clone(),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            embedding_model: "text-embedding-3-small".into(),
            client,
        })
    }

    /// Create a provider that only serves embeddings requests.
    pub fn embedding_from_config(cfg: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(from_reqwest)?;

        let api_key = if !cfg.api_key.is_empty() {
            cfg.api_key.clone()
        } else {
            cfg.api_key_env
                .as_deref()
                .and_then(|var| std::env::var(var).ok())
                .unwrap_or_default()
        };

        Ok(Self {
            id: "embedding".into(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: cfg.model.clone(),
            temperature: 0.0,
            max_tokens: 0,
            embedding_model: cfg.model.clone(),
            client,
        })
    }

    // ── Internal: build authenticated request builder ──────────────

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
    }

    fn build_chat_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let mut messages: Vec<Value> = Vec::with_capacity(req.messages.len() + 1);
        if let Some(system) = &req.system {
            messages.push(serde_json::json!({"role": "system", "content": system}));
        }
        messages.extend(req.messages.iter().map(msg_to_openai));

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": req.temperature.unwrap_or(self.temperature),
            "max_tokens": req.max_tokens.unwrap_or(self.max_tokens),
            "stream": stream,
        });
        if stream {
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }
        body
    }
}

fn msg_to_openai(msg: &ChatMessage) -> Value {
    serde_json::json!({
        "role": msg.role.as_str(),
        "content": msg.content,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_chat_response(provider: &str, body: &Value) -> Result<ChatResponse> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Provider {
            provider: provider.into(),
            message: "no choices in response".into(),
        })?;

    let content = choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let finish_reason = choice
        .get("finish_reason")
        .and_then(|v| v.as_str())
        .map(String::from);

    let model = body
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    let usage = body.get("usage").and_then(parse_openai_usage);

    Ok(ChatResponse {
        content,
        usage,
        model,
        finish_reason,
    })
}

fn parse_openai_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
        completion_tokens: v.get("completion_tokens")?.as_u64()? as u32,
        total_tokens: v.get("total_tokens")?.as_u64()? as u32,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE chunk parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse one `data:` payload into stream events, handling the `[DONE]`
/// sentinel, usage-only chunks, and content deltas.
fn parse_sse_data(data: &str) -> Vec<Result<StreamEvent>> {
    if data.trim() == "[DONE]" {
        return vec![Ok(StreamEvent::Done {
            usage: None,
            finish_reason: Some("stop".into()),
        })];
    }

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    let choice = v
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first());

    // Usage-only chunk (stream_options.include_usage).
    let Some(choice) = choice else {
        if let Some(usage) = v.get("usage").and_then(parse_openai_usage) {
            return vec![Ok(StreamEvent::Done {
                usage: Some(usage),
                finish_reason: None,
            })];
        }
        return Vec::new();
    };

    if let Some(fr) = choice.get("finish_reason").and_then(|f| f.as_str()) {
        let usage = v.get("usage").and_then(parse_openai_usage);
        return vec![Ok(StreamEvent::Done {
            usage,
            finish_reason: Some(fr.to_string()),
        })];
    }

    let delta = choice.get("delta").unwrap_or(&Value::Null);
    if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
        if !text.is_empty() {
            return vec![Ok(StreamEvent::Token {
                text: text.to_string(),
            })];
        }
    }

    Vec::new()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_chat_body(req, false);

        tracing::debug!(provider = %self.id, url = %url, "chat request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let resp_text = resp.text().await.map_err(from_reqwest)?;

        if !status.is_success() {
            return Err(Error::Provider {
                provider: self.id.clone(),
                message: format!("HTTP {} - {}", status.as_u16(), resp_text),
            });
        }

        let resp_json: Value = serde_json::from_str(&resp_text)?;
        parse_chat_response(&self.id, &resp_json)
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_chat_body(req, true);

        tracing::debug!(provider = %self.id, url = %url, "stream request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let err_text = resp.text().await.map_err(from_reqwest)?;
            return Err(Error::Provider {
                provider: self.id.clone(),
                message: format!("HTTP {} - {}", status.as_u16(), err_text),
            });
        }

        Ok(crate::sse::sse_response_stream(resp, parse_sse_data))
    }

    async fn embeddings(&self, req: EmbeddingsRequest) -> Result<EmbeddingsResponse> {
        let model = req.model.unwrap_or_else(|| self.embedding_model.clone());
        let url = format!("{}/embeddings", self.base_url);
        let body = serde_json::json!({ "model": model, "input": req.input });

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let resp_text = resp.text().await.map_err(from_reqwest)?;

        if !status.is_success() {
            return Err(Error::Provider {
                provider: self.id.clone(),
                message: format!("HTTP {} - {}", status.as_u16(), resp_text),
            });
        }

        let resp_json: Value = serde_json::from_str(&resp_text)?;
        let data = resp_json
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| Error::Provider {
                provider: self.id.clone(),
                message: "missing 'data' array in embeddings response".into(),
            })?;

        let embeddings: Vec<Vec<f32>> = data
            .iter()
            .filter_map(|item| {
                let embedding = item.get("embedding")?.as_array()?;
                Some(
                    embedding
                        .iter()
                        .filter_map(|v| v.as_f64().map(|f| f as f32))
                        .collect(),
                )
            })
            .collect();

        Ok(EmbeddingsResponse { embeddings })
    }

    fn provider_id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_content_delta() {
        let data = r#"{"choices":[{"delta":{"content":"hel"}}]}"#;
        let events = parse_sse_data(data);
        assert_eq!(events.len(), 1);
        match events[0].as_ref().unwrap() {
            StreamEvent::Token { text } => assert_eq!(text, "hel"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn parse_done_sentinel() {
        let events = parse_sse_data("[DONE]");
        assert!(matches!(
            events[0].as_ref().unwrap(),
            StreamEvent::Done { .. }
        ));
    }

    #[test]
    fn parse_finish_reason_chunk() {
        let data = r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#;
        let events = parse_sse_data(data);
        match events[0].as_ref().unwrap() {
            StreamEvent::Done { finish_reason, .. } => {
                assert_eq!(finish_reason.as_deref(), Some("stop"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn parse_usage_only_chunk() {
        let data = r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#;
        let events = parse_sse_data(data);
        match events[0].as_ref().unwrap() {
            StreamEvent::Done { usage, .. } => {
                assert_eq!(usage.as_ref().unwrap().total_tokens, 15);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn empty_delta_produces_nothing() {
        let data = r#"{"choices":[{"delta":{"content":""}}]}"#;
        assert!(parse_sse_data(data).is_empty());
    }

    #[test]
    fn chat_body_includes_system_first() {
        let provider = OpenAiCompatProvider {
            id: "test".into(),
            base_url: "http://localhost".into(),
            api_key: String::new(),
            model: "m".into(),
            temperature: 0.7,
            max_tokens: 4096,
            embedding_model: "e".into(),
            client: reqwest::Client::new(),
        };
        let req = ChatRequest {
            messages: vec![ChatMessage::user("hi")],
            system: Some("be helpful".into()),
            temperature: None,
            max_tokens: None,
        };
        let body = provider.build_chat_body(&req, true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
    }
}
