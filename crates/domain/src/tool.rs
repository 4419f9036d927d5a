use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The result of one tool invocation.
///
/// `output` is what the agent reads back as its observation; `data` is the
/// structured payload forwarded to the SSE bridge. Tools never return a
/// `Result`; every failure becomes `success: false` with an error kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            data: None,
            error: None,
        }
    }

    pub fn ok_with_data(output: impl Into<String>, data: Value) -> Self {
        Self {
            success: true,
            output: output.into(),
            data: Some(data),
            error: None,
        }
    }

    pub fn fail(output: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            data: None,
            error: Some(kind.into()),
        }
    }

    pub fn fail_with_data(
        output: impl Into<String>,
        kind: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            success: false,
            output: output.into(),
            data: Some(data),
            error: Some(kind.into()),
        }
    }
}

/// Tool definition exposed to the LLM (OpenAI "tools" convention).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: Value,
}

impl ToolDefinition {
    /// Render as a `{type:"function", function:{...}}` manifest entry.
    pub fn to_manifest_entry(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// Error-kind tags carried on failed tool results and SSE error events.
pub mod error_kind {
    pub const AUTHORIZATION_REQUIRED: &str = "authorization_required";
    pub const INVALID_INPUT: &str = "invalid_input";
    pub const TOOL_NOT_FOUND: &str = "tool_not_found";
    pub const TOOL_TIMEOUT: &str = "tool_timeout";
    pub const TOOL_EXTERNAL: &str = "tool_external";
    pub const PARSER_FORMAT: &str = "parser_format";
    pub const LLM_STREAM: &str = "llm_stream";
    pub const KERNEL_EXEC: &str = "kernel_exec";
    pub const RESOURCE_NOT_FOUND: &str = "resource_not_found";
    pub const BLOCKED_DOMAIN: &str = "blocked_domain";
    pub const PACKAGES_NOT_ALLOWED: &str = "packages_not_allowed";
    pub const INTERNAL: &str = "internal";
}
