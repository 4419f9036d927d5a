//! Tool registry: name → tool, the LLM-facing manifest, and dispatch.
//!
//! One registry is built per request, carrying the caller's identity and
//! (in notebook context) kernel/store handles plus the authorization bit;
//! privileged tools get that bit at construction, not per call.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use cl_domain::tool::{error_kind, ToolDefinition, ToolResult};

/// A tool the agent can invoke.
///
/// `execute` never fails at the `Result` level: every error is folded
/// into a `ToolResult` so the agent loop can keep going.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema (`type: object`) for the tool's parameters.
    fn parameters(&self) -> Value;
    async fn execute(&self, args: Value) -> ToolResult;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// OpenAI-style `{type:"function", ...}` manifest for every tool.
    pub fn manifest(&self) -> Vec<Value> {
        self.tools
            .values()
            .map(|t| {
                ToolDefinition {
                    name: t.name().to_string(),
                    description: t.description().to_string(),
                    parameters: t.parameters(),
                }
                .to_manifest_entry()
            })
            .collect()
    }

    /// Markdown description block rendered into the ReAct system prompt.
    pub fn describe(&self) -> String {
        let mut blocks = Vec::with_capacity(self.tools.len());
        for tool in self.tools.values() {
            let params = tool.parameters();
            let required: Vec<&str> = params
                .get("required")
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();

            let mut lines = Vec::new();
            if let Some(props) = params.get("properties").and_then(Value::as_object) {
                for (name, schema) in props {
                    let ty = schema
                        .get("type")
                        .and_then(Value::as_str)
                        .unwrap_or("any");
                    let mut line = format!("{name}: {ty}");
                    if required.contains(&name.as_str()) {
                        line.push_str(" (required)");
                    }
                    if let Some(desc) = schema.get("description").and_then(Value::as_str) {
                        line.push_str(" - ");
                        line.push_str(desc);
                    }
                    lines.push(line);
                }
            }

            let params_desc = if lines.is_empty() {
                "none".to_string()
            } else {
                lines.join(", ")
            };
            blocks.push(format!(
                "**{}**: {}\n  Parameters: {}",
                tool.name(),
                tool.description(),
                params_desc
            ));
        }
        blocks.join("\n\n")
    }

    /// Look up and run a tool, filling schema defaults for missing args.
    pub async fn execute(&self, name: &str, args: Value) -> ToolResult {
        let Some(tool) = self.get(name) else {
            return ToolResult::fail(
                format!(
                    "Unknown tool: {name}. Available tools: {}",
                    self.names().join(", ")
                ),
                error_kind::TOOL_NOT_FOUND,
            );
        };

        let args = apply_defaults(&tool.parameters(), args);

        tracing::info!(tool = %name, "executing tool");
        let result = tool.execute(args).await;
        tracing::info!(tool = %name, success = result.success, "tool finished");
        result
    }
}

/// Merge `default` values from the schema into missing argument slots.
fn apply_defaults(schema: &Value, args: Value) -> Value {
    let mut obj = match args {
        Value::Object(map) => map,
        Value::Null => serde_json::Map::new(),
        other => {
            // Non-object args are passed through untouched; the tool
            // will reject them with invalid_input.
            return other;
        }
    };

    if let Some(props) = schema.get("properties").and_then(Value::as_object) {
        for (name, prop) in props {
            if let Some(default) = prop.get("default") {
                obj.entry(name.clone()).or_insert_with(|| default.clone());
            }
        }
    }

    Value::Object(obj)
}
