//! Notebook-privileged tools: execute code in the kernel, manipulate
//! cells, and read variables.
//!
//! Authorization is a capability passed by construction: the per-request
//! context carries the `authorized` bit and mutating tools refuse at
//! dispatch when it is off; nothing in kernel or notebook state changes
//! on a refused call.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use cl_domain::notebook::{CellKind, CellOutput};
use cl_domain::tool::{error_kind, ToolResult};
use cl_kernel::Kernel;
use cl_notebook::{CellPatch, NotebookStore};

use crate::registry::Tool;

/// Cap on how much rendered output goes back to the agent.
const OUTPUT_PREVIEW_CHARS: usize = 2000;

/// Everything the notebook tools need for one request.
pub struct NotebookToolContext {
    pub kernel: Arc<Kernel>,
    pub store: Arc<NotebookStore>,
    pub notebook_id: Uuid,
    pub authorized: bool,
    /// Execution cap for agent-driven executes.
    pub exec_timeout: Duration,
}

fn authorization_refusal(action: &str) -> ToolResult {
    ToolResult::fail_with_data(
        format!(
            "The '{action}' action requires user authorization. Ask the user to \
             enable agent actions for this notebook."
        ),
        error_kind::AUTHORIZATION_REQUIRED,
        serde_json::json!({"requires_authorization": true, "action": action}),
    )
}

/// Render cell outputs into an agent-readable block.
fn render_outputs(outputs: &[CellOutput]) -> String {
    let mut parts = Vec::new();
    for output in outputs {
        match output {
            CellOutput::Stream { text, .. } => parts.push(text.clone()),
            CellOutput::ExecuteResult { text } => parts.push(text.clone()),
            CellOutput::DisplayData { mime_type, .. } => {
                parts.push(format!("[{mime_type} output]"))
            }
            CellOutput::Error { ename, evalue, .. } => {
                parts.push(format!("{ename}: {evalue}"))
            }
        }
    }
    let mut rendered = parts.join("\n");
    if rendered.chars().count() > OUTPUT_PREVIEW_CHARS {
        rendered = rendered.chars().take(OUTPUT_PREVIEW_CHARS).collect();
        rendered.push_str("\n... (truncated)");
    }
    rendered
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// notebook_execute
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct NotebookExecuteTool {
    ctx: Arc<NotebookToolContext>,
}

impl NotebookExecuteTool {
    pub fn new(ctx: Arc<NotebookToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for NotebookExecuteTool {
    fn name(&self) -> &str {
        "notebook_execute"
    }

    fn description(&self) -> &str {
        "Run Python code in this notebook's kernel. The result is appended \
         to the notebook as a new code cell with its outputs."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "code": {"type": "string", "description": "the Python code to run"},
            },
            "required": ["code"],
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        if !self.ctx.authorized {
            return authorization_refusal("notebook_execute");
        }
        let Some(code) = args.get("code").and_then(Value::as_str) else {
            return ToolResult::fail("Missing 'code' argument", error_kind::INVALID_INPUT);
        };

        let outcome = match self.ctx.kernel.execute(code, self.ctx.exec_timeout).await {
            Ok(o) => o,
            Err(e) => {
                return ToolResult::fail(
                    format!("Kernel execution failed: {e}"),
                    error_kind::KERNEL_EXEC,
                )
            }
        };

        // Append a cell carrying the produced outputs.
        let cell = match self
            .ctx
            .store
            .add_cell(&self.ctx.notebook_id, CellKind::Code, code, None)
        {
            Ok(c) => c,
            Err(e) => {
                return ToolResult::fail(
                    format!("Could not append the cell: {e}"),
                    error_kind::RESOURCE_NOT_FOUND,
                )
            }
        };
        if let Err(e) = self.ctx.store.save_cell_execution(
            &self.ctx.notebook_id,
            &cell.id,
            outcome.outputs.clone(),
            outcome.execution_count,
        ) {
            return ToolResult::fail(
                format!("Could not save cell outputs: {e}"),
                error_kind::RESOURCE_NOT_FOUND,
            );
        }

        let rendered = render_outputs(&outcome.outputs);
        let status = if outcome.success { "ok" } else { "failed" };
        let output = if rendered.is_empty() {
            format!(
                "Execution {status} (count {}, {} ms). No output.",
                outcome.execution_count, outcome.execution_time_ms
            )
        } else {
            format!(
                "Execution {status} (count {}, {} ms):\n{rendered}",
                outcome.execution_count, outcome.execution_time_ms
            )
        };

        let data = serde_json::json!({
            "cell_id": cell.id,
            "success": outcome.success,
            "execution_count": outcome.execution_count,
            "execution_time_ms": outcome.execution_time_ms,
            "outputs": outcome.outputs,
        });
        if outcome.success {
            ToolResult::ok_with_data(output, data)
        } else {
            ToolResult {
                success: false,
                output,
                data: Some(data),
                error: Some(error_kind::KERNEL_EXEC.into()),
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// notebook_cell
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct NotebookCellTool {
    ctx: Arc<NotebookToolContext>,
}

impl NotebookCellTool {
    pub fn new(ctx: Arc<NotebookToolContext>) -> Self {
        Self { ctx }
    }

    fn get(&self, cell_id: Option<&str>) -> ToolResult {
        let Some(nb) = self.ctx.store.get(&self.ctx.notebook_id) else {
            return ToolResult::fail("Notebook not found", error_kind::RESOURCE_NOT_FOUND);
        };

        if let Some(cell_id) = cell_id {
            let Ok(cell_id) = Uuid::parse_str(cell_id) else {
                return ToolResult::fail("Invalid cell id", error_kind::INVALID_INPUT);
            };
            let Some(cell) = nb.cells.iter().find(|c| c.id == cell_id) else {
                return ToolResult::fail(
                    format!("Cell {cell_id} not found"),
                    error_kind::RESOURCE_NOT_FOUND,
                );
            };
            return ToolResult::ok_with_data(
                format!("Cell {cell_id}:\n{}", cell.source),
                serde_json::to_value(cell).unwrap_or(Value::Null),
            );
        }

        // No id: list every cell with a one-line preview.
        let mut lines = vec![format!("{} cell(s):", nb.cells.len())];
        for (i, cell) in nb.cells.iter().enumerate() {
            let first_line = cell.source.lines().next().unwrap_or("");
            let kind = match cell.kind {
                CellKind::Code => "code",
                CellKind::Markdown => "markdown",
            };
            let count = cell
                .execution_count
                .map(|c| format!("[{c}]"))
                .unwrap_or_else(|| "[ ]".into());
            lines.push(format!("{i}. {count} {kind} {} - {first_line}", cell.id));
        }
        ToolResult::ok_with_data(
            lines.join("\n"),
            serde_json::json!({"cells": nb.cells.len()}),
        )
    }
}

#[async_trait::async_trait]
impl Tool for NotebookCellTool {
    fn name(&self) -> &str {
        "notebook_cell"
    }

    fn description(&self) -> &str {
        "Inspect or edit notebook cells: 'get' lists or reads cells; 'add', \
         'update' and 'delete' change them."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "description": "'get', 'add', 'update', or 'delete'",
                    "enum": ["get", "add", "update", "delete"],
                },
                "cell_id": {"type": "string", "description": "target cell id (get/update/delete)"},
                "source": {"type": "string", "description": "cell source (add/update)"},
                "kind": {
                    "type": "string",
                    "description": "'code' or 'markdown'",
                    "enum": ["code", "markdown"],
                    "default": "code",
                },
                "index": {"type": "integer", "description": "insert position for 'add'"},
            },
            "required": ["action"],
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let Some(action) = args.get("action").and_then(Value::as_str) else {
            return ToolResult::fail("Missing 'action' argument", error_kind::INVALID_INPUT);
        };
        let cell_id = args.get("cell_id").and_then(Value::as_str);

        // Reading is free; mutation needs the authorization bit.
        if action == "get" {
            return self.get(cell_id);
        }
        if !self.ctx.authorized {
            return authorization_refusal(&format!("notebook_cell:{action}"));
        }

        match action {
            "add" => {
                let source = args.get("source").and_then(Value::as_str).unwrap_or("");
                let kind = match args.get("kind").and_then(Value::as_str) {
                    Some("markdown") => CellKind::Markdown,
                    _ => CellKind::Code,
                };
                let index = args
                    .get("index")
                    .and_then(Value::as_u64)
                    .map(|i| i as usize);
                match self
                    .ctx
                    .store
                    .add_cell(&self.ctx.notebook_id, kind, source, index)
                {
                    Ok(cell) => ToolResult::ok_with_data(
                        format!("Added cell {}", cell.id),
                        serde_json::to_value(&cell).unwrap_or(Value::Null),
                    ),
                    Err(e) => ToolResult::fail(
                        format!("Could not add the cell: {e}"),
                        error_kind::RESOURCE_NOT_FOUND,
                    ),
                }
            }
            "update" => {
                let Some(cell_id) = cell_id.and_then(|s| Uuid::parse_str(s).ok()) else {
                    return ToolResult::fail(
                        "A valid 'cell_id' is required for update",
                        error_kind::INVALID_INPUT,
                    );
                };
                let patch = CellPatch {
                    source: args
                        .get("source")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    kind: match args.get("kind").and_then(Value::as_str) {
                        Some("markdown") => Some(CellKind::Markdown),
                        Some("code") => Some(CellKind::Code),
                        _ => None,
                    },
                    ..Default::default()
                };
                match self
                    .ctx
                    .store
                    .update_cell(&self.ctx.notebook_id, &cell_id, patch)
                {
                    Ok(cell) => ToolResult::ok_with_data(
                        format!("Updated cell {cell_id}"),
                        serde_json::to_value(&cell).unwrap_or(Value::Null),
                    ),
                    Err(e) => ToolResult::fail(
                        format!("Could not update the cell: {e}"),
                        error_kind::RESOURCE_NOT_FOUND,
                    ),
                }
            }
            "delete" => {
                let Some(cell_id) = cell_id.and_then(|s| Uuid::parse_str(s).ok()) else {
                    return ToolResult::fail(
                        "A valid 'cell_id' is required for delete",
                        error_kind::INVALID_INPUT,
                    );
                };
                match self.ctx.store.delete_cell(&self.ctx.notebook_id, &cell_id) {
                    Ok(()) => ToolResult::ok(format!("Deleted cell {cell_id}")),
                    Err(e) => ToolResult::fail(
                        format!("Could not delete the cell: {e}"),
                        error_kind::RESOURCE_NOT_FOUND,
                    ),
                }
            }
            other => ToolResult::fail(
                format!("Unsupported action: {other}"),
                error_kind::INVALID_INPUT,
            ),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// notebook_variables
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct NotebookVariablesTool {
    ctx: Arc<NotebookToolContext>,
}

impl NotebookVariablesTool {
    pub fn new(ctx: Arc<NotebookToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for NotebookVariablesTool {
    fn name(&self) -> &str {
        "notebook_variables"
    }

    fn description(&self) -> &str {
        "List the variables currently defined in this notebook's kernel."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": [],
        })
    }

    async fn execute(&self, _args: Value) -> ToolResult {
        let vars = match self.ctx.kernel.variables().await {
            Ok(v) => v,
            Err(e) => {
                return ToolResult::fail(
                    format!("Could not read kernel variables: {e}"),
                    error_kind::KERNEL_EXEC,
                )
            }
        };

        if vars.is_empty() {
            return ToolResult::ok_with_data(
                "No variables defined yet.",
                serde_json::json!({"variables": {}}),
            );
        }

        let mut names: Vec<_> = vars.keys().collect();
        names.sort();
        let mut lines = vec![format!("{} variable(s):", vars.len())];
        for name in names {
            lines.push(format!("- {name}: {}", vars[name]));
        }
        ToolResult::ok_with_data(
            lines.join("\n"),
            serde_json::json!({"variables": vars}),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(authorized: bool) -> Arc<NotebookToolContext> {
        let store = Arc::new(NotebookStore::new());
        let nb = store.create(1, "t", None, vec![]);
        Arc::new(NotebookToolContext {
            kernel: Arc::new(Kernel::new(nb.id.to_string(), "python3")),
            store,
            notebook_id: nb.id,
            authorized,
            exec_timeout: Duration::from_secs(60),
        })
    }

    #[tokio::test]
    async fn unauthorized_execute_mutates_nothing() {
        let ctx = context(false);
        let cells_before = ctx.store.get(&ctx.notebook_id).unwrap().cells.len();

        let r = NotebookExecuteTool::new(ctx.clone())
            .execute(serde_json::json!({"code": "print(1)"}))
            .await;

        assert!(!r.success);
        assert_eq!(r.error.as_deref(), Some("authorization_required"));
        assert!(r.output.contains("authorization"));
        assert_eq!(r.data.unwrap()["requires_authorization"], true);
        assert_eq!(
            ctx.store.get(&ctx.notebook_id).unwrap().cells.len(),
            cells_before
        );
        assert_eq!(ctx.kernel.execution_count(), 0);
    }

    #[tokio::test]
    async fn unauthorized_cell_mutations_are_refused_but_get_works() {
        let ctx = context(false);
        let tool = NotebookCellTool::new(ctx.clone());

        let r = tool
            .execute(serde_json::json!({"action": "add", "source": "x"}))
            .await;
        assert_eq!(r.error.as_deref(), Some("authorization_required"));

        let r = tool.execute(serde_json::json!({"action": "get"})).await;
        assert!(r.success);
        assert!(r.output.contains("cell(s):"));
    }

    #[tokio::test]
    async fn authorized_cell_add_and_delete() {
        let ctx = context(true);
        let tool = NotebookCellTool::new(ctx.clone());

        let r = tool
            .execute(serde_json::json!({"action": "add", "source": "y = 1", "index": 0}))
            .await;
        assert!(r.success, "{}", r.output);
        let cell_id = r.data.unwrap()["id"].as_str().unwrap().to_string();

        let r = tool
            .execute(serde_json::json!({"action": "delete", "cell_id": cell_id}))
            .await;
        assert!(r.success, "{}", r.output);
    }

    #[tokio::test]
    async fn update_without_cell_id_is_invalid() {
        let ctx = context(true);
        let r = NotebookCellTool::new(ctx)
            .execute(serde_json::json!({"action": "update", "source": "z"}))
            .await;
        assert!(!r.success);
        assert_eq!(r.error.as_deref(), Some("invalid_input"));
    }

    #[test]
    fn render_outputs_summarizes_each_kind() {
        let outputs = vec![
            CellOutput::Stream {
                name: cl_domain::notebook::StreamName::Stdout,
                text: "hi".into(),
            },
            CellOutput::ExecuteResult { text: "42".into() },
            CellOutput::DisplayData {
                data: "...".into(),
                mime_type: "image/png".into(),
            },
            CellOutput::Error {
                ename: "ValueError".into(),
                evalue: "bad".into(),
                traceback: vec![],
            },
        ];
        let rendered = render_outputs(&outputs);
        assert!(rendered.contains("hi"));
        assert!(rendered.contains("42"));
        assert!(rendered.contains("[image/png output]"));
        assert!(rendered.contains("ValueError: bad"));
    }

    #[test]
    fn render_outputs_truncates() {
        let outputs = vec![CellOutput::ExecuteResult {
            text: "x".repeat(3000),
        }];
        let rendered = render_outputs(&outputs);
        assert!(rendered.ends_with("... (truncated)"));
    }
}
