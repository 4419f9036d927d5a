//! Static analysis over a Python source string: structure stats and a
//! few lint-style suggestions. Never executes the code.

use regex::Regex;
use serde_json::Value;

use cl_domain::tool::{error_kind, ToolResult};

use crate::registry::Tool;

pub struct CodeAnalysisTool;

#[async_trait::async_trait]
impl Tool for CodeAnalysisTool {
    fn name(&self) -> &str {
        "code_analysis"
    }

    fn description(&self) -> &str {
        "Analyze Python code without running it: line counts, imports, \
         definitions, and improvement suggestions."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "code": {"type": "string", "description": "the Python source to analyze"},
            },
            "required": ["code"],
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let Some(code) = args.get("code").and_then(Value::as_str) else {
            return ToolResult::fail("Missing 'code' argument", error_kind::INVALID_INPUT);
        };

        let import_re =
            Regex::new(r"(?m)^\s*(?:from\s+([\w.]+)\s+import|import\s+([\w.]+))").expect("static");
        let def_re = Regex::new(r"(?m)^\s*def\s+(\w+)").expect("static");
        let class_re = Regex::new(r"(?m)^\s*class\s+(\w+)").expect("static");

        let total_lines = code.lines().count();
        let code_lines = code
            .lines()
            .filter(|l| {
                let t = l.trim();
                !t.is_empty() && !t.starts_with('#')
            })
            .count();
        let comment_lines = code
            .lines()
            .filter(|l| l.trim().starts_with('#'))
            .count();

        let imports: Vec<String> = import_re
            .captures_iter(code)
            .filter_map(|c| c.get(1).or_else(|| c.get(2)))
            .map(|m| m.as_str().to_string())
            .collect();
        let functions: Vec<String> = def_re
            .captures_iter(code)
            .map(|c| c[1].to_string())
            .collect();
        let classes: Vec<String> = class_re
            .captures_iter(code)
            .map(|c| c[1].to_string())
            .collect();

        let mut suggestions = Vec::new();
        if code.lines().any(|l| l.chars().count() > 100) {
            suggestions.push("Some lines exceed 100 characters; consider wrapping them.");
        }
        if Regex::new(r"(?m)^\s*except\s*:").expect("static").is_match(code) {
            suggestions.push("Bare 'except:' swallows every error; catch specific exceptions.");
        }
        if Regex::new(r"\b(?:eval|exec)\s*\(").expect("static").is_match(code) {
            suggestions.push("eval/exec on dynamic input is unsafe; prefer explicit parsing.");
        }
        if code.contains("TODO") || code.contains("FIXME") {
            suggestions.push("Unresolved TODO/FIXME markers remain.");
        }
        if total_lines > 10 && comment_lines == 0 {
            suggestions.push("No comments; a short note on intent would help readers.");
        }

        let mut output = format!(
            "Code analysis:\n\
             - lines: {total_lines} total, {code_lines} code, {comment_lines} comments\n\
             - imports ({}): {}\n\
             - functions ({}): {}\n\
             - classes ({}): {}",
            imports.len(),
            join_or_none(&imports),
            functions.len(),
            join_or_none(&functions),
            classes.len(),
            join_or_none(&classes),
        );
        if suggestions.is_empty() {
            output.push_str("\n- no suggestions");
        } else {
            output.push_str("\nSuggestions:");
            for s in &suggestions {
                output.push_str(&format!("\n- {s}"));
            }
        }

        ToolResult::ok_with_data(
            output,
            serde_json::json!({
                "total_lines": total_lines,
                "code_lines": code_lines,
                "comment_lines": comment_lines,
                "imports": imports,
                "functions": functions,
                "classes": classes,
                "suggestions": suggestions,
            }),
        )
    }
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".into()
    } else {
        items.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counts_structure() {
        let code = "# demo\nimport numpy\nfrom os import path\n\ndef f():\n    pass\n\nclass C:\n    pass\n";
        let r = CodeAnalysisTool
            .execute(serde_json::json!({"code": code}))
            .await;
        assert!(r.success);
        let data = r.data.unwrap();
        assert_eq!(data["imports"], serde_json::json!(["numpy", "os"]));
        assert_eq!(data["functions"], serde_json::json!(["f"]));
        assert_eq!(data["classes"], serde_json::json!(["C"]));
        assert_eq!(data["comment_lines"], 1);
    }

    #[tokio::test]
    async fn flags_bare_except() {
        let code = "try:\n    x()\nexcept:\n    pass\n";
        let r = CodeAnalysisTool
            .execute(serde_json::json!({"code": code}))
            .await;
        assert!(r.output.contains("except"));
    }
}
