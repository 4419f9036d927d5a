//! Date/time tool: current time, date, weekday, unix timestamp, and
//! strftime-style formatting.

use chrono::format::{Item, StrftimeItems};
use chrono::Local;
use serde_json::Value;

use cl_domain::tool::{error_kind, ToolResult};

use crate::registry::Tool;

pub struct DateTimeTool;

#[async_trait::async_trait]
impl Tool for DateTimeTool {
    fn name(&self) -> &str {
        "datetime"
    }

    fn description(&self) -> &str {
        "Get the current date or time. Use when the user asks about dates, \
         times, or weekdays."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "description": "'now' (current time), 'date', 'weekday', 'timestamp', or 'format'",
                    "enum": ["now", "date", "weekday", "timestamp", "format"],
                },
                "format": {
                    "type": "string",
                    "description": "strftime pattern, used when action='format'",
                    "default": "%Y-%m-%d %H:%M:%S",
                },
            },
            "required": ["action"],
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let Some(action) = args.get("action").and_then(Value::as_str) else {
            return ToolResult::fail("Missing 'action' argument", error_kind::INVALID_INPUT);
        };
        let pattern = args
            .get("format")
            .and_then(Value::as_str)
            .unwrap_or("%Y-%m-%d %H:%M:%S");

        let now = Local::now();

        let (result, output) = match action {
            "now" => {
                let s = now.format("%Y-%m-%d %H:%M:%S").to_string();
                (s.clone(), format!("Current time: {s}"))
            }
            "date" => {
                let s = now.format("%Y-%m-%d").to_string();
                (s.clone(), format!("Current date: {s}"))
            }
            "weekday" => {
                let s = now.format("%A").to_string();
                (s.clone(), format!("Today is: {s}"))
            }
            "timestamp" => {
                let s = now.timestamp().to_string();
                (s.clone(), format!("Current unix timestamp: {s}"))
            }
            "format" => {
                // Reject bad patterns instead of panicking mid-Display.
                let items: Vec<Item> = StrftimeItems::new(pattern).collect();
                if items.iter().any(|i| matches!(i, Item::Error)) {
                    return ToolResult::fail(
                        format!("Invalid strftime pattern: {pattern}"),
                        error_kind::INVALID_INPUT,
                    );
                }
                let s = now.format_with_items(items.into_iter()).to_string();
                (s.clone(), format!("Formatted time: {s}"))
            }
            other => {
                return ToolResult::fail(
                    format!("Unsupported action: {other}"),
                    error_kind::INVALID_INPUT,
                );
            }
        };

        ToolResult::ok_with_data(
            output,
            serde_json::json!({
                "action": action,
                "result": result,
                "timestamp": now.timestamp(),
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run(args: Value) -> ToolResult {
        DateTimeTool.execute(args).await
    }

    #[tokio::test]
    async fn now_returns_datetime_string() {
        let r = run(serde_json::json!({"action": "now"})).await;
        assert!(r.success);
        assert!(r.output.starts_with("Current time: "));
        // YYYY-MM-DD HH:MM:SS
        let data = r.data.unwrap();
        assert_eq!(data["result"].as_str().unwrap().len(), 19);
    }

    #[tokio::test]
    async fn weekday_is_an_english_day_name() {
        let r = run(serde_json::json!({"action": "weekday"})).await;
        assert!(r.success);
        const DAYS: &[&str] = &[
            "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday",
        ];
        let data = r.data.unwrap();
        assert!(DAYS.contains(&data["result"].as_str().unwrap()));
    }

    #[tokio::test]
    async fn format_uses_custom_pattern() {
        let r = run(serde_json::json!({"action": "format", "format": "%Y"})).await;
        assert!(r.success);
        let data = r.data.unwrap();
        assert_eq!(data["result"].as_str().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn invalid_pattern_is_rejected() {
        let r = run(serde_json::json!({"action": "format", "format": "%Q-bad"})).await;
        assert!(!r.success);
        assert_eq!(r.error.as_deref(), Some("invalid_input"));
    }

    #[tokio::test]
    async fn unknown_action_is_rejected() {
        let r = run(serde_json::json!({"action": "rewind"})).await;
        assert!(!r.success);
    }
}
