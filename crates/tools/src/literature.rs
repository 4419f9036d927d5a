//! Literature search over the Semantic Scholar Graph API, with a retry
//! on rate limiting.

use serde_json::Value;
use std::time::Duration;

use cl_domain::tool::{error_kind, ToolResult};

use crate::registry::Tool;

const SEARCH_URL: &str = "https://api.semanticscholar.org/graph/v1/paper/search";
const FIELDS: &str = "title,abstract,year,venue,authors,citationCount,url";
const MAX_RETRIES: u32 = 3;

pub struct LiteratureSearchTool {
    client: reqwest::Client,
    api_key: String,
}

impl LiteratureSearchTool {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key: std::env::var("SEMANTIC_SCHOLAR_API_KEY").unwrap_or_default(),
        }
    }

    /// GET with exponential backoff on 429.
    async fn request_with_retry(&self, params: &[(&str, String)]) -> Result<Value, ToolResult> {
        for attempt in 0..MAX_RETRIES {
            let mut req = self.client.get(SEARCH_URL).query(params);
            if !self.api_key.is_empty() {
                req = req.header("x-api-key", &self.api_key);
            }

            let resp = match req.send().await {
                Ok(r) => r,
                Err(e) if e.is_timeout() => {
                    return Err(ToolResult::fail(
                        "Literature search timed out.",
                        error_kind::TOOL_TIMEOUT,
                    ))
                }
                Err(e) => {
                    return Err(ToolResult::fail(
                        format!("Literature search failed: {e}"),
                        error_kind::TOOL_EXTERNAL,
                    ))
                }
            };

            if resp.status().as_u16() == 429 {
                let wait = Duration::from_secs(1 << attempt);
                tracing::warn!(attempt, wait_secs = wait.as_secs(), "rate limited, retrying");
                tokio::time::sleep(wait).await;
                continue;
            }

            if !resp.status().is_success() {
                return Err(ToolResult::fail(
                    format!("Literature search failed: HTTP {}", resp.status().as_u16()),
                    error_kind::TOOL_EXTERNAL,
                ));
            }

            return resp.json().await.map_err(|e| {
                ToolResult::fail(
                    format!("Malformed literature response: {e}"),
                    error_kind::TOOL_EXTERNAL,
                )
            });
        }

        Err(ToolResult::fail(
            "Literature search is rate limited, try again later.",
            error_kind::TOOL_EXTERNAL,
        ))
    }
}

fn format_paper(i: usize, paper: &Value) -> String {
    let title = paper.get("title").and_then(Value::as_str).unwrap_or("(untitled)");
    let year = paper
        .get("year")
        .and_then(Value::as_i64)
        .map(|y| y.to_string())
        .unwrap_or_else(|| "n.d.".into());
    let venue = paper.get("venue").and_then(Value::as_str).unwrap_or("");
    let citations = paper
        .get("citationCount")
        .and_then(Value::as_i64)
        .unwrap_or(0);

    let authors: Vec<&str> = paper
        .get("authors")
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(|au| au.get("name").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();
    let author_line = match authors.len() {
        0 => "unknown authors".to_string(),
        1..=3 => authors.join(", "),
        _ => format!("{} et al.", authors[..3].join(", ")),
    };

    let mut block = format!("\n[{}] {title} ({year})", i + 1);
    if !venue.is_empty() {
        block.push_str(&format!(" - {venue}"));
    }
    block.push_str(&format!("\n    {author_line} · {citations} citations"));
    if let Some(url) = paper.get("url").and_then(Value::as_str) {
        block.push_str(&format!("\n    {url}"));
    }
    if let Some(abstract_text) = paper.get("abstract").and_then(Value::as_str) {
        let preview: String = abstract_text.chars().take(300).collect();
        let ellipsis = if abstract_text.chars().count() > 300 {
            "..."
        } else {
            ""
        };
        block.push_str(&format!("\n    {preview}{ellipsis}"));
    }
    block
}

#[async_trait::async_trait]
impl Tool for LiteratureSearchTool {
    fn name(&self) -> &str {
        "literature_search"
    }

    fn description(&self) -> &str {
        "Search academic literature (papers, authors, citation counts). \
         Use for questions about research publications."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "topic or title keywords"},
                "limit": {
                    "type": "integer",
                    "description": "number of papers to return",
                    "default": 5,
                },
                "year": {
                    "type": "string",
                    "description": "optional year filter, e.g. '2020' or '2018-2023'"
                },
            },
            "required": ["query"],
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let Some(query) = args.get("query").and_then(Value::as_str) else {
            return ToolResult::fail("Missing 'query' argument", error_kind::INVALID_INPUT);
        };
        let limit = args
            .get("limit")
            .and_then(Value::as_u64)
            .unwrap_or(5)
            .clamp(1, 20);

        let mut params = vec![
            ("query", query.to_string()),
            ("limit", limit.to_string()),
            ("fields", FIELDS.to_string()),
        ];
        if let Some(year) = args.get("year").and_then(Value::as_str) {
            params.push(("year", year.to_string()));
        }

        let body = match self.request_with_retry(&params).await {
            Ok(v) => v,
            Err(failure) => return failure,
        };

        let papers = body
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        if papers.is_empty() {
            return ToolResult::ok_with_data(
                format!("No papers found for '{query}'."),
                serde_json::json!({"results": [], "query": query}),
            );
        }

        let mut output = format!("Papers matching '{query}':\n");
        for (i, paper) in papers.iter().enumerate() {
            output.push_str(&format_paper(i, paper));
        }

        ToolResult::ok_with_data(
            output,
            serde_json::json!({"results": papers, "query": query}),
        )
    }
}
