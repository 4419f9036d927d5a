//! Web search: Serper when a key is configured, HTML-scraping fallback
//! otherwise. Network failures never escape as errors; the agent reads
//! them as an unsuccessful observation and moves on.

use regex::Regex;
use serde_json::Value;
use std::time::Duration;

use cl_domain::tool::{error_kind, ToolResult};

use crate::registry::Tool;

const SERPER_URL: &str = "https://google.serper.dev/search";
const FALLBACK_URL: &str = "https://html.duckduckgo.com/html/";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

pub struct WebSearchTool {
    api_key: String,
    client: reqwest::Client,
}

impl WebSearchTool {
    pub fn new(api_key: String, timeout: Duration) -> Self {
        if api_key.is_empty() {
            tracing::warn!("no Serper API key configured, web_search will scrape HTML");
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { api_key, client }
    }

    // ── Serper tier ────────────────────────────────────────────────

    async fn serper_search(&self, query: &str, max_results: usize) -> ToolResult {
        let resp = match self
            .client
            .post(SERPER_URL)
            .header("X-API-KEY", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&serde_json::json!({"q": query, "num": max_results}))
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => return net_failure(e),
        };

        if !resp.status().is_success() {
            return ToolResult::fail(
                format!("Serper request failed: HTTP {}", resp.status().as_u16()),
                format!("http_{}", resp.status().as_u16()),
            );
        }

        let body: Value = match resp.json().await {
            Ok(v) => v,
            Err(e) => return net_failure(e),
        };

        let mut results: Vec<Value> = Vec::new();

        if let Some(kg) = body.get("knowledgeGraph") {
            results.push(serde_json::json!({
                "type": "knowledge_graph",
                "title": kg.get("title").and_then(Value::as_str).unwrap_or(""),
                "description": kg.get("description").and_then(Value::as_str).unwrap_or(""),
                "attributes": kg.get("attributes").cloned().unwrap_or(Value::Null),
            }));
        }

        if let Some(ab) = body.get("answerBox") {
            let answer = ab
                .get("answer")
                .or_else(|| ab.get("snippet"))
                .or_else(|| ab.get("title"))
                .and_then(Value::as_str)
                .unwrap_or("");
            if !answer.is_empty() {
                results.push(serde_json::json!({
                    "type": "answer_box",
                    "answer": answer,
                    "source": ab.get("link").and_then(Value::as_str).unwrap_or(""),
                }));
            }
        }

        if let Some(organic) = body.get("organic").and_then(Value::as_array) {
            for item in organic.iter().take(max_results) {
                results.push(serde_json::json!({
                    "type": "organic",
                    "title": item.get("title").and_then(Value::as_str).unwrap_or(""),
                    "url": item.get("link").and_then(Value::as_str).unwrap_or(""),
                    "snippet": item.get("snippet").and_then(Value::as_str).unwrap_or(""),
                    "date": item.get("date").and_then(Value::as_str).unwrap_or(""),
                }));
            }
        }

        if let Some(paa) = body.get("peopleAlsoAsk").and_then(Value::as_array) {
            if results.len() < max_results + 2 {
                for item in paa.iter().take(2) {
                    results.push(serde_json::json!({
                        "type": "related_question",
                        "question": item.get("question").and_then(Value::as_str).unwrap_or(""),
                        "snippet": item.get("snippet").and_then(Value::as_str).unwrap_or(""),
                    }));
                }
            }
        }

        if results.is_empty() {
            return ToolResult::ok_with_data(
                format!("No search results found for '{query}'."),
                serde_json::json!({"results": [], "query": query}),
            );
        }

        let output = format_results(query, &results);
        ToolResult::ok_with_data(output, serde_json::json!({"results": results, "query": query}))
    }

    // ── Fallback tier: scrape the HTML results page ────────────────

    async fn fallback_search(&self, query: &str, max_results: usize) -> ToolResult {
        tracing::info!(query, "falling back to HTML search");

        let resp = match self
            .client
            .get(FALLBACK_URL)
            .query(&[("q", query)])
            .header("User-Agent", USER_AGENT)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => return net_failure(e),
        };

        if !resp.status().is_success() {
            return ToolResult::fail(
                format!("Search request failed: HTTP {}", resp.status().as_u16()),
                error_kind::TOOL_EXTERNAL,
            );
        }

        let html = match resp.text().await {
            Ok(t) => t,
            Err(e) => return net_failure(e),
        };

        let title_re = Regex::new(
            r#"(?s)<a[^>]*class="[^"]*result__a[^"]*"[^>]*href="([^"]+)"[^>]*>(.*?)</a>"#,
        )
        .expect("static regex");
        let snippet_re = Regex::new(
            r#"(?s)<a[^>]*class="[^"]*result__snippet[^"]*"[^>]*>(.*?)</a>"#,
        )
        .expect("static regex");

        let snippets: Vec<String> = snippet_re
            .captures_iter(&html)
            .map(|c| clean_html(&c[1]))
            .collect();

        let mut results: Vec<Value> = Vec::new();
        for (i, caps) in title_re.captures_iter(&html).take(max_results).enumerate() {
            let title = clean_html(&caps[2]);
            if title.is_empty() {
                continue;
            }
            results.push(serde_json::json!({
                "type": "organic",
                "title": title,
                "url": caps[1].to_string(),
                "snippet": snippets.get(i).cloned().unwrap_or_default(),
            }));
        }

        if results.is_empty() {
            return ToolResult::ok_with_data(
                format!(
                    "No search results found for '{query}'. Try different keywords or retry later."
                ),
                serde_json::json!({"results": [], "query": query}),
            );
        }

        let output = format_results(query, &results);
        ToolResult::ok_with_data(output, serde_json::json!({"results": results, "query": query}))
    }
}

fn net_failure(e: reqwest::Error) -> ToolResult {
    if e.is_timeout() {
        ToolResult::fail("Search timed out, try again later.", error_kind::TOOL_TIMEOUT)
    } else {
        ToolResult::fail(format!("Search failed: {e}"), error_kind::TOOL_EXTERNAL)
    }
}

fn format_results(query: &str, results: &[Value]) -> String {
    let mut parts = vec![format!("Search results for '{query}':\n")];
    let mut idx = 0;

    for r in results {
        match r.get("type").and_then(Value::as_str).unwrap_or("organic") {
            "knowledge_graph" => {
                parts.push(format!(
                    "\n[Knowledge] {}",
                    r.get("title").and_then(Value::as_str).unwrap_or("")
                ));
                if let Some(desc) = r.get("description").and_then(Value::as_str) {
                    if !desc.is_empty() {
                        parts.push(format!("\n{desc}"));
                    }
                }
                if let Some(attrs) = r.get("attributes").and_then(Value::as_object) {
                    for (k, v) in attrs.iter().take(3) {
                        parts.push(format!("\n  - {k}: {}", v.as_str().unwrap_or("")));
                    }
                }
            }
            "answer_box" => {
                parts.push(format!(
                    "\n[Answer] {}",
                    r.get("answer").and_then(Value::as_str).unwrap_or("")
                ));
                if let Some(src) = r.get("source").and_then(Value::as_str) {
                    if !src.is_empty() {
                        parts.push(format!("\nSource: {src}"));
                    }
                }
            }
            "related_question" => {
                parts.push(format!(
                    "\n\nRelated: {}",
                    r.get("question").and_then(Value::as_str).unwrap_or("")
                ));
                if let Some(s) = r.get("snippet").and_then(Value::as_str) {
                    if !s.is_empty() {
                        parts.push(format!("\n{s}"));
                    }
                }
            }
            _ => {
                idx += 1;
                parts.push(format!(
                    "\n\n[Result {idx}] {}",
                    r.get("title").and_then(Value::as_str).unwrap_or("")
                ));
                if let Some(date) = r.get("date").and_then(Value::as_str) {
                    if !date.is_empty() {
                        parts.push(format!(" ({date})"));
                    }
                }
                if let Some(url) = r.get("url").and_then(Value::as_str) {
                    if !url.is_empty() {
                        parts.push(format!("\nLink: {url}"));
                    }
                }
                if let Some(snippet) = r.get("snippet").and_then(Value::as_str) {
                    if !snippet.is_empty() {
                        parts.push(format!("\nSnippet: {snippet}"));
                    }
                }
            }
        }
    }

    parts.concat()
}

fn clean_html(fragment: &str) -> String {
    let tag_re = Regex::new(r"<[^>]+>").expect("static regex");
    tag_re
        .replace_all(fragment, "")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .trim()
        .to_string()
}

#[async_trait::async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the internet for up-to-date information: news, weather, \
         facts, anything beyond the model's knowledge."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "search keywords"},
                "max_results": {
                    "type": "integer",
                    "description": "number of results to return",
                    "default": 5,
                },
            },
            "required": ["query"],
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let Some(query) = args.get("query").and_then(Value::as_str) else {
            return ToolResult::fail("Missing 'query' argument", error_kind::INVALID_INPUT);
        };
        let max_results = args
            .get("max_results")
            .and_then(Value::as_u64)
            .unwrap_or(5)
            .clamp(1, 20) as usize;

        if !self.api_key.is_empty() {
            let result = self.serper_search(query, max_results).await;
            if result.success {
                return result;
            }
            tracing::warn!(
                error = result.error.as_deref().unwrap_or("unknown"),
                "Serper search failed, trying fallback"
            );
        }

        self.fallback_search(query, max_results).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_html_strips_tags_and_entities() {
        assert_eq!(
            clean_html("<b>Rust &amp; Tokio</b> <span>rocks</span>"),
            "Rust & Tokio rocks"
        );
    }

    #[test]
    fn format_results_renders_each_type() {
        let results = vec![
            serde_json::json!({"type": "answer_box", "answer": "42", "source": "u"}),
            serde_json::json!({"type": "organic", "title": "T", "url": "http://x", "snippet": "S"}),
        ];
        let text = format_results("life", &results);
        assert!(text.contains("[Answer] 42"));
        assert!(text.contains("[Result 1] T"));
        assert!(text.contains("Snippet: S"));
    }

    #[tokio::test]
    async fn missing_query_is_invalid_input() {
        let tool = WebSearchTool::new(String::new(), Duration::from_secs(1));
        let r = tool.execute(serde_json::json!({})).await;
        assert!(!r.success);
        assert_eq!(r.error.as_deref(), Some("invalid_input"));
    }
}
