//! Web scraping tool with an SSRF guard: internal hostnames and RFC1918
//! prefixes are refused before any request is issued.

use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use std::time::Duration;

use cl_domain::tool::{error_kind, ToolResult};

use crate::registry::Tool;

/// Hostnames containing any of these fragments are refused outright.
const BLOCKED_HOST_FRAGMENTS: &[&str] = &[
    "localhost",
    "127.0.0.1",
    "0.0.0.0",
    "internal",
    "intranet",
    "corp",
    "private",
];

/// RFC1918-style prefixes (the coarse `172.` matches the original guard).
const BLOCKED_PREFIXES: &[&str] = &["10.", "192.168.", "172."];

const USER_AGENT: &str = "Mozilla/5.0 (compatible; CodeLabBot/1.0)";

pub struct WebScrapeTool {
    client: reqwest::Client,
    max_chars: usize,
}

impl WebScrapeTool {
    pub fn new(timeout: Duration, max_chars: usize) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client, max_chars }
    }
}

/// Validate scheme and hostname. Returns a refusal message on block.
fn check_url(raw: &str) -> Result<reqwest::Url, ToolResult> {
    let url = match reqwest::Url::parse(raw) {
        Ok(u) => u,
        Err(e) => {
            return Err(ToolResult::fail(
                format!("Invalid URL: {e}"),
                error_kind::INVALID_INPUT,
            ))
        }
    };

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ToolResult::fail(
                format!("Blocked scheme: {other} (only http/https allowed)"),
                error_kind::BLOCKED_DOMAIN,
            ))
        }
    }

    let Some(host) = url.host_str() else {
        return Err(ToolResult::fail(
            "URL has no host",
            error_kind::INVALID_INPUT,
        ));
    };
    let host_lower = host.to_lowercase();

    if BLOCKED_HOST_FRAGMENTS
        .iter()
        .any(|frag| host_lower.contains(frag))
        || BLOCKED_PREFIXES
            .iter()
            .any(|prefix| host_lower.starts_with(prefix))
    {
        return Err(ToolResult::fail(
            format!("Access to internal or private host '{host}' is not allowed"),
            error_kind::BLOCKED_DOMAIN,
        ));
    }

    Ok(url)
}

/// Drop script/style blocks before parsing so extracted text is clean.
fn strip_noise(html: &str) -> String {
    let script_re = Regex::new(r"(?is)<script\b[^>]*>.*?</script>").expect("static regex");
    let style_re = Regex::new(r"(?is)<style\b[^>]*>.*?</style>").expect("static regex");
    let without_scripts = script_re.replace_all(html, "");
    style_re.replace_all(&without_scripts, "").into_owned()
}

fn collapse_whitespace(text: &str) -> String {
    let ws_re = Regex::new(r"[ \t\r\f]+").expect("static regex");
    let nl_re = Regex::new(r"\n{3,}").expect("static regex");
    let collapsed = ws_re.replace_all(text, " ");
    nl_re.replace_all(&collapsed, "\n\n").trim().to_string()
}

#[async_trait::async_trait]
impl Tool for WebScrapeTool {
    fn name(&self) -> &str {
        "web_scrape"
    }

    fn description(&self) -> &str {
        "Fetch a web page and extract its content: text, links, or tables, \
         optionally scoped to a CSS selector."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "description": "the http(s) URL to fetch"},
                "selector": {
                    "type": "string",
                    "description": "optional CSS selector to scope extraction"
                },
                "extract": {
                    "type": "string",
                    "description": "'text', 'html', 'links', 'tables', or 'all'",
                    "enum": ["text", "html", "links", "tables", "all"],
                    "default": "text",
                },
            },
            "required": ["url"],
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let Some(raw_url) = args.get("url").and_then(Value::as_str) else {
            return ToolResult::fail("Missing 'url' argument", error_kind::INVALID_INPUT);
        };
        let extract = args
            .get("extract")
            .and_then(Value::as_str)
            .unwrap_or("text");

        let url = match check_url(raw_url) {
            Ok(u) => u,
            Err(refusal) => return refusal,
        };

        let resp = match self
            .client
            .get(url.clone())
            .header("User-Agent", USER_AGENT)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() => {
                return ToolResult::fail(
                    "Page fetch timed out.",
                    error_kind::TOOL_TIMEOUT,
                )
            }
            Err(e) => {
                return ToolResult::fail(
                    format!("Fetch failed: {e}"),
                    error_kind::TOOL_EXTERNAL,
                )
            }
        };

        if !resp.status().is_success() {
            return ToolResult::fail(
                format!("Fetch failed: HTTP {}", resp.status().as_u16()),
                error_kind::TOOL_EXTERNAL,
            );
        }

        let body = match resp.text().await {
            Ok(t) => t,
            Err(e) => {
                return ToolResult::fail(
                    format!("Reading response body failed: {e}"),
                    error_kind::TOOL_EXTERNAL,
                )
            }
        };

        let document = Html::parse_document(&strip_noise(&body));

        // Scope to the selector when given; the whole document otherwise.
        let scoped: Vec<scraper::ElementRef> = match args.get("selector").and_then(Value::as_str) {
            Some(sel) if !sel.trim().is_empty() => {
                let selector = match Selector::parse(sel) {
                    Ok(s) => s,
                    Err(e) => {
                        return ToolResult::fail(
                            format!("Invalid CSS selector '{sel}': {e:?}"),
                            error_kind::INVALID_INPUT,
                        )
                    }
                };
                let matched: Vec<_> = document.select(&selector).collect();
                if matched.is_empty() {
                    return ToolResult::fail(
                        format!("Selector '{sel}' matched nothing on the page"),
                        error_kind::RESOURCE_NOT_FOUND,
                    );
                }
                matched
            }
            _ => Vec::new(),
        };

        let sections = match extract {
            "text" => vec![extract_text(&document, &scoped)],
            "html" => vec![extract_html(&document, &scoped)],
            "links" => vec![extract_links(&document, &scoped, &url)],
            "tables" => vec![extract_tables(&document, &scoped)],
            "all" => vec![
                format!("## Text\n{}", extract_text(&document, &scoped)),
                format!("## Links\n{}", extract_links(&document, &scoped, &url)),
                format!("## Tables\n{}", extract_tables(&document, &scoped)),
            ],
            other => {
                return ToolResult::fail(
                    format!("Unsupported extract mode: {other}"),
                    error_kind::INVALID_INPUT,
                )
            }
        };

        let mut output = format!("Content from {url}:\n\n{}", sections.join("\n\n"));
        if output.chars().count() > self.max_chars {
            output = output.chars().take(self.max_chars).collect();
            output.push_str("\n... (truncated)");
        }

        ToolResult::ok_with_data(
            output,
            serde_json::json!({"url": url.as_str(), "extract": extract}),
        )
    }
}

fn extract_text(document: &Html, scoped: &[scraper::ElementRef]) -> String {
    let text: String = if scoped.is_empty() {
        document.root_element().text().collect::<Vec<_>>().join("\n")
    } else {
        scoped
            .iter()
            .map(|el| el.text().collect::<Vec<_>>().join("\n"))
            .collect::<Vec<_>>()
            .join("\n\n")
    };
    collapse_whitespace(&text)
}

fn extract_html(document: &Html, scoped: &[scraper::ElementRef]) -> String {
    if scoped.is_empty() {
        document.root_element().html()
    } else {
        scoped
            .iter()
            .map(|el| el.html())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn extract_links(document: &Html, scoped: &[scraper::ElementRef], base: &reqwest::Url) -> String {
    let anchor = Selector::parse("a[href]").expect("static selector");
    let mut lines = Vec::new();

    let collect = |el: scraper::ElementRef, lines: &mut Vec<String>| {
        for a in el.select(&anchor) {
            if lines.len() >= 50 {
                return;
            }
            let href = a.value().attr("href").unwrap_or("");
            let resolved = base
                .join(href)
                .map(|u| u.to_string())
                .unwrap_or_else(|_| href.to_string());
            let text = collapse_whitespace(&a.text().collect::<Vec<_>>().join(" "));
            if text.is_empty() {
                lines.push(format!("- {resolved}"));
            } else {
                lines.push(format!("- {text}: {resolved}"));
            }
        }
    };

    if scoped.is_empty() {
        collect(document.root_element(), &mut lines);
    } else {
        for el in scoped {
            collect(*el, &mut lines);
        }
    }

    if lines.is_empty() {
        "no links found".into()
    } else {
        lines.join("\n")
    }
}

fn extract_tables(document: &Html, scoped: &[scraper::ElementRef]) -> String {
    let table_sel = Selector::parse("table").expect("static selector");
    let row_sel = Selector::parse("tr").expect("static selector");
    let cell_sel = Selector::parse("th, td").expect("static selector");

    let mut blocks = Vec::new();
    let mut render = |el: scraper::ElementRef, blocks: &mut Vec<String>| {
        for table in el.select(&table_sel) {
            if blocks.len() >= 10 {
                return;
            }
            let mut rows = Vec::new();
            for row in table.select(&row_sel).take(20) {
                let cells: Vec<String> = row
                    .select(&cell_sel)
                    .map(|c| collapse_whitespace(&c.text().collect::<Vec<_>>().join(" ")))
                    .collect();
                if !cells.is_empty() {
                    rows.push(cells.join(" | "));
                }
            }
            if !rows.is_empty() {
                blocks.push(format!("Table {}:\n{}", blocks.len() + 1, rows.join("\n")));
            }
        }
    };

    if scoped.is_empty() {
        render(document.root_element(), &mut blocks);
    } else {
        for el in scoped {
            render(*el, &mut blocks);
        }
    }

    if blocks.is_empty() {
        "no tables found".into()
    } else {
        blocks.join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> WebScrapeTool {
        WebScrapeTool::new(Duration::from_secs(5), 5000)
    }

    #[tokio::test]
    async fn non_http_scheme_is_blocked() {
        let r = tool()
            .execute(serde_json::json!({"url": "file:///etc/passwd"}))
            .await;
        assert!(!r.success);
        assert_eq!(r.error.as_deref(), Some("blocked_domain"));
    }

    #[tokio::test]
    async fn internal_hostnames_are_blocked_without_fetching() {
        for url in [
            "http://localhost/admin",
            "http://127.0.0.1:8080/",
            "http://db.internal/",
            "http://intranet.example.com/",
            "http://10.0.0.5/",
            "http://192.168.1.1/",
            "http://172.16.0.1/",
        ] {
            let r = tool().execute(serde_json::json!({"url": url})).await;
            assert!(!r.success, "{url} should be blocked");
            assert_eq!(r.error.as_deref(), Some("blocked_domain"), "{url}");
        }
    }

    #[tokio::test]
    async fn malformed_url_is_invalid_input() {
        let r = tool().execute(serde_json::json!({"url": "not a url"})).await;
        assert!(!r.success);
        assert_eq!(r.error.as_deref(), Some("invalid_input"));
    }

    #[test]
    fn strip_noise_removes_scripts_and_styles() {
        let html = "<p>keep</p><script>var x;</script><style>.a{}</style><p>this</p>";
        let cleaned = strip_noise(html);
        assert!(cleaned.contains("keep"));
        assert!(!cleaned.contains("var x"));
        assert!(!cleaned.contains(".a{}"));
    }

    #[test]
    fn tables_render_rows_with_pipes() {
        let doc = Html::parse_document(
            "<table><tr><th>a</th><th>b</th></tr><tr><td>1</td><td>2</td></tr></table>",
        );
        let rendered = extract_tables(&doc, &[]);
        assert!(rendered.contains("a | b"));
        assert!(rendered.contains("1 | 2"));
    }

    #[test]
    fn links_resolve_relative_hrefs() {
        let doc = Html::parse_document(r#"<a href="/about">About</a>"#);
        let base = reqwest::Url::parse("https://example.com/page").unwrap();
        let rendered = extract_links(&doc, &[], &base);
        assert!(rendered.contains("About: https://example.com/about"));
    }
}
