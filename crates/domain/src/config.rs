use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub kernel: KernelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

impl Config {
    /// Load config from a TOML file, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM providers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// The provider used when the request does not name one.
    #[serde(default = "d_default_provider")]
    pub default: String,
    /// Provider id → endpoint settings. Every entry is OpenAI-compatible.
    #[serde(default = "d_providers")]
    pub providers: HashMap<String, ProviderConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default: d_default_provider(),
            providers: d_providers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    pub model: String,
    /// API key, or empty to read from `api_key_env`.
    #[serde(default)]
    pub api_key: String,
    /// Environment variable consulted when `api_key` is empty.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "d_temperature")]
    pub temperature: f32,
    #[serde(default = "d_max_tokens")]
    pub max_tokens: u32,
}

impl ProviderConfig {
    /// Resolve the API key from config or environment.
    pub fn resolve_api_key(&self) -> String {
        if !self.api_key.is_empty() {
            return self.api_key.clone();
        }
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "d_embed_url")]
    pub base_url: String,
    #[serde(default = "d_embed_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "d_embed_key_env")]
    pub api_key_env: Option<String>,
    #[serde(default = "d_embed_dim")]
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: d_embed_url(),
            model: d_embed_model(),
            api_key: String::new(),
            api_key_env: d_embed_key_env(),
            dimension: d_embed_dim(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Database (vector-search read path)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DatabaseConfig {
    /// Postgres URL. Empty disables knowledge search.
    #[serde(default)]
    pub url: String,
    #[serde(default = "d_db_pool")]
    pub max_connections: u32,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Kernel lifecycle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Interpreter binary used to spawn workers.
    #[serde(default = "d_python")]
    pub python_bin: String,
    /// Idle kernels older than this are evicted by the sweeper.
    #[serde(default = "d_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// Sweeper tick interval.
    #[serde(default = "d_cleanup_interval")]
    pub cleanup_interval_secs: u64,
    /// Default per-call execution cap for direct cell execution.
    #[serde(default = "d_exec_timeout")]
    pub exec_timeout_secs: u64,
    /// Execution cap for agent-driven executes (notebook_execute).
    #[serde(default = "d_agent_exec_timeout")]
    pub agent_exec_timeout_secs: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            python_bin: d_python(),
            idle_timeout_secs: d_idle_timeout(),
            cleanup_interval_secs: d_cleanup_interval(),
            exec_timeout_secs: d_exec_timeout(),
            agent_exec_timeout_secs: d_agent_exec_timeout(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent / tools / history
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "d_max_iterations")]
    pub max_iterations: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: d_max_iterations(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Serper API key for web search; empty falls back to HTML scraping.
    #[serde(default)]
    pub serper_api_key: String,
    #[serde(default = "d_search_timeout")]
    pub web_search_timeout_secs: u64,
    #[serde(default = "d_scrape_timeout")]
    pub web_scrape_timeout_secs: u64,
    #[serde(default = "d_scrape_max_chars")]
    pub web_scrape_max_chars: usize,
    #[serde(default = "d_pip_timeout")]
    pub pip_timeout_secs: u64,
}

impl ToolsConfig {
    pub fn resolve_serper_key(&self) -> String {
        if !self.serper_api_key.is_empty() {
            return self.serper_api_key.clone();
        }
        std::env::var("SERPER_API_KEY").unwrap_or_default()
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            serper_api_key: String::new(),
            web_search_timeout_secs: d_search_timeout(),
            web_scrape_timeout_secs: d_scrape_timeout(),
            web_scrape_max_chars: d_scrape_max_chars(),
            pip_timeout_secs: d_pip_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Ring-buffer cap per (user, notebook) agent history.
    #[serde(default = "d_history_cap")]
    pub max_messages: usize,
    /// Messages retained after an overflow trim.
    #[serde(default = "d_history_keep")]
    pub keep_on_overflow: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_messages: d_history_cap(),
            keep_on_overflow: d_history_keep(),
        }
    }
}

// ── Serde default helpers ──────────────────────────────────────────

fn d_host() -> String {
    "0.0.0.0".into()
}
fn d_port() -> u16 {
    8000
}
fn d_default_provider() -> String {
    "deepseek".into()
}
fn d_providers() -> HashMap<String, ProviderConfig> {
    let mut m = HashMap::new();
    m.insert(
        "deepseek".into(),
        ProviderConfig {
            base_url: "https://api.deepseek.com".into(),
            model: "deepseek-chat".into(),
            api_key: String::new(),
            api_key_env: Some("DEEPSEEK_API_KEY".into()),
            temperature: d_temperature(),
            max_tokens: d_max_tokens(),
        },
    );
    m
}
fn d_temperature() -> f32 {
    0.7
}
fn d_max_tokens() -> u32 {
    4096
}
fn d_embed_url() -> String {
    "https://dashscope.aliyuncs.com/compatible-mode/v1".into()
}
fn d_embed_model() -> String {
    "text-embedding-v2".into()
}
fn d_embed_key_env() -> Option<String> {
    Some("EMBEDDING_API_KEY".into())
}
fn d_embed_dim() -> usize {
    1536
}
fn d_db_pool() -> u32 {
    5
}
fn d_python() -> String {
    "python3".into()
}
fn d_idle_timeout() -> u64 {
    7200
}
fn d_cleanup_interval() -> u64 {
    3600
}
fn d_exec_timeout() -> u64 {
    30
}
fn d_agent_exec_timeout() -> u64 {
    60
}
fn d_max_iterations() -> u32 {
    5
}
fn d_search_timeout() -> u64 {
    15
}
fn d_scrape_timeout() -> u64 {
    30
}
fn d_scrape_max_chars() -> usize {
    5000
}
fn d_pip_timeout() -> u64 {
    300
}
fn d_history_cap() -> usize {
    100
}
fn d_history_keep() -> usize {
    50
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.server.port, 8000);
        assert_eq!(cfg.kernel.idle_timeout_secs, 7200);
        assert_eq!(cfg.kernel.cleanup_interval_secs, 3600);
        assert_eq!(cfg.agent.max_iterations, 5);
        assert_eq!(cfg.history.max_messages, 100);
        assert_eq!(cfg.history.keep_on_overflow, 50);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [server]
            port = 9000

            [llm.providers.local]
            base_url = "http://localhost:11434/v1"
            model = "llama3"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.llm.providers["local"].model, "llama3");
        assert_eq!(cfg.llm.providers["local"].temperature, 0.7);
        assert_eq!(cfg.tools.web_search_timeout_secs, 15);
    }

    #[test]
    fn api_key_prefers_literal_over_env() {
        let p = ProviderConfig {
            base_url: "http://x".into(),
            model: "m".into(),
            api_key: "sk-literal".into(),
            api_key_env: Some("SOME_UNSET_VAR_XYZ".into()),
            temperature: 0.7,
            max_tokens: 4096,
        };
        assert_eq!(p.resolve_api_key(), "sk-literal");
    }
}
