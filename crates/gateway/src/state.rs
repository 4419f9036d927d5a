//! Shared application state passed to all API handlers.

use std::sync::Arc;
use std::time::Duration;

use cl_agent::ReActAgent;
use cl_domain::config::Config;
use cl_domain::error::Result;
use cl_kernel::KernelRegistry;
use cl_notebook::NotebookStore;
use cl_providers::ProviderRegistry;
use cl_sessions::{AgentHistory, ConversationStore};
use cl_tools::{
    CalculatorTool, CodeAnalysisTool, DateTimeTool, KnowledgeSearchTool, LiteratureSearchTool,
    NotebookCellTool, NotebookExecuteTool, NotebookToolContext, NotebookVariablesTool,
    PipInstallTool, TextAnalysisTool, ToolRegistry, UnitConverterTool, WebScrapeTool,
    WebSearchTool,
};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub llm: Arc<ProviderRegistry>,
    pub kernels: Arc<KernelRegistry>,
    pub notebooks: Arc<NotebookStore>,
    pub conversations: Arc<ConversationStore>,
    pub history: Arc<AgentHistory>,
    /// Postgres pool for the knowledge-search read path. `None` when no
    /// database is configured; the tool is simply not registered then.
    pub db: Option<sqlx::PgPool>,
}

impl AppState {
    pub fn new(config: Arc<Config>, db: Option<sqlx::PgPool>) -> Result<Self> {
        let llm = Arc::new(ProviderRegistry::from_config(
            &config.llm,
            &config.embedding,
        )?);
        let kernels = Arc::new(KernelRegistry::new(config.kernel.clone()));

        Ok(Self {
            config: config.clone(),
            llm,
            kernels,
            notebooks: Arc::new(NotebookStore::new()),
            conversations: Arc::new(ConversationStore::new()),
            history: Arc::new(AgentHistory::new(&config.history)),
            db,
        })
    }

    /// The general-purpose tool set available in every conversation.
    pub fn base_tools(&self, user_id: i64) -> ToolRegistry {
        let tools_cfg = &self.config.tools;
        let mut registry = ToolRegistry::new();

        registry.register(Arc::new(CalculatorTool));
        registry.register(Arc::new(DateTimeTool));
        registry.register(Arc::new(UnitConverterTool));
        registry.register(Arc::new(TextAnalysisTool));
        registry.register(Arc::new(CodeAnalysisTool));
        registry.register(Arc::new(WebSearchTool::new(
            tools_cfg.resolve_serper_key(),
            Duration::from_secs(tools_cfg.web_search_timeout_secs),
        )));
        registry.register(Arc::new(LiteratureSearchTool::new(Duration::from_secs(30))));

        if let Some(pool) = &self.db {
            registry.register(Arc::new(KnowledgeSearchTool::new(
                pool.clone(),
                self.llm.embedding(),
                user_id,
            )));
        }

        registry
    }

    /// The notebook tool set: base tools plus the privileged tools bound
    /// to this notebook's kernel and store. `authorized` is baked in at
    /// construction; an unauthorized registry cannot mutate anything.
    pub fn notebook_tools(
        &self,
        user_id: i64,
        notebook_id: Uuid,
        authorized: bool,
    ) -> ToolRegistry {
        let mut registry = self.base_tools(user_id);
        let tools_cfg = &self.config.tools;
        let kernel_cfg = &self.config.kernel;

        let ctx = Arc::new(NotebookToolContext {
            kernel: self.kernels.get_or_create(&notebook_id.to_string()),
            store: self.notebooks.clone(),
            notebook_id,
            authorized,
            exec_timeout: Duration::from_secs(kernel_cfg.agent_exec_timeout_secs),
        });

        registry.register(Arc::new(NotebookExecuteTool::new(ctx.clone())));
        registry.register(Arc::new(NotebookCellTool::new(ctx.clone())));
        registry.register(Arc::new(NotebookVariablesTool::new(ctx)));
        registry.register(Arc::new(PipInstallTool::new(
            authorized,
            kernel_cfg.python_bin.clone(),
            Duration::from_secs(tools_cfg.pip_timeout_secs),
        )));
        registry.register(Arc::new(WebScrapeTool::new(
            Duration::from_secs(tools_cfg.web_scrape_timeout_secs),
            tools_cfg.web_scrape_max_chars,
        )));

        registry
    }

    /// Build a ReAct agent over the given registry.
    pub fn agent(
        &self,
        provider: Option<&str>,
        tools: ToolRegistry,
    ) -> Result<ReActAgent> {
        let provider = self.llm.get(provider)?;
        Ok(ReActAgent::new(
            provider,
            Arc::new(tools),
            self.config.agent.max_iterations,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AppState {
        AppState::new(Arc::new(Config::default()), None).unwrap()
    }

    #[test]
    fn base_tools_exclude_knowledge_without_db() {
        let registry = state().base_tools(1);
        assert!(registry.get("calculator").is_some());
        assert!(registry.get("web_search").is_some());
        assert!(registry.get("knowledge_search").is_none());
        assert!(registry.get("notebook_execute").is_none());
    }

    #[test]
    fn notebook_tools_include_privileged_set() {
        let state = state();
        let nb = state.notebooks.create(1, "t", None, vec![]);
        let registry = state.notebook_tools(1, nb.id, true);
        for name in [
            "notebook_execute",
            "notebook_cell",
            "notebook_variables",
            "pip_install",
            "web_scrape",
        ] {
            assert!(registry.get(name).is_some(), "{name} missing");
        }
    }
}
