//! Provider registry: builds one adapter per configured endpoint and
//! resolves the default for requests that do not name a provider.

use std::collections::HashMap;
use std::sync::Arc;

use cl_domain::config::{EmbeddingConfig, LlmConfig};
use cl_domain::error::{Error, Result};

use crate::openai_compat::OpenAiCompatProvider;
use crate::traits::LlmProvider;

pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    default_id: String,
    embedding: Arc<dyn LlmProvider>,
}

impl ProviderRegistry {
    pub fn from_config(llm: &LlmConfig, embedding: &EmbeddingConfig) -> Result<Self> {
        let mut providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();

        for (id, cfg) in &llm.providers {
            match OpenAiCompatProvider::from_config(id, cfg) {
                Ok(p) => {
                    tracing::info!(provider = %id, model = %cfg.model, "registered LLM provider");
                    providers.insert(id.clone(), Arc::new(p));
                }
                Err(e) => {
                    tracing::warn!(provider = %id, error = %e, "skipping provider");
                }
            }
        }

        if !providers.contains_key(&llm.default) {
            return Err(Error::Config(format!(
                "default LLM provider '{}' is not configured",
                llm.default
            )));
        }

        let embedding: Arc<dyn LlmProvider> =
            Arc::new(OpenAiCompatProvider::embedding_from_config(embedding)?);

        Ok(Self {
            providers,
            default_id: llm.default.clone(),
            embedding,
        })
    }

    /// Resolve a provider by id, or the default when `None`.
    pub fn get(&self, id: Option<&str>) -> Result<Arc<dyn LlmProvider>> {
        let id = id.unwrap_or(&self.default_id);
        self.providers
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("LLM provider '{id}'")))
    }

    /// The embeddings endpoint (may be a different vendor than chat).
    pub fn embedding(&self) -> Arc<dyn LlmProvider> {
        self.embedding.clone()
    }

    pub fn default_id(&self) -> &str {
        &self.default_id
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cl_domain::config::Config;

    #[test]
    fn registry_builds_from_default_config() {
        let cfg = Config::default();
        let reg = ProviderRegistry::from_config(&cfg.llm, &cfg.embedding).unwrap();
        assert_eq!(reg.default_id(), "deepseek");
        assert!(reg.get(None).is_ok());
        assert!(reg.get(Some("missing")).is_err());
    }

    #[test]
    fn unknown_default_is_a_config_error() {
        let mut cfg = Config::default();
        cfg.llm.default = "nope".into();
        assert!(ProviderRegistry::from_config(&cfg.llm, &cfg.embedding).is_err());
    }
}
