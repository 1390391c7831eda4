use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::errors::{QaError, QaResult};
use crate::llm::provider::LlmProvider;
use crate::llm::providers::openai_compatible::OpenAiCompatibleProvider;
use crate::llm::types::CallConfig;

/// One resolved position in the provider chain.
#[derive(Clone)]
pub struct ChainEntry {
    pub provider: Arc<dyn LlmProvider>,
    pub call: CallConfig,
    /// Minimum spacing between two calls to this provider.
    pub min_interval: Duration,
}

impl std::fmt::Debug for ChainEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainEntry")
            .field("provider", &self.provider.name())
            .field("model", &self.call.model)
            .field("min_interval", &self.min_interval)
            .finish()
    }
}

/// Registry of all available LLM providers, keyed by their config.toml identifier.
pub struct ProviderRegistry {
    providers: HashMap<String, ChainEntry>,
    chain: Vec<String>,
}

impl ProviderRegistry {
    pub fn new(chain: Vec<String>) -> Self {
        Self {
            providers: HashMap::new(),
            chain,
        }
    }

    pub fn register(&mut self, entry: ChainEntry) {
        self.providers.insert(entry.provider.name().to_string(), entry);
    }

    pub fn list_names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    /// Chain entries in configured order. Unknown ids are a configuration error.
    pub fn chain(&self) -> QaResult<Vec<ChainEntry>> {
        if self.chain.is_empty() {
            return Err(QaError::Config("provider chain is empty".into()));
        }
        self.chain
            .iter()
            .map(|id| {
                self.providers.get(id).cloned().ok_or_else(|| {
                    QaError::Config(format!("chain references unknown provider '{id}'"))
                })
            })
            .collect()
    }

    /// Build a registry from the loaded app config.
    /// API keys are read from `MOBILE_QA_<ID>_API_KEY`, then from the file.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut registry = Self::new(config.llm.chain.clone());
        for (id, entry) in &config.llm.providers {
            let api_key = config.api_key_for(id).unwrap_or_default();
            if api_key.is_empty() {
                tracing::warn!(provider = %id, "no API key configured");
            }
            let provider = OpenAiCompatibleProvider::new(
                id.clone(),
                entry.api_base.clone(),
                api_key,
                entry.supports_images,
            );
            let min_interval = entry
                .min_interval_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| config.gateway.min_interval());
            tracing::debug!(
                provider = %id,
                model = %entry.model,
                images = entry.supports_images,
                "registered provider"
            );
            registry.register(ChainEntry {
                provider: Arc::new(provider),
                call: CallConfig {
                    model: entry.model.clone(),
                    stream: entry.stream,
                    temperature: entry.temperature,
                    max_tokens: entry.max_tokens,
                },
                min_interval,
            });
        }
        registry
    }
}
