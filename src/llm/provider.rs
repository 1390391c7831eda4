use async_trait::async_trait;

use crate::errors::ProviderError;
use crate::llm::types::{CallConfig, ChatMessage, LlmResponse};

/// Unified LLM provider trait. All providers implement this trait.
/// New providers only need to implement this trait and be listed in `llm.chain`.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Returns the provider's identifier (matches the config.toml key).
    /// Rate limiting is keyed on this value.
    fn name(&self) -> &str;

    /// Whether the endpoint accepts `image_url` content parts.
    fn supports_images(&self) -> bool {
        true
    }

    /// Sends one chat completion and returns the full assistant text.
    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        cfg: &CallConfig,
    ) -> Result<LlmResponse, ProviderError>;
}
