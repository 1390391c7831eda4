//! Provider gateway: the only path from the agents to a model.
//!
//! A request walks an ordered provider chain. Each provider is rate limited,
//! retried with backoff on transient errors, and asked once to restate a reply
//! that fails to parse. Failover is sticky: once the gateway moves past a
//! provider it never returns to it for the rest of the run.

pub mod parse;
pub mod rate_limit;
pub mod retry;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::GatewayConfig;
use crate::errors::{ProviderError, QaError, QaResult};
use crate::llm::registry::{ChainEntry, ProviderRegistry};
use crate::llm::types::{ChatMessage, ContentPart, ImageUrl, MessageContent};
use crate::vision::types::EncodedImage;

pub use parse::{ResponseSchema, SchemaTag};
pub use rate_limit::RateLimiter;
pub use retry::RetryPolicy;

/// A parsed reply plus where and how it was obtained.
#[derive(Debug, Clone)]
pub struct ProviderResponse<T> {
    pub payload: T,
    pub raw: String,
    pub provider: String,
    pub latency: Duration,
    /// HTTP attempts spent on this request across retries and clarification.
    pub attempts: u32,
}

pub struct ProviderGateway {
    chain: Vec<ChainEntry>,
    active: AtomicUsize,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl ProviderGateway {
    pub fn new(chain: Vec<ChainEntry>, config: &GatewayConfig, limiter: Arc<RateLimiter>) -> QaResult<Self> {
        if chain.is_empty() {
            return Err(QaError::Config("provider chain is empty".into()));
        }
        Ok(Self {
            chain,
            active: AtomicUsize::new(0),
            limiter,
            retry: RetryPolicy::from_config(config),
            timeout: config.request_timeout(),
        })
    }

    pub fn from_registry(
        registry: &ProviderRegistry,
        config: &GatewayConfig,
        limiter: Arc<RateLimiter>,
    ) -> QaResult<Self> {
        Self::new(registry.chain()?, config, limiter)
    }

    /// Name of the provider new requests start from, `None` once the chain is spent.
    pub fn active_provider(&self) -> Option<&str> {
        self.chain
            .get(self.active.load(Ordering::SeqCst))
            .map(|e| e.provider.name())
    }

    pub fn is_exhausted(&self) -> bool {
        self.active.load(Ordering::SeqCst) >= self.chain.len()
    }

    /// Sends `prompt` (and optionally a screenshot) and parses the reply as `T`.
    pub async fn request<T: ResponseSchema>(
        &self,
        prompt: &str,
        image: Option<&EncodedImage>,
    ) -> Result<ProviderResponse<T>, ProviderError> {
        let started = Instant::now();
        let mut last_error: Option<ProviderError> = None;

        loop {
            let idx = self.active.load(Ordering::SeqCst);
            let Some(entry) = self.chain.get(idx) else {
                let message = match last_error {
                    Some(e) => format!("all {} providers failed, last error: {e}", self.chain.len()),
                    None => format!("all {} providers already failed earlier in this run", self.chain.len()),
                };
                tracing::error!(%message, "provider chain exhausted");
                return Err(ProviderError::exhausted_chain(message));
            };

            match self.request_from::<T>(entry, prompt, image).await {
                Ok((payload, raw, attempts)) => {
                    let latency = started.elapsed();
                    tracing::info!(
                        provider = entry.provider.name(),
                        schema = T::TAG.as_str(),
                        attempts,
                        latency_ms = latency.as_millis() as u64,
                        "provider request succeeded"
                    );
                    return Ok(ProviderResponse {
                        payload,
                        raw,
                        provider: entry.provider.name().to_string(),
                        latency,
                        attempts,
                    });
                }
                Err(e) if e.triggers_failover() => {
                    let next = self.chain.get(idx + 1).map(|n| n.provider.name()).unwrap_or("<none>");
                    tracing::warn!(
                        from = entry.provider.name(),
                        to = next,
                        error = %e,
                        "failing over to next provider"
                    );
                    // Another request may already have advanced past `idx`.
                    let _ = self
                        .active
                        .compare_exchange(idx, idx + 1, Ordering::SeqCst, Ordering::SeqCst);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One provider's full treatment: retries, then a single clarification round.
    async fn request_from<T: ResponseSchema>(
        &self,
        entry: &ChainEntry,
        prompt: &str,
        image: Option<&EncodedImage>,
    ) -> Result<(T, String, u32), ProviderError> {
        let mut messages = vec![first_message(entry, prompt, image)];
        let mut attempts = 0;

        let raw = self.call_with_retry(entry, &messages, &mut attempts).await?;
        let reason = match parse::parse_reply::<T>(&raw) {
            Ok(payload) => return Ok((payload, raw, attempts)),
            Err(reason) => reason,
        };

        tracing::warn!(
            provider = entry.provider.name(),
            schema = T::TAG.as_str(),
            %reason,
            "malformed reply, asking once for clarification"
        );
        messages.push(ChatMessage::assistant(raw));
        messages.push(ChatMessage::user(MessageContent::Text(parse::clarification_prompt(
            T::TAG, &reason,
        ))));

        let raw = self.call_with_retry(entry, &messages, &mut attempts).await?;
        match parse::parse_reply::<T>(&raw) {
            Ok(payload) => Ok((payload, raw, attempts)),
            Err(reason) => Err(ProviderError::malformed(
                entry.provider.name(),
                format!("still malformed after clarification: {reason}"),
            )),
        }
    }

    async fn call_with_retry(
        &self,
        entry: &ChainEntry,
        messages: &[ChatMessage],
        attempts: &mut u32,
    ) -> Result<String, ProviderError> {
        let name = entry.provider.name();
        let mut retry = 0;
        loop {
            self.limiter.acquire(name, entry.min_interval).await;
            *attempts += 1;

            let result = match tokio::time::timeout(self.timeout, entry.provider.chat(messages.to_vec(), &entry.call)).await {
                Ok(r) => r.map(|resp| resp.content),
                Err(_) => Err(ProviderError::transient(
                    name,
                    format!("no response within {:?}", self.timeout),
                )),
            };

            match result {
                Ok(content) => return Ok(content),
                Err(e) if e.is_retryable() && retry < self.retry.max_retries => {
                    let delay = self.retry.delay_with_hint(retry, e.retry_after);
                    tracing::warn!(
                        provider = name,
                        error = %e,
                        retry = retry + 1,
                        max = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "retrying provider"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn first_message(entry: &ChainEntry, prompt: &str, image: Option<&EncodedImage>) -> ChatMessage {
    match image {
        Some(img) if entry.provider.supports_images() => ChatMessage::user(MessageContent::Parts(vec![
            ContentPart::Text {
                text: prompt.to_string(),
            },
            ContentPart::ImageUrl {
                image_url: ImageUrl { url: img.data_uri() },
            },
        ])),
        Some(img) => ChatMessage::user(MessageContent::Text(format!("{prompt}{}", img.inline_text()))),
        None => ChatMessage::user(MessageContent::Text(prompt.to_string())),
    }
}
