use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::StatusCode;

use crate::errors::ProviderError;
use crate::llm::provider::LlmProvider;
use crate::llm::sse_parser::{self, SseLineBuffer};
use crate::llm::types::{CallConfig, ChatMessage, LlmResponse, StreamChunkKind};

pub struct OpenAiCompatibleProvider {
    id: String,
    api_base: String,
    api_key: String,
    supports_images: bool,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(id: String, api_base: String, api_key: String, supports_images: bool) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            id,
            api_base,
            api_key,
            supports_images,
            client,
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.id
    }

    fn supports_images(&self) -> bool {
        self.supports_images
    }

    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        cfg: &CallConfig,
    ) -> Result<LlmResponse, ProviderError> {
        let body = serde_json::json!({
            "model": cfg.model,
            "messages": &messages,
            "stream": cfg.stream,
            "temperature": cfg.temperature,
            "max_tokens": cfg.max_tokens,
        });

        tracing::debug!(
            provider = %self.id,
            model = %cfg.model,
            stream = cfg.stream,
            "sending LLM request"
        );
        tracing::debug!(body = %sanitized_body(&body), "request body (sanitized, base64 omitted)");

        let response = self
            .client
            .post(&self.api_base)
            .bearer_auth(&self.api_key)
            .header("X-Title", "Mobile QA Agent")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::transient(&self.id, format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            // 429 is classified before the body is read; throttled bodies are not trusted.
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let err_body = response.text().await.unwrap_or_default();
            return Err(classify_status(&self.id, status, retry_after, &err_body));
        }

        if cfg.stream {
            self.handle_stream(response).await
        } else {
            self.handle_json(response).await
        }
    }
}

impl OpenAiCompatibleProvider {
    /// Accumulates SSE content deltas until `[DONE]` or a finish reason.
    async fn handle_stream(&self, response: reqwest::Response) -> Result<LlmResponse, ProviderError> {
        let mut byte_stream = response.bytes_stream();
        let mut lines = SseLineBuffer::new();
        let mut content = String::new();
        let mut reasoning_len = 0usize;
        let mut done = false;

        while let Some(result) = byte_stream.next().await {
            let bytes = result
                .map_err(|e| ProviderError::transient(&self.id, format!("stream interrupted: {e}")))?;
            for line in lines.push(&bytes) {
                if accumulate(&line, &mut content, &mut reasoning_len) {
                    done = true;
                    break;
                }
            }
            if done {
                break;
            }
        }
        if !done {
            if let Some(line) = lines.finish() {
                accumulate(&line, &mut content, &mut reasoning_len);
            }
        }

        tracing::info!(
            provider = %self.id,
            content_len = content.len(),
            reasoning_len,
            "LLM stream complete"
        );
        Ok(LlmResponse { content })
    }

    async fn handle_json(&self, response: reqwest::Response) -> Result<LlmResponse, ProviderError> {
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::transient(&self.id, format!("unreadable response body: {e}")))?;

        let Some(content) = json["choices"][0]["message"]["content"].as_str() else {
            return Err(ProviderError::transient(
                &self.id,
                "response envelope has no choices[0].message.content",
            ));
        };

        tracing::info!(provider = %self.id, content_len = content.len(), "LLM JSON response received");
        Ok(LlmResponse {
            content: content.trim().to_string(),
        })
    }
}

/// Folds one SSE line into the running content. Returns true once the stream is finished.
fn accumulate(line: &str, content: &mut String, reasoning_len: &mut usize) -> bool {
    match sse_parser::parse_sse_line(line) {
        Ok(Some(chunk)) => match chunk.kind {
            StreamChunkKind::Content => content.push_str(&chunk.content),
            StreamChunkKind::Reasoning => *reasoning_len += chunk.content.len(),
            StreamChunkKind::Done => return true,
        },
        Ok(None) => {}
        Err(e) => tracing::debug!("SSE parse skipped: {e}"),
    }
    false
}

fn classify_status(
    provider: &str,
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
) -> ProviderError {
    let message = format!("{status}: {}", truncate(body, 300));
    match status.as_u16() {
        429 => ProviderError {
            message,
            ..ProviderError::rate_limited(provider, retry_after)
        },
        401 | 403 => ProviderError::auth(provider, message),
        408 | 409 | 425 => ProviderError::transient(provider, message),
        s if s >= 500 => ProviderError::transient(provider, message),
        // Remaining client errors mean the request as configured is rejected; retrying cannot help.
        _ => ProviderError::auth(provider, message),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Clone of the body with base64 image payloads replaced, for logging only.
fn sanitized_body(body: &serde_json::Value) -> String {
    let mut log_body = body.clone();
    if let Some(msgs) = log_body.get_mut("messages").and_then(|m| m.as_array_mut()) {
        for msg in msgs {
            let Some(parts) = msg.get_mut("content").and_then(|c| c.as_array_mut()) else {
                continue;
            };
            for part in parts {
                if part.get("type").and_then(|t| t.as_str()) == Some("image_url") {
                    if let Some(url) = part.get_mut("image_url").and_then(|i| i.get_mut("url")) {
                        *url = serde_json::Value::String("<omitted_base64_image>".to_string());
                    }
                }
            }
        }
    }
    serde_json::to_string(&log_body).unwrap_or_default()
}
