//! Shared fakes for unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::agent_engine::state::Region;
use crate::config::GatewayConfig;
use crate::device::Screenshot;
use crate::errors::{ProviderError, QaResult};
use crate::gateway::{ProviderGateway, RateLimiter};
use crate::llm::provider::LlmProvider;
use crate::llm::registry::ChainEntry;
use crate::llm::types::{CallConfig, ChatMessage, ContentPart, LlmResponse, MessageContent};
use crate::vision::encoder::VisionEncoder;
use crate::vision::types::{EncodedImage, VisualEvidence};

/// Provider answering from a fixed queue and recording the last user text of each call.
pub struct ScriptedProvider {
    name: String,
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(name: &str, replies: Vec<&str>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            replies: Mutex::new(replies.into_iter().map(String::from).collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

fn last_user_text(messages: &[ChatMessage]) -> String {
    let Some(last) = messages.iter().rev().find(|m| m.role == "user") else {
        return String::new();
    };
    match &last.content {
        MessageContent::Text(t) => t.clone(),
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                ContentPart::ImageUrl { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, messages: Vec<ChatMessage>, _cfg: &CallConfig) -> Result<LlmResponse, ProviderError> {
        self.prompts.lock().unwrap().push(last_user_text(&messages));
        match self.replies.lock().unwrap().pop_front() {
            Some(content) => Ok(LlmResponse { content }),
            None => Err(ProviderError::auth(&self.name, "script exhausted")),
        }
    }
}

pub fn gateway(provider: Arc<ScriptedProvider>) -> Arc<ProviderGateway> {
    let entry = ChainEntry {
        provider,
        call: CallConfig {
            model: "scripted".into(),
            stream: false,
            temperature: 0.0,
            max_tokens: 256,
        },
        min_interval: Duration::ZERO,
    };
    let config = GatewayConfig {
        min_interval_ms: 0,
        max_retries: 0,
        ..GatewayConfig::default()
    };
    Arc::new(ProviderGateway::new(vec![entry], &config, RateLimiter::shared()).unwrap())
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([240, 240, 240]));
    let mut out = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
        .unwrap();
    out
}

pub fn screenshot() -> Screenshot {
    Screenshot::from_bytes(png(8, 16)).unwrap()
}

/// Vision stub: tiny fixed payload, every check matches.
pub struct StubVision;

#[async_trait]
impl VisionEncoder for StubVision {
    fn encode(&self, shot: &Screenshot) -> QaResult<EncodedImage> {
        Ok(EncodedImage {
            mime: "image/png".into(),
            base64: "c3R1Yg==".into(),
            width: shot.width,
            height: shot.height,
        })
    }

    async fn verify_text(&self, _shot: &Screenshot, target: &str) -> QaResult<VisualEvidence> {
        Ok(VisualEvidence {
            matched: true,
            evidence: format!("'{target}' visible"),
        })
    }

    async fn verify_element(&self, _shot: &Screenshot, descriptor: &str) -> QaResult<VisualEvidence> {
        Ok(VisualEvidence {
            matched: true,
            evidence: format!("{descriptor} visible"),
        })
    }

    async fn verify_color(&self, _shot: &Screenshot, _region: &Region, expected: &str) -> QaResult<VisualEvidence> {
        Ok(VisualEvidence {
            matched: true,
            evidence: format!("region is {expected}"),
        })
    }
}

pub fn vision() -> Arc<dyn VisionEncoder> {
    Arc::new(StubVision)
}
