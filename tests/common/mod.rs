#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use mobile_qa_agent::agent_engine::engine::Orchestrator;
use mobile_qa_agent::config::{AgentConfig, GatewayConfig, VisionConfig};
use mobile_qa_agent::device::{DeviceChannel, DeviceOutcome, Resolution, Screenshot};
use mobile_qa_agent::errors::{ProviderError, QaError, QaResult};
use mobile_qa_agent::gateway::{ProviderGateway, RateLimiter};
use mobile_qa_agent::llm::provider::LlmProvider;
use mobile_qa_agent::llm::registry::ChainEntry;
use mobile_qa_agent::llm::types::{CallConfig, ChatMessage, ContentPart, LlmResponse, MessageContent};
use mobile_qa_agent::vision::ScreenVision;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Planner,
    Supervisor,
    Vision,
}

fn role_of(prompt: &str) -> Role {
    if prompt.contains("supervisor of a mobile QA test") {
        Role::Supervisor
    } else if prompt.contains("single next UI action") {
        Role::Planner
    } else {
        Role::Vision
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
                ContentPart::Text { text } => Some(text.clone()),
                ContentPart::ImageUrl { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Model stand-in that answers by role: each role has a reply queue and an
/// optional reply repeated once the queue is empty.
pub struct ScriptedModel {
    name: String,
    queues: Mutex<[VecDeque<String>; 3]>,
    fallback: Mutex<[Option<String>; 3]>,
    calls: Mutex<Vec<Role>>,
}

fn slot(role: Role) -> usize {
    match role {
        Role::Planner => 0,
        Role::Supervisor => 1,
        Role::Vision => 2,
    }
}

impl ScriptedModel {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            queues: Mutex::new(Default::default()),
            fallback: Mutex::new(Default::default()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn reply(self: &Arc<Self>, role: Role, json: &str) -> &Arc<Self> {
        self.queues.lock().unwrap()[slot(role)].push_back(json.to_string());
        self
    }

    pub fn always(self: &Arc<Self>, role: Role, json: &str) -> &Arc<Self> {
        self.fallback.lock().unwrap()[slot(role)] = Some(json.to_string());
        self
    }

    pub fn calls(&self, role: Role) -> usize {
        self.calls.lock().unwrap().iter().filter(|r| **r == role).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmProvider for ScriptedModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, messages: Vec<ChatMessage>, _cfg: &CallConfig) -> Result<LlmResponse, ProviderError> {
        // Clarification and correction prompts carry the original prompt or its role marker.
        let first = messages.first().map(|m| last_user_text(std::slice::from_ref(m))).unwrap_or_default();
        let role = role_of(&first);
        self.calls.lock().unwrap().push(role);

        let queued = self.queues.lock().unwrap()[slot(role)].pop_front();
        let content = queued.or_else(|| self.fallback.lock().unwrap()[slot(role)].clone());
        match content {
            Some(content) => Ok(LlmResponse { content }),
            None => Err(ProviderError::auth(&self.name, format!("no scripted reply for {role:?}"))),
        }
    }
}

/// Provider that always rejects the credentials.
pub struct RejectingProvider {
    pub name: String,
    pub calls: AtomicUsize,
}

impl RejectingProvider {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl LlmProvider for RejectingProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, _messages: Vec<ChatMessage>, _cfg: &CallConfig) -> Result<LlmResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ProviderError::auth(&self.name, "401 Unauthorized"))
    }
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        if y < height / 10 {
            image::Rgb([220, 40, 40])
        } else {
            image::Rgb([(x % 255) as u8, 200, 230])
        }
    });
    let mut out = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
        .unwrap();
    out
}

/// In-memory phone: 1080x2400, records every command, failures on demand.
#[derive(Default)]
pub struct MockDevice {
    pub log: Mutex<Vec<String>>,
    pub reject_input: bool,
    pub offline: bool,
}

impl MockDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn rejecting() -> Arc<Self> {
        Arc::new(Self {
            reject_input: true,
            ..Self::default()
        })
    }

    pub fn offline() -> Arc<Self> {
        Arc::new(Self {
            offline: true,
            ..Self::default()
        })
    }

    pub fn commands(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.commands().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn input(&self, cmd: String) -> QaResult<DeviceOutcome> {
        self.log.lock().unwrap().push(cmd);
        if self.offline {
            Err(QaError::Device("device not found".into()))
        } else if self.reject_input {
            Ok(DeviceOutcome::failed("input rejected by device"))
        } else {
            Ok(DeviceOutcome::ok(""))
        }
    }
}

#[async_trait]
impl DeviceChannel for MockDevice {
    async fn capture_screenshot(&self) -> QaResult<Screenshot> {
        self.log.lock().unwrap().push("screencap".into());
        Screenshot::from_bytes(png(108, 240))
    }

    async fn tap(&self, x: u32, y: u32) -> QaResult<DeviceOutcome> {
        self.input(format!("tap {x} {y}"))
    }

    async fn type_text(&self, text: &str) -> QaResult<DeviceOutcome> {
        self.input(format!("text {text}"))
    }

    async fn press_key(&self, name: &str) -> QaResult<DeviceOutcome> {
        self.input(format!("key {name}"))
    }

    async fn swipe(&self, x1: u32, y1: u32, x2: u32, y2: u32, duration_ms: u64) -> QaResult<DeviceOutcome> {
        self.input(format!("swipe {x1} {y1} {x2} {y2} {duration_ms}"))
    }

    async fn get_resolution(&self) -> QaResult<Resolution> {
        Ok(Resolution::new(1080, 2400))
    }

    async fn launch_app(&self, package: &str) -> QaResult<DeviceOutcome> {
        self.input(format!("launch {package}"))
    }
}

pub fn entry(provider: Arc<dyn LlmProvider>) -> ChainEntry {
    ChainEntry {
        provider,
        call: CallConfig {
            model: "test-model".into(),
            stream: false,
            temperature: 0.0,
            max_tokens: 512,
        },
        min_interval: Duration::ZERO,
    }
}

pub fn gateway(chain: Vec<Arc<dyn LlmProvider>>) -> Arc<ProviderGateway> {
    let config = GatewayConfig {
        min_interval_ms: 0,
        max_retries: 1,
        backoff_base_ms: 1,
        backoff_cap_ms: 2,
        request_timeout_secs: 5,
    };
    let chain = chain.into_iter().map(entry).collect();
    Arc::new(ProviderGateway::new(chain, &config, RateLimiter::shared()).unwrap())
}

pub fn agent_config(max_steps: u32) -> AgentConfig {
    AgentConfig {
        max_steps,
        settle_delay_ms: 0,
        ..AgentConfig::default()
    }
}

pub fn orchestrator(gateway: Arc<ProviderGateway>, device: Arc<MockDevice>, max_steps: u32) -> Orchestrator {
    let vision = Arc::new(ScreenVision::new(gateway.clone(), VisionConfig::default()));
    Orchestrator::new(gateway, device, vision, agent_config(max_steps))
}

pub const CONTINUE: &str = r#"{"decision":"continue","rationale":"keep going"}"#;
pub const PASS: &str = r#"{"decision":"verdict","status":"pass","rationale":"goal reached"}"#;
pub const COMPLETE: &str = r#"{"action_type":"complete","verdict_hint":"pass","reasoning":"done"}"#;
