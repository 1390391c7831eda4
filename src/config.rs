use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{QaError, QaResult};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub vision: VisionConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Ordered provider ids; the first entry is used until it fails over.
    pub chain: Vec<String>,
    pub providers: HashMap<String, ProviderEntry>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        let mut providers = HashMap::new();
        providers.insert(
            "openrouter".to_string(),
            ProviderEntry {
                display_name: "OpenRouter".into(),
                api_base: "https://openrouter.ai/api/v1/chat/completions".into(),
                model: "google/gemini-2.0-flash-exp:free".into(),
                temperature: default_temperature(),
                max_tokens: default_max_tokens(),
                supports_images: true,
                stream: false,
                api_key: None,
                min_interval_ms: None,
            },
        );
        Self {
            chain: vec!["openrouter".into()],
            providers,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub display_name: String,
    pub api_base: String,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// False for text-only endpoints: screenshots are inlined into the prompt instead.
    #[serde(default = "default_true")]
    pub supports_images: bool,
    #[serde(default)]
    pub stream: bool,
    /// Optional API key stored in config.toml (falls back to env var MOBILE_QA_<ID>_API_KEY).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Overrides `gateway.min_interval_ms` for this provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_interval_ms: Option<u64>,
}

fn default_temperature() -> f64 {
    0.1
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub min_interval_ms: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 2500,
            max_retries: 3,
            backoff_base_ms: 2000,
            backoff_cap_ms: 30_000,
            request_timeout_secs: 45,
        }
    }
}

impl GatewayConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub max_steps: u32,
    pub planner_history_window: usize,
    pub supervisor_history_window: usize,
    pub max_consecutive_technical_failures: u32,
    /// UI settling time between an action and the screenshot refresh.
    pub settle_delay_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 15,
            planner_history_window: 5,
            supervisor_history_window: 15,
            max_consecutive_technical_failures: 3,
            settle_delay_ms: 1500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub adb_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    pub command_timeout_secs: u64,
    /// Used when `wm size` cannot be parsed.
    pub fallback_resolution: (u32, u32),
    /// Launched before each test case when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_package: Option<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            adb_path: "adb".into(),
            serial: None,
            command_timeout_secs: 10,
            fallback_resolution: (1080, 2400),
            app_package: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub max_dimension: u32,
    pub jpeg_quality: u8,
    /// Max RGB distance for `#rrggbb` colour checks.
    pub color_tolerance: f64,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            max_dimension: 1920,
            jpeg_quality: 85,
            color_tolerance: 60.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OutputConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results_dir: Option<PathBuf>,
    pub save_screenshots: bool,
}

impl OutputConfig {
    /// `results_dir` if set, else `<data dir>/mobile-qa/results`, else `./results`.
    pub fn resolved_results_dir(&self) -> PathBuf {
        if let Some(dir) = &self.results_dir {
            return dir.clone();
        }
        dirs::data_local_dir()
            .map(|d| d.join("mobile-qa").join("results"))
            .unwrap_or_else(|| PathBuf::from("results"))
    }
}

impl AppConfig {
    /// API key for a provider: env var first, then the config file.
    pub fn api_key_for(&self, id: &str) -> Option<String> {
        std::env::var(api_key_env_var(id))
            .ok()
            .filter(|k| !k.is_empty())
            .or_else(|| self.llm.providers.get(id).and_then(|p| p.api_key.clone()))
    }

    /// Returns human-readable problems; empty when the config is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.llm.chain.is_empty() {
            problems.push("llm.chain is empty".to_string());
        }
        for id in &self.llm.chain {
            if !self.llm.providers.contains_key(id) {
                problems.push(format!("llm.chain references unknown provider '{id}'"));
            } else if self.api_key_for(id).is_none() {
                problems.push(format!(
                    "no API key for provider '{id}' (set {} or llm.providers.{id}.api_key)",
                    api_key_env_var(id)
                ));
            }
        }
        if self.agent.max_steps == 0 {
            problems.push("agent.max_steps must be at least 1".to_string());
        }
        problems
    }
}

pub fn api_key_env_var(id: &str) -> String {
    format!("MOBILE_QA_{}_API_KEY", id.to_uppercase().replace('-', "_"))
}

fn resolve_config_path() -> QaResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    Err(QaError::Config(
        "config.toml not found next to executable or in working directory".into(),
    ))
}

pub fn load_config() -> QaResult<AppConfig> {
    let path = resolve_config_path()?;
    load_config_from(&path)
}

pub fn load_config_from(path: &Path) -> QaResult<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), chain = ?config.llm.chain, "config loaded");
    Ok(config)
}

pub fn save_config(config: &AppConfig, path: &Path) -> QaResult<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn partial_file_fills_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [llm]
            chain = ["primary", "backup"]

            [llm.providers.primary]
            display_name = "Primary"
            api_base = "http://localhost:1/v1/chat/completions"
            model = "vision-large"

            [llm.providers.backup]
            display_name = "Backup"
            api_base = "http://localhost:2/v1/chat/completions"
            model = "vision-small"
            supports_images = false
            min_interval_ms = 100

            [agent]
            max_steps = 4
            "#,
        )
        .unwrap();

        assert_eq!(cfg.llm.chain, vec!["primary".to_string(), "backup".to_string()]);
        assert!(cfg.llm.providers["primary"].supports_images);
        assert!(!cfg.llm.providers["backup"].supports_images);
        assert_eq!(cfg.llm.providers["backup"].min_interval_ms, Some(100));
        assert_eq!(cfg.agent.max_steps, 4);
        assert_eq!(cfg.agent.planner_history_window, 5);
        assert_eq!(cfg.gateway.min_interval_ms, 2500);
        assert_eq!(cfg.device.fallback_resolution, (1080, 2400));
    }

    #[test]
    fn validate_reports_unknown_chain_entries() {
        let mut cfg = AppConfig::default();
        cfg.llm.chain.push("ghost".into());
        let problems = cfg.validate();
        assert!(problems.iter().any(|p| p.contains("unknown provider 'ghost'")));
    }

    #[test]
    fn config_key_is_used_when_env_is_unset() {
        let mut cfg = AppConfig::default();
        cfg.llm.providers.insert(
            "cfgkeyonly".into(),
            ProviderEntry {
                display_name: "Cfg".into(),
                api_base: "http://localhost".into(),
                model: "m".into(),
                temperature: 0.1,
                max_tokens: 16,
                supports_images: true,
                stream: false,
                api_key: Some("sk-file".into()),
                min_interval_ms: None,
            },
        );
        assert_eq!(cfg.api_key_for("cfgkeyonly").as_deref(), Some("sk-file"));
        assert_eq!(api_key_env_var("my-llm"), "MOBILE_QA_MY_LLM_API_KEY");
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut cfg = AppConfig::default();
        cfg.device.serial = Some("emulator-5554".into());
        save_config(&cfg, &path).unwrap();

        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.device.serial.as_deref(), Some("emulator-5554"));
        assert_eq!(loaded.llm.chain, cfg.llm.chain);
    }
}
