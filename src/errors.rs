use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Planner error: {0}")]
    Planner(#[from] PlannerError),

    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("Supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Vision error: {0}")]
    Vision(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Run cancelled")]
    Cancelled,
}

impl serde::Serialize for QaError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type QaResult<T> = Result<T, QaError>;

// ── Provider gateway ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    RateLimited,
    Transient,
    MalformedResponse,
    ExhaustedChain,
    Auth,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProviderErrorKind::RateLimited => "rate limited",
            ProviderErrorKind::Transient => "transient failure",
            ProviderErrorKind::MalformedResponse => "malformed response",
            ProviderErrorKind::ExhaustedChain => "provider chain exhausted",
            ProviderErrorKind::Auth => "authentication rejected",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Error)]
#[error("{provider}: {kind}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub provider: String,
    pub message: String,
    /// Server-suggested wait before the next attempt (HTTP `Retry-After`).
    pub retry_after: Option<Duration>,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            provider: provider.into(),
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn rate_limited(provider: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            retry_after,
            ..Self::new(ProviderErrorKind::RateLimited, provider, "429 Too Many Requests")
        }
    }

    pub fn transient(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Transient, provider, message)
    }

    pub fn auth(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Auth, provider, message)
    }

    pub fn malformed(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::MalformedResponse, provider, message)
    }

    pub fn exhausted_chain(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::ExhaustedChain, "chain", message)
    }

    /// Retried in place against the same provider.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, ProviderErrorKind::Transient | ProviderErrorKind::RateLimited)
    }

    /// Moves the gateway to the next chain entry once retries are spent.
    pub fn triggers_failover(&self) -> bool {
        matches!(
            self.kind,
            ProviderErrorKind::Auth | ProviderErrorKind::Transient | ProviderErrorKind::RateLimited
        )
    }
}

// ── Agents ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Error)]
pub enum PlannerError {
    #[error("invalid action: {reason}")]
    InvalidAction { reason: String },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("screenshot encoding failed: {0}")]
    Vision(String),
}

#[derive(Debug, Clone, Error)]
pub enum ExecutorError {
    #[error("{consecutive} consecutive technical failures, last: {last_output}")]
    Technical { consecutive: u32, last_output: String },
}

#[derive(Debug, Clone, Error)]
pub enum SupervisorError {
    #[error("supervisor did not commit to a verdict: {0}")]
    AmbiguousVerdict(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("screenshot encoding failed: {0}")]
    Vision(String),
}
