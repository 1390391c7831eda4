//! Device channel: primitive UI actions against a phone or emulator screen,
//! addressed in physical pixels.

pub mod adb;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{QaError, QaResult};

/// Physical screen size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Raw result of one device command. `success == false` means the device rejected it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceOutcome {
    pub success: bool,
    pub output: String,
}

impl DeviceOutcome {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

/// Captured screen image (PNG or JPEG bytes) plus its pixel size.
#[derive(Debug, Clone)]
pub struct Screenshot {
    pub id: String,
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: chrono::DateTime<chrono::Utc>,
    /// Set once the image has been written to disk.
    pub path: Option<std::path::PathBuf>,
}

impl Screenshot {
    /// Decodes only to learn the dimensions; the original bytes are kept.
    pub fn from_bytes(bytes: Vec<u8>) -> QaResult<Self> {
        if bytes.is_empty() {
            return Err(QaError::Device("empty screenshot".into()));
        }
        let img = image::load_from_memory(&bytes)?;
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            width: img.width(),
            height: img.height(),
            bytes,
            captured_at: chrono::Utc::now(),
            path: None,
        })
    }

    /// Stable handle used in histories and verdicts: the file path when saved, else the id.
    pub fn reference(&self) -> String {
        self.path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| format!("screenshot:{}", self.id))
    }
}

/// ADB-equivalent device access. Every call must be bounded in time; an `Err`
/// means the channel itself is unusable (unreachable, timed out).
#[async_trait]
pub trait DeviceChannel: Send + Sync {
    async fn capture_screenshot(&self) -> QaResult<Screenshot>;

    async fn tap(&self, x: u32, y: u32) -> QaResult<DeviceOutcome>;

    async fn type_text(&self, text: &str) -> QaResult<DeviceOutcome>;

    async fn press_key(&self, name: &str) -> QaResult<DeviceOutcome>;

    async fn swipe(&self, x1: u32, y1: u32, x2: u32, y2: u32, duration_ms: u64) -> QaResult<DeviceOutcome>;

    async fn get_resolution(&self) -> QaResult<Resolution>;

    /// Brings an app to the foreground. Channels without app control succeed trivially.
    async fn launch_app(&self, _package: &str) -> QaResult<DeviceOutcome> {
        Ok(DeviceOutcome::ok("launch not supported by this channel"))
    }
}
