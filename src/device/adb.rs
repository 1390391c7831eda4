use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tokio::sync::OnceCell;

use crate::config::DeviceConfig;
use crate::device::{DeviceChannel, DeviceOutcome, Resolution, Screenshot};
use crate::errors::{QaError, QaResult};

/// Android device driven through the `adb` binary.
pub struct AdbDevice {
    adb_path: String,
    serial: Option<String>,
    timeout: Duration,
    fallback: Resolution,
    resolution: OnceCell<Resolution>,
}

struct CommandOutput {
    stdout: Vec<u8>,
    stderr: String,
    code: Option<i32>,
}

impl AdbDevice {
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            adb_path: config.adb_path.clone(),
            serial: config.serial.clone(),
            timeout: Duration::from_secs(config.command_timeout_secs.max(1)),
            fallback: Resolution::new(config.fallback_resolution.0, config.fallback_resolution.1),
            resolution: OnceCell::new(),
        }
    }

    async fn run(&self, args: &[&str]) -> QaResult<CommandOutput> {
        let mut cmd = Command::new(&self.adb_path);
        if let Some(serial) = &self.serial {
            cmd.arg("-s").arg(serial);
        }
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(args = ?args, "adb");
        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| QaError::Device(format!("adb {} timed out after {:?}", args.join(" "), self.timeout)))?
            .map_err(|e| QaError::Device(format!("failed to spawn {}: {e}", self.adb_path)))?;

        Ok(CommandOutput {
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            code: output.status.code(),
        })
    }

    async fn shell(&self, args: &[&str]) -> QaResult<DeviceOutcome> {
        let mut full = vec!["shell"];
        full.extend_from_slice(args);
        let out = self.run(&full).await?;
        let stdout = String::from_utf8_lossy(&out.stdout).trim().to_string();
        if out.code == Some(0) {
            Ok(DeviceOutcome::ok(stdout))
        } else {
            Ok(DeviceOutcome::failed(format!(
                "exit {:?}: {} {}",
                out.code, stdout, out.stderr
            )))
        }
    }

    async fn query_resolution(&self) -> Resolution {
        match self.shell(&["wm", "size"]).await {
            Ok(out) if out.success => parse_wm_size(&out.output).unwrap_or_else(|| {
                tracing::warn!(output = %out.output, "unparseable wm size, using fallback");
                self.fallback
            }),
            Ok(out) => {
                tracing::warn!(output = %out.output, "wm size failed, using fallback");
                self.fallback
            }
            Err(e) => {
                tracing::warn!(error = %e, "wm size errored, using fallback");
                self.fallback
            }
        }
    }
}

#[async_trait]
impl DeviceChannel for AdbDevice {
    async fn capture_screenshot(&self) -> QaResult<Screenshot> {
        let out = self.run(&["exec-out", "screencap", "-p"]).await?;
        if out.code != Some(0) {
            return Err(QaError::Device(format!("screencap failed: {}", out.stderr)));
        }
        Screenshot::from_bytes(out.stdout)
    }

    async fn tap(&self, x: u32, y: u32) -> QaResult<DeviceOutcome> {
        self.shell(&["input", "tap", &x.to_string(), &y.to_string()]).await
    }

    async fn type_text(&self, text: &str) -> QaResult<DeviceOutcome> {
        let mut outputs = Vec::new();
        for chunk in input_text_chunks(text) {
            let out = self.shell(&["input", "text", &chunk]).await?;
            if !out.success {
                return Ok(out);
            }
            outputs.push(out.output);
        }
        Ok(DeviceOutcome::ok(outputs.join("\n").trim().to_string()))
    }

    async fn press_key(&self, name: &str) -> QaResult<DeviceOutcome> {
        let Some(code) = keycode(name) else {
            return Ok(DeviceOutcome::failed(format!("unknown key: {name}")));
        };
        self.shell(&["input", "keyevent", &code.to_string()]).await
    }

    async fn swipe(&self, x1: u32, y1: u32, x2: u32, y2: u32, duration_ms: u64) -> QaResult<DeviceOutcome> {
        self.shell(&[
            "input",
            "swipe",
            &x1.to_string(),
            &y1.to_string(),
            &x2.to_string(),
            &y2.to_string(),
            &duration_ms.to_string(),
        ])
        .await
    }

    async fn get_resolution(&self) -> QaResult<Resolution> {
        Ok(*self.resolution.get_or_init(|| self.query_resolution()).await)
    }

    async fn launch_app(&self, package: &str) -> QaResult<DeviceOutcome> {
        self.shell(&[
            "monkey",
            "-p",
            package,
            "-c",
            "android.intent.category.LAUNCHER",
            "1",
        ])
        .await
    }
}

/// Android keycodes for the key names the planner may use.
pub const KEYCODES: &[(&str, u32)] = &[
    ("home", 3),
    ("back", 4),
    ("volume_up", 24),
    ("volume_down", 25),
    ("power", 26),
    ("tab", 61),
    ("space", 62),
    ("enter", 66),
    ("backspace", 67),
    ("delete", 67),
    ("del", 67),
    ("menu", 82),
    ("search", 84),
    ("escape", 111),
    ("esc", 111),
    ("app_switch", 187),
    ("recents", 187),
];

pub fn keycode(name: &str) -> Option<u32> {
    let name = name.trim().to_lowercase();
    KEYCODES.iter().find(|(n, _)| *n == name).map(|(_, code)| *code)
}

/// Escaped `input text` arguments for `text`. `input text` turns every `%s`
/// into a space and has no escape for it, so a literal `%s` is typed as two
/// commands split between the `%` and the `s`.
pub fn input_text_chunks(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        current.push(ch);
        if ch == '%' && chars.peek() == Some(&'s') {
            chunks.push(escape_input_text(&current));
            current.clear();
        }
    }
    if !current.is_empty() || chunks.is_empty() {
        chunks.push(escape_input_text(&current));
    }
    chunks
}

/// Parses `wm size` output; an override size wins over the physical size.
pub fn parse_wm_size(output: &str) -> Option<Resolution> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = RE
        .get_or_init(|| Regex::new(r"(?m)^(Physical|Override) size:\s*(\d+)x(\d+)").ok())
        .as_ref()?;

    let mut physical = None;
    let mut overridden = None;
    for caps in re.captures_iter(output) {
        let size = Resolution::new(caps[2].parse().ok()?, caps[3].parse().ok()?);
        match &caps[1] {
            "Override" => overridden = Some(size),
            _ => physical = Some(size),
        }
    }
    overridden.or(physical)
}
