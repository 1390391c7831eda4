// Action dispatcher: normalizes a planned action and drives the device channel.
use std::sync::Arc;
use std::time::Duration;

use crate::agent_engine::state::{Action, DeviceCommand, ExecutionResult, FailureClass, VerifyKind};
use crate::device::{DeviceChannel, DeviceOutcome, Resolution};
use crate::errors::{QaError, QaResult};
use crate::executor::coordinator::point_to_physical;
use crate::executor::safety::validate_action;
use crate::vision::encoder::VisionEncoder;

pub struct Executor {
    device: Arc<dyn DeviceChannel>,
    vision: Arc<dyn VisionEncoder>,
}

impl Executor {
    pub fn new(device: Arc<dyn DeviceChannel>, vision: Arc<dyn VisionEncoder>) -> Self {
        Self { device, vision }
    }

    /// Runs one action. Never returns an error: device problems are folded into
    /// a `technical` result, invalid actions into an `unknown` one.
    pub async fn execute(&self, action: &Action, resolution: Resolution) -> ExecutionResult {
        if let Err(reason) = validate_action(action) {
            tracing::warn!(action = action.name(), %reason, "action rejected before dispatch");
            return ExecutionResult::rejected(action.clone(), reason);
        }

        let result = match action {
            Action::Tap { x_pct, y_pct } => {
                let (x, y) = point_to_physical(*x_pct, *y_pct, resolution);
                let cmd = DeviceCommand::Tap { x, y };
                fold(action, cmd, self.device.tap(x, y).await)
            }
            Action::Type { text } => {
                let cmd = DeviceCommand::TypeText { text: text.clone() };
                fold(action, cmd, self.device.type_text(text).await)
            }
            Action::PressKey { key_name } => {
                let cmd = DeviceCommand::PressKey { key: key_name.clone() };
                fold(action, cmd, self.device.press_key(key_name).await)
            }
            Action::Swipe {
                x1_pct,
                y1_pct,
                x2_pct,
                y2_pct,
                duration_ms,
            } => {
                let (x1, y1) = point_to_physical(*x1_pct, *y1_pct, resolution);
                let (x2, y2) = point_to_physical(*x2_pct, *y2_pct, resolution);
                let cmd = DeviceCommand::Swipe {
                    x1,
                    y1,
                    x2,
                    y2,
                    duration_ms: *duration_ms,
                };
                fold(action, cmd, self.device.swipe(x1, y1, x2, y2, *duration_ms).await)
            }
            Action::Wait { seconds } => {
                let millis = (seconds * 1000.0).round() as u64;
                tokio::time::sleep(Duration::from_millis(millis)).await;
                ExecutionResult::ok(
                    action.clone(),
                    Some(DeviceCommand::Sleep { millis }),
                    format!("waited {millis} ms"),
                )
            }
            Action::Verify { .. } => self.verify(action).await,
            Action::Complete { .. } => ExecutionResult::ok(action.clone(), None, "complete: no device interaction"),
        };

        tracing::info!(
            action = action.name(),
            success = result.success,
            failure_class = ?result.failure_class,
            output = %result.raw_output,
            "action executed"
        );
        result
    }

    async fn verify(&self, action: &Action) -> ExecutionResult {
        let Action::Verify {
            kind,
            target,
            expected,
            region,
        } = action
        else {
            return ExecutionResult::rejected(action.clone(), "not a verify action");
        };
        let cmd = Some(DeviceCommand::CaptureScreenshot);

        let shot = match self.device.capture_screenshot().await {
            Ok(shot) => shot,
            Err(e) => return ExecutionResult::technical(action.clone(), cmd, e.to_string()),
        };

        let checked: QaResult<_> = match kind {
            VerifyKind::Text => self.vision.verify_text(&shot, target).await,
            VerifyKind::Element => self.vision.verify_element(&shot, target).await,
            VerifyKind::Color => match (region, expected) {
                (Some(region), Some(expected)) => self.vision.verify_color(&shot, region, expected).await,
                _ => Err(QaError::Vision("color verification needs a region and expected color".into())),
            },
        };

        match checked {
            Ok(evidence) => {
                let summary = format!(
                    "{} check on '{target}': {}",
                    action_kind(*kind),
                    if evidence.matched { "matched" } else { "not matched" }
                );
                let mut result = ExecutionResult::ok(action.clone(), cmd, summary);
                result.verification = Some(evidence);
                result
            }
            Err(QaError::Vision(reason)) => ExecutionResult {
                failure_class: FailureClass::Unknown,
                ..ExecutionResult::technical(action.clone(), cmd, reason)
            },
            Err(e) => ExecutionResult::technical(action.clone(), cmd, e.to_string()),
        }
    }
}

fn action_kind(kind: VerifyKind) -> &'static str {
    match kind {
        VerifyKind::Text => "text",
        VerifyKind::Element => "element",
        VerifyKind::Color => "color",
    }
}

fn fold(action: &Action, cmd: DeviceCommand, outcome: QaResult<DeviceOutcome>) -> ExecutionResult {
    match outcome {
        Ok(out) if out.success => ExecutionResult::ok(action.clone(), Some(cmd), out.output),
        Ok(out) => ExecutionResult::technical(action.clone(), Some(cmd), out.output),
        Err(e) => ExecutionResult::technical(action.clone(), Some(cmd), e.to_string()),
    }
}
