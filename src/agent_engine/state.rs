use serde::{Deserialize, Serialize};

use crate::agent_engine::history::ActionHistory;
use crate::device::Screenshot;
use crate::vision::types::VisualEvidence;

/// One test goal. Immutable input to a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    #[serde(alias = "description")]
    pub goal: String,
    /// Free-text preconditions shown to the planner alongside the goal.
    #[serde(default)]
    pub setup: Vec<String>,
    #[serde(default)]
    pub max_steps: Option<u32>,
    /// Expected outcome ("pass" / "fail"), used for suite summaries only.
    #[serde(default, alias = "expected_result")]
    pub expected: Option<String>,
}

impl TestCase {
    pub fn from_goal(goal: impl Into<String>) -> Self {
        Self {
            id: "adhoc".into(),
            goal: goal.into(),
            setup: Vec::new(),
            max_steps: None,
            expected: None,
        }
    }
}

/// Percentage rectangle on the screen, all values in [0, 100].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub x1_pct: f64,
    pub y1_pct: f64,
    pub x2_pct: f64,
    pub y2_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyKind {
    Text,
    Element,
    Color,
}

/// Closed set of UI actions the planner may choose. Unknown tags fail to parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action_type", rename_all = "snake_case")]
pub enum Action {
    Tap {
        x_pct: f64,
        y_pct: f64,
    },
    Type {
        text: String,
    },
    PressKey {
        key_name: String,
    },
    Swipe {
        x1_pct: f64,
        y1_pct: f64,
        x2_pct: f64,
        y2_pct: f64,
        #[serde(default = "default_swipe_ms")]
        duration_ms: u64,
    },
    Wait {
        seconds: f64,
    },
    Verify {
        kind: VerifyKind,
        target: String,
        /// Expected colour for `color` checks (`red`, `#ff0000`).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expected: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        region: Option<Region>,
    },
    Complete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        verdict_hint: Option<String>,
    },
}

fn default_swipe_ms() -> u64 {
    300
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Tap { .. } => "tap",
            Action::Type { .. } => "type",
            Action::PressKey { .. } => "press_key",
            Action::Swipe { .. } => "swipe",
            Action::Wait { .. } => "wait",
            Action::Verify { .. } => "verify",
            Action::Complete { .. } => "complete",
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Action::Complete { .. })
    }
}

/// Planner output: the action plus the model's stated reason for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedAction {
    #[serde(flatten)]
    pub action: Action,
    #[serde(default)]
    pub reasoning: String,
}

/// Device-level command an action was normalized into (pixels, key names).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum DeviceCommand {
    Tap { x: u32, y: u32 },
    TypeText { text: String },
    PressKey { key: String },
    Swipe { x1: u32, y1: u32, x2: u32, y2: u32, duration_ms: u64 },
    Sleep { millis: u64 },
    CaptureScreenshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    None,
    /// The device channel itself failed.
    Technical,
    /// The executor refused or could not attribute the failure.
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub action: Action,
    pub success: bool,
    pub failure_class: FailureClass,
    pub raw_output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<DeviceCommand>,
    /// Evidence from `verify` actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VisualEvidence>,
}

impl ExecutionResult {
    pub fn ok(action: Action, command: Option<DeviceCommand>, raw_output: impl Into<String>) -> Self {
        Self {
            action,
            success: true,
            failure_class: FailureClass::None,
            raw_output: raw_output.into(),
            command,
            verification: None,
        }
    }

    pub fn technical(action: Action, command: Option<DeviceCommand>, raw_output: impl Into<String>) -> Self {
        Self {
            action,
            success: false,
            failure_class: FailureClass::Technical,
            raw_output: raw_output.into(),
            command,
            verification: None,
        }
    }

    pub fn rejected(action: Action, reason: impl Into<String>) -> Self {
        Self {
            action,
            success: false,
            failure_class: FailureClass::Unknown,
            raw_output: reason.into(),
            command: None,
            verification: None,
        }
    }

    pub fn is_technical_failure(&self) -> bool {
        self.failure_class == FailureClass::Technical
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    Pass,
    Fail,
}

/// Why a failing verdict failed. Never set on a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The application violates the test goal (a bug).
    Application,
    /// The environment broke; nothing can be said about the application.
    Technical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictSource {
    Supervisor,
    Orchestrator,
}

/// Terminal outcome of one run. Produced exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub status: VerdictStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bug_classification: Option<String>,
    pub rationale: String,
    pub decided_by: VerdictSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_action: Option<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_screenshot: Option<String>,
    pub steps_taken: u32,
}

impl Verdict {
    fn new(status: VerdictStatus, failure_kind: Option<FailureKind>, rationale: String, decided_by: VerdictSource) -> Self {
        Self {
            status,
            failure_kind,
            bug_classification: None,
            rationale,
            decided_by,
            last_action: None,
            last_screenshot: None,
            steps_taken: 0,
        }
    }

    pub fn pass(rationale: impl Into<String>) -> Self {
        Self::new(VerdictStatus::Pass, None, rationale.into(), VerdictSource::Supervisor)
    }

    pub fn application_failure(rationale: impl Into<String>, bug_classification: Option<String>) -> Self {
        Self {
            bug_classification,
            ..Self::new(
                VerdictStatus::Fail,
                Some(FailureKind::Application),
                rationale.into(),
                VerdictSource::Supervisor,
            )
        }
    }

    pub fn technical_failure(rationale: impl Into<String>, decided_by: VerdictSource) -> Self {
        Self::new(VerdictStatus::Fail, Some(FailureKind::Technical), rationale.into(), decided_by)
    }

    pub fn is_pass(&self) -> bool {
        self.status == VerdictStatus::Pass
    }

    pub fn is_technical_failure(&self) -> bool {
        self.failure_kind == Some(FailureKind::Technical)
    }

    pub fn bug_found(&self) -> bool {
        self.failure_kind == Some(FailureKind::Application)
    }

    /// Attach the run context that explains how the run ended.
    pub fn with_context(mut self, last_action: Option<Action>, last_screenshot: Option<String>, steps_taken: u32) -> Self {
        self.last_action = last_action;
        self.last_screenshot = last_screenshot;
        self.steps_taken = steps_taken;
        self
    }
}

/// Lifecycle states of one test run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum RunPhase {
    Init,
    Planning,
    Executing { planned: PlannedAction },
    Supervising { terminal: bool },
    Done,
}

impl RunPhase {
    pub fn label(&self) -> &'static str {
        match self {
            RunPhase::Init => "init",
            RunPhase::Planning => "planning",
            RunPhase::Executing { .. } => "executing",
            RunPhase::Supervising { .. } => "supervising",
            RunPhase::Done => "done",
        }
    }
}

/// The single mutable aggregate of a run. Only the orchestrator writes to it.
#[derive(Debug)]
pub struct RunState {
    pub run_id: String,
    pub test_case: TestCase,
    pub history: ActionHistory,
    pub latest_screenshot: Option<Screenshot>,
    pub step_count: u32,
    pub phase: RunPhase,
    pub terminated: bool,
    pub verdict: Option<Verdict>,
    /// Most recently planned action, including `complete`.
    pub last_planned: Option<Action>,
}

impl RunState {
    pub fn new(test_case: TestCase) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            test_case,
            history: ActionHistory::new(),
            latest_screenshot: None,
            step_count: 0,
            phase: RunPhase::Init,
            terminated: false,
            verdict: None,
            last_planned: None,
        }
    }

    /// Fold the terminal verdict in, stamping it with the run context.
    pub fn finish(&mut self, verdict: Verdict) {
        let screenshot = self.latest_screenshot.as_ref().map(|s| s.reference());
        let verdict = verdict.with_context(self.last_planned.clone(), screenshot, self.step_count);
        self.verdict = Some(verdict);
        self.terminated = true;
        self.phase = RunPhase::Done;
    }
}
