//! Test suites: load cases from JSON, run them one after another on one device.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::agent_engine::engine::{Orchestrator, RunOutcome};
use crate::agent_engine::state::{FailureKind, TestCase, VerdictStatus};
use crate::device::DeviceChannel;
use crate::errors::{QaError, QaResult};

#[derive(Deserialize)]
#[serde(untagged)]
enum SuiteFile {
    List(Vec<TestCase>),
    Wrapped { tests: Vec<TestCase> },
}

/// Reads a JSON array of test cases (or `{"tests": [...]}`).
pub fn load_test_cases(path: &Path) -> QaResult<Vec<TestCase>> {
    let content = std::fs::read_to_string(path)?;
    let cases = match serde_json::from_str::<SuiteFile>(&content)? {
        SuiteFile::List(cases) | SuiteFile::Wrapped { tests: cases } => cases,
    };
    if cases.is_empty() {
        return Err(QaError::Config(format!("{} contains no test cases", path.display())));
    }
    let mut seen = std::collections::HashSet::new();
    for case in &cases {
        if case.goal.trim().is_empty() {
            return Err(QaError::Config(format!("test '{}' has an empty goal", case.id)));
        }
        if !seen.insert(case.id.as_str()) {
            return Err(QaError::Config(format!("duplicate test id '{}'", case.id)));
        }
    }
    Ok(cases)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteEntry {
    pub test_id: String,
    pub status: VerdictStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bug_classification: Option<String>,
    pub rationale: String,
    pub steps: u32,
    pub duration_ms: i64,
    /// Whether the verdict matches the case's `expected` field, when one is given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matches_expectation: Option<bool>,
}

impl SuiteEntry {
    fn from_outcome(outcome: &RunOutcome) -> Self {
        let v = &outcome.verdict;
        let matches_expectation = outcome.test_case.expected.as_deref().map(|e| {
            let e = e.trim().to_lowercase();
            match v.status {
                VerdictStatus::Pass => e.starts_with("pass"),
                VerdictStatus::Fail => e.starts_with("fail"),
            }
        });
        Self {
            test_id: outcome.test_case.id.clone(),
            status: v.status,
            failure_kind: v.failure_kind,
            bug_classification: v.bug_classification.clone(),
            rationale: v.rationale.clone(),
            steps: v.steps_taken,
            duration_ms: outcome.duration().num_milliseconds(),
            matches_expectation,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuiteSummary {
    pub entries: Vec<SuiteEntry>,
}

impl SuiteSummary {
    pub fn passed(&self) -> usize {
        self.entries.iter().filter(|e| e.status == VerdictStatus::Pass).count()
    }

    pub fn application_failures(&self) -> usize {
        self.count_kind(FailureKind::Application)
    }

    pub fn technical_failures(&self) -> usize {
        self.count_kind(FailureKind::Technical)
    }

    fn count_kind(&self, kind: FailureKind) -> usize {
        self.entries.iter().filter(|e| e.failure_kind == Some(kind)).count()
    }

    pub fn all_passed(&self) -> bool {
        !self.entries.is_empty() && self.passed() == self.entries.len()
    }

    /// Plain-text table for the terminal.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for e in &self.entries {
            let label = match (e.status, e.failure_kind) {
                (VerdictStatus::Pass, _) => "PASS".to_string(),
                (VerdictStatus::Fail, Some(FailureKind::Technical)) => "FAIL (technical)".to_string(),
                (VerdictStatus::Fail, _) => match &e.bug_classification {
                    Some(bug) => format!("FAIL (bug: {bug})"),
                    None => "FAIL (bug)".to_string(),
                },
            };
            let expectation = match e.matches_expectation {
                Some(false) => "  [unexpected]",
                _ => "",
            };
            out.push_str(&format!(
                "{:<24} {:<28} {:>3} steps  {}{}\n",
                e.test_id, label, e.steps, e.rationale, expectation
            ));
        }
        out.push_str(&format!(
            "\n{} passed, {} application failures, {} technical failures, {} total\n",
            self.passed(),
            self.application_failures(),
            self.technical_failures(),
            self.entries.len()
        ));
        out
    }
}

/// Runs cases sequentially, bringing the app up before each and going home after.
pub struct SuiteRunner {
    orchestrator: Orchestrator,
    device: Arc<dyn DeviceChannel>,
    app_package: Option<String>,
}

impl SuiteRunner {
    pub fn new(orchestrator: Orchestrator, device: Arc<dyn DeviceChannel>, app_package: Option<String>) -> Self {
        Self {
            orchestrator,
            device,
            app_package,
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub async fn run_all(&self, cases: Vec<TestCase>) -> QaResult<SuiteSummary> {
        let total = cases.len();
        let mut summary = SuiteSummary::default();

        for (i, case) in cases.into_iter().enumerate() {
            tracing::info!(test = %case.id, index = i + 1, total, "starting test");
            if let Some(package) = &self.app_package {
                match self.device.launch_app(package).await {
                    Ok(out) if out.success => {}
                    Ok(out) => tracing::warn!(package = %package, output = %out.output, "app launch reported failure"),
                    Err(e) => tracing::warn!(package = %package, error = %e, "app launch failed"),
                }
            }

            let outcome = self.orchestrator.run(case).await?;
            summary.entries.push(SuiteEntry::from_outcome(&outcome));

            if let Err(e) = self.device.press_key("home").await {
                tracing::warn!(error = %e, "could not return to home screen");
            }
        }
        Ok(summary)
    }
}
