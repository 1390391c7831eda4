use serde::{Deserialize, Serialize};

use crate::agent_engine::state::{ExecutionResult, PlannedAction};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub step: u32,
    pub planned: PlannedAction,
    pub result: ExecutionResult,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Screenshot captured after the action settled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_after: Option<String>,
}

impl ActionRecord {
    /// One-line form used in prompts.
    pub fn summary(&self) -> String {
        let outcome = if self.result.success {
            "ok".to_string()
        } else {
            format!("{:?} failure", self.result.failure_class).to_lowercase()
        };
        let mut line = format!(
            "Step {}: {} {} -> {} ({})",
            self.step,
            self.planned.action.name(),
            serde_json::to_string(&self.planned.action).unwrap_or_default(),
            outcome,
            self.result.raw_output,
        );
        if let Some(evidence) = &self.result.verification {
            line.push_str(&format!(
                " [check {}: {}]",
                if evidence.matched { "matched" } else { "not matched" },
                evidence.evidence
            ));
        }
        if !self.planned.reasoning.is_empty() {
            line.push_str(&format!(" | reason: {}", self.planned.reasoning));
        }
        line
    }
}

/// Append-only record of executed actions for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionHistory {
    entries: Vec<ActionRecord>,
}

impl ActionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: ActionRecord) {
        self.entries.push(record);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ActionRecord] {
        &self.entries
    }

    pub fn last(&self) -> Option<&ActionRecord> {
        self.entries.last()
    }

    /// The trailing `size` records, oldest first.
    pub fn window(&self, size: usize) -> &[ActionRecord] {
        let start = self.entries.len().saturating_sub(size);
        &self.entries[start..]
    }

    /// Compact multi-line rendering of `window(size)` for prompts.
    pub fn render_window(&self, size: usize) -> String {
        let window = self.window(size);
        if window.is_empty() {
            return "Nothing yet - this is the first step".to_string();
        }
        let mut out = String::new();
        let omitted = self.entries.len() - window.len();
        if omitted > 0 {
            out.push_str(&format!("({omitted} earlier steps omitted)\n"));
        }
        for record in window {
            out.push_str(&record.summary());
            out.push('\n');
        }
        out
    }

    /// True when the latest execution failed at the device level and nothing has succeeded since.
    pub fn has_unresolved_technical_failure(&self) -> bool {
        self.entries
            .last()
            .map(|r| r.result.is_technical_failure())
            .unwrap_or(false)
    }
}
