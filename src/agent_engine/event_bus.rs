use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::agent_engine::state::{ExecutionResult, PlannedAction, Verdict};

/// Progress notifications emitted by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    PhaseChanged {
        run_id: String,
        phase: String,
        step: u32,
    },
    ActionPlanned {
        run_id: String,
        step: u32,
        planned: PlannedAction,
    },
    ActionExecuted {
        run_id: String,
        step: u32,
        result: ExecutionResult,
    },
    VerdictReached {
        run_id: String,
        verdict: Verdict,
    },
}

/// Fan-out of `RunEvent`s. Publishing never blocks and never fails the run.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RunEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(100);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: RunEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("run event dropped: no subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
