// Loop control: step budget, technical-failure budget and cancellation.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::agent_engine::state::ExecutionResult;

/// Shared stop switch. Checked by the orchestrator between loop states.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct LoopController {
    max_steps: u32,
    max_consecutive_technical: u32,
    consecutive_technical: u32,
    cancel: CancelFlag,
}

impl LoopController {
    pub fn new(max_steps: u32, max_consecutive_technical: u32, cancel: CancelFlag) -> Self {
        Self {
            max_steps: max_steps.max(1),
            max_consecutive_technical: max_consecutive_technical.max(1),
            consecutive_technical: 0,
            cancel,
        }
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    /// Counts technical failures in a row; any other outcome resets the count.
    pub fn record(&mut self, result: &ExecutionResult) {
        if result.is_technical_failure() {
            self.consecutive_technical += 1;
        } else {
            self.consecutive_technical = 0;
        }
    }

    /// Screenshot refreshes that fail count against the same budget.
    pub fn record_technical(&mut self) {
        self.consecutive_technical += 1;
    }

    pub fn consecutive_technical(&self) -> u32 {
        self.consecutive_technical
    }

    pub fn technical_budget_spent(&self) -> bool {
        self.consecutive_technical >= self.max_consecutive_technical
    }

    pub fn step_budget_spent(&self, step_count: u32) -> bool {
        step_count >= self.max_steps
    }

    pub fn cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
