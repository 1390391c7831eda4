use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent_engine::event_bus::{EventBus, RunEvent};
use crate::agent_engine::history::{ActionHistory, ActionRecord};
use crate::agent_engine::loop_control::{CancelFlag, LoopController};
use crate::agent_engine::planner::Planner;
use crate::agent_engine::report::RunRecorder;
use crate::agent_engine::state::{Action, RunPhase, RunState, TestCase, Verdict, VerdictSource};
use crate::agent_engine::supervisor::{Judgement, Supervisor};
use crate::config::{AgentConfig, OutputConfig};
use crate::device::{DeviceChannel, Resolution};
use crate::errors::{ExecutorError, QaError, QaResult};
use crate::executor::Executor;
use crate::gateway::ProviderGateway;
use crate::vision::encoder::VisionEncoder;

/// Everything a finished run leaves behind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: String,
    pub test_case: TestCase,
    pub verdict: Verdict,
    pub history: ActionHistory,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_dir: Option<std::path::PathBuf>,
}

impl RunOutcome {
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Drives one test case through INIT → PLANNING → EXECUTING → SUPERVISING → DONE.
pub struct Orchestrator {
    device: Arc<dyn DeviceChannel>,
    planner: Planner,
    executor: Executor,
    supervisor: Supervisor,
    settings: AgentConfig,
    events: EventBus,
    cancel: CancelFlag,
    output: Option<OutputConfig>,
}

impl Orchestrator {
    pub fn new(
        gateway: Arc<ProviderGateway>,
        device: Arc<dyn DeviceChannel>,
        vision: Arc<dyn VisionEncoder>,
        settings: AgentConfig,
    ) -> Self {
        Self {
            planner: Planner::new(gateway.clone(), vision.clone(), settings.planner_history_window),
            supervisor: Supervisor::new(gateway, vision.clone(), settings.supervisor_history_window),
            executor: Executor::new(device.clone(), vision),
            device,
            settings,
            events: EventBus::new(),
            cancel: CancelFlag::new(),
            output: None,
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Persist screenshots and `result.json` for each run.
    pub fn with_output(mut self, output: OutputConfig) -> Self {
        self.output = Some(output);
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Runs `test_case` to a verdict. Only cancellation surfaces as an error;
    /// every other failure ends in a technical verdict.
    pub async fn run(&self, test_case: TestCase) -> QaResult<RunOutcome> {
        let started_at = chrono::Utc::now();
        let max_steps = test_case.max_steps.unwrap_or(self.settings.max_steps);
        let mut state = RunState::new(test_case);
        let mut ctl = LoopController::new(
            max_steps,
            self.settings.max_consecutive_technical_failures,
            self.cancel.clone(),
        );
        let recorder = self.open_recorder(&state.test_case.id).await;
        let mut resolution = Resolution::new(0, 0);

        tracing::info!(
            run_id = %state.run_id,
            test = %state.test_case.id,
            goal = %state.test_case.goal,
            max_steps = ctl.max_steps(),
            "run started"
        );

        loop {
            if ctl.cancelled() {
                tracing::warn!(run_id = %state.run_id, step = state.step_count, "run cancelled");
                return Err(QaError::Cancelled);
            }
            self.events.publish(RunEvent::PhaseChanged {
                run_id: state.run_id.clone(),
                phase: state.phase.label().to_string(),
                step: state.step_count,
            });

            match state.phase.clone() {
                // ── Init: learn the screen size and take the first screenshot ──
                RunPhase::Init => {
                    resolution = match self.device.get_resolution().await {
                        Ok(r) => r,
                        Err(e) => {
                            state.finish(technical(format!("could not read device resolution: {e}")));
                            continue;
                        }
                    };
                    tracing::debug!(width = resolution.width, height = resolution.height, "device resolution");
                    let refreshed = self.refresh_screenshot(&mut state, recorder.as_ref()).await;
                    match refreshed {
                        Ok(()) => state.phase = RunPhase::Planning,
                        Err(e) => state.finish(technical(format!("initial screenshot failed: {e}"))),
                    }
                }

                // ── Planning: ask for exactly one next action ─────────────────
                RunPhase::Planning => {
                    state.step_count += 1;
                    let Some(shot) = state.latest_screenshot.as_ref() else {
                        state.finish(technical("no screenshot available for planning"));
                        continue;
                    };
                    let planned = self
                        .planner
                        .plan(&state.test_case, &state.history, shot, state.step_count, ctl.max_steps())
                        .await;
                    match planned {
                        Ok(planned) => {
                            self.events.publish(RunEvent::ActionPlanned {
                                run_id: state.run_id.clone(),
                                step: state.step_count,
                                planned: planned.clone(),
                            });
                            state.last_planned = Some(planned.action.clone());
                            state.phase = RunPhase::Executing { planned };
                        }
                        Err(e) => {
                            tracing::error!(error = %e, step = state.step_count, "planner failed");
                            state.finish(technical(format!("planner failed: {e}")));
                        }
                    }
                }

                // ── Executing: run the action, refresh the screen ─────────────
                RunPhase::Executing { planned } => {
                    if planned.action.is_complete() {
                        tracing::info!(step = state.step_count, hint = ?planned.action, "planner signalled complete");
                        state.phase = RunPhase::Supervising { terminal: true };
                        continue;
                    }

                    let result = self.executor.execute(&planned.action, resolution).await;
                    ctl.record(&result);
                    self.events.publish(RunEvent::ActionExecuted {
                        run_id: state.run_id.clone(),
                        step: state.step_count,
                        result: result.clone(),
                    });

                    if result.success && changes_screen(&planned.action) {
                        tokio::time::sleep(Duration::from_millis(self.settings.settle_delay_ms)).await;
                    }

                    let refreshed = self.refresh_screenshot(&mut state, recorder.as_ref()).await;
                    let screenshot_after = match refreshed {
                        Ok(()) => state.latest_screenshot.as_ref().map(|s| s.reference()),
                        Err(e) => {
                            tracing::warn!(error = %e, "screenshot refresh failed");
                            ctl.record_technical();
                            None
                        }
                    };

                    let last_output = result.raw_output.clone();
                    state.history.push(ActionRecord {
                        step: state.step_count,
                        planned,
                        result,
                        timestamp: chrono::Utc::now(),
                        screenshot_after,
                    });

                    if ctl.technical_budget_spent() {
                        let err = ExecutorError::Technical {
                            consecutive: ctl.consecutive_technical(),
                            last_output,
                        };
                        tracing::error!(error = %err, "technical failure budget spent");
                        state.finish(technical(err.to_string()));
                        continue;
                    }

                    let terminal = ctl.step_budget_spent(state.step_count);
                    if terminal {
                        tracing::info!(steps = state.step_count, "step budget spent, asking for final verdict");
                    }
                    state.phase = RunPhase::Supervising { terminal };
                }

                // ── Supervising: continue, or commit to a verdict ─────────────
                RunPhase::Supervising { terminal } => {
                    let Some(shot) = state.latest_screenshot.as_ref() else {
                        state.finish(technical("no screenshot available for supervision"));
                        continue;
                    };
                    let judged = self
                        .supervisor
                        .judge(&state.test_case, &state.history, shot, terminal)
                        .await;
                    match judged {
                        Ok(Judgement::Continue { .. }) if terminal => {
                            state.finish(technical("supervisor did not commit to a verdict"));
                        }
                        Ok(Judgement::Continue { .. }) => state.phase = RunPhase::Planning,
                        Ok(Judgement::Verdict(verdict)) => state.finish(verdict),
                        Err(e) => {
                            tracing::error!(error = %e, "supervisor failed");
                            state.finish(technical(format!("supervisor failed: {e}")));
                        }
                    }
                }

                RunPhase::Done => break,
            }

            tokio::task::yield_now().await;
        }

        let verdict = state
            .verdict
            .clone()
            .unwrap_or_else(|| technical("run ended without a verdict"));
        self.events.publish(RunEvent::VerdictReached {
            run_id: state.run_id.clone(),
            verdict: verdict.clone(),
        });
        tracing::info!(
            run_id = %state.run_id,
            status = ?verdict.status,
            failure_kind = ?verdict.failure_kind,
            steps = verdict.steps_taken,
            rationale = %verdict.rationale,
            "run finished"
        );

        let mut outcome = RunOutcome {
            run_id: state.run_id,
            test_case: state.test_case,
            verdict,
            history: state.history,
            started_at,
            finished_at: chrono::Utc::now(),
            report_dir: None,
        };
        if let Some(rec) = recorder {
            if let Some(shot) = &state.latest_screenshot {
                if let Err(e) = rec.save_final(shot).await {
                    tracing::warn!(error = %e, "could not save final screenshot");
                }
            }
            outcome.report_dir = Some(rec.dir().to_path_buf());
            if let Err(e) = rec.write_result(&outcome).await {
                tracing::warn!(error = %e, "could not write run result");
            }
        }
        Ok(outcome)
    }

    async fn open_recorder(&self, test_id: &str) -> Option<RunRecorder> {
        let output = self.output.as_ref()?;
        match RunRecorder::create(&output.resolved_results_dir(), test_id, output.save_screenshots).await {
            Ok(rec) => Some(rec),
            Err(e) => {
                tracing::warn!(error = %e, "results directory unavailable, not recording this run");
                None
            }
        }
    }

    async fn refresh_screenshot(&self, state: &mut RunState, recorder: Option<&RunRecorder>) -> QaResult<()> {
        let mut shot = self.device.capture_screenshot().await?;
        if let Some(rec) = recorder {
            if let Err(e) = rec.save_step(&mut shot, state.step_count).await {
                tracing::warn!(error = %e, "could not save screenshot");
            }
        }
        state.latest_screenshot = Some(shot);
        Ok(())
    }
}

fn technical(rationale: impl Into<String>) -> Verdict {
    Verdict::technical_failure(rationale, VerdictSource::Orchestrator)
}

/// Actions after which the UI needs a moment to settle.
fn changes_screen(action: &Action) -> bool {
    !matches!(action, Action::Wait { .. } | Action::Verify { .. } | Action::Complete { .. })
}
