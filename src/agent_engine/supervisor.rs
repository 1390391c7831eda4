use std::sync::Arc;

use serde::Deserialize;

use crate::agent_engine::history::ActionHistory;
use crate::agent_engine::prompts;
use crate::agent_engine::state::{TestCase, Verdict, VerdictSource};
use crate::device::Screenshot;
use crate::errors::SupervisorError;
use crate::gateway::{ProviderGateway, ResponseSchema, SchemaTag};
use crate::vision::encoder::VisionEncoder;

/// Raw supervisor reply as the model sends it.
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorReply {
    #[serde(default)]
    pub decision: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub failure_kind: Option<String>,
    #[serde(default)]
    pub bug_classification: Option<String>,
    #[serde(default)]
    pub rationale: String,
}

impl ResponseSchema for SupervisorReply {
    const TAG: SchemaTag = SchemaTag::SupervisorDecision;
}

#[derive(Debug, Clone)]
pub enum Judgement {
    Continue { rationale: String },
    Verdict(Verdict),
}

/// Decides whether a run goes on and, when it ends, why.
pub struct Supervisor {
    gateway: Arc<ProviderGateway>,
    vision: Arc<dyn VisionEncoder>,
    history_window: usize,
}

impl Supervisor {
    pub fn new(gateway: Arc<ProviderGateway>, vision: Arc<dyn VisionEncoder>, history_window: usize) -> Self {
        Self {
            gateway,
            vision,
            history_window,
        }
    }

    /// With `terminal` set, only a verdict is acceptable.
    pub async fn judge(
        &self,
        test_case: &TestCase,
        history: &ActionHistory,
        screenshot: &Screenshot,
        terminal: bool,
    ) -> Result<Judgement, SupervisorError> {
        let image = self
            .vision
            .encode(screenshot)
            .map_err(|e| SupervisorError::Vision(e.to_string()))?;
        let prompt = prompts::supervisor(test_case, history, self.history_window, terminal);

        let first = self.gateway.request::<SupervisorReply>(&prompt, Some(&image)).await?;
        let problem = match interpret(&first.payload, history, terminal) {
            Ok(judgement) => return Ok(log_judgement(judgement, terminal)),
            Err(problem) => problem,
        };

        tracing::warn!(terminal, %problem, raw = %first.raw, "supervisor reply unusable, asking again");
        let retry = format!("{prompt}\n\nYour previous reply was not usable: {problem}. Answer again.");
        let second = self.gateway.request::<SupervisorReply>(&retry, Some(&image)).await?;
        interpret(&second.payload, history, terminal)
            .map(|j| log_judgement(j, terminal))
            .map_err(SupervisorError::AmbiguousVerdict)
    }
}

fn log_judgement(judgement: Judgement, terminal: bool) -> Judgement {
    match &judgement {
        Judgement::Continue { rationale } => tracing::info!(%rationale, "supervisor: continue"),
        Judgement::Verdict(v) => tracing::info!(
            terminal,
            status = ?v.status,
            failure_kind = ?v.failure_kind,
            bug = ?v.bug_classification,
            rationale = %v.rationale,
            "supervisor: verdict"
        ),
    }
    judgement
}

fn normalized(value: &Option<String>) -> String {
    value.as_deref().unwrap_or_default().trim().to_lowercase()
}

/// Turns a reply into a judgement, or explains why it cannot be used.
pub fn interpret(reply: &SupervisorReply, history: &ActionHistory, terminal: bool) -> Result<Judgement, String> {
    let decision = reply.decision.trim().to_lowercase();
    let status = normalized(&reply.status);

    let wants_verdict = match decision.as_str() {
        "continue" => false,
        "verdict" | "done" | "stop" => true,
        "" if !status.is_empty() => true,
        other => return Err(format!("unknown decision '{other}'")),
    };

    if !wants_verdict {
        if terminal {
            return Err("the run is over, a verdict is required".into());
        }
        return Ok(Judgement::Continue {
            rationale: reply.rationale.clone(),
        });
    }

    let verdict = if status.starts_with("pass") {
        if history.has_unresolved_technical_failure() {
            // Last action never reached the device.
            let rationale = format!(
                "supervisor reported pass, but the last action failed technically: {}",
                reply.rationale
            );
            tracing::warn!("downgrading pass to technical failure");
            Verdict::technical_failure(rationale, VerdictSource::Supervisor)
        } else {
            Verdict::pass(reply.rationale.clone())
        }
    } else if status.starts_with("fail") {
        match normalized(&reply.failure_kind).as_str() {
            "application" | "app" | "bug" if history.has_unresolved_technical_failure() => {
                // The app cannot be blamed for an action that never reached it.
                let rationale = format!(
                    "supervisor reported an application failure, but the last action failed technically: {}",
                    reply.rationale
                );
                tracing::warn!("downgrading application failure to technical failure");
                Verdict::technical_failure(rationale, VerdictSource::Supervisor)
            }
            "application" | "app" | "bug" => {
                Verdict::application_failure(reply.rationale.clone(), reply.bug_classification.clone())
            }
            "technical" | "environment" => {
                Verdict::technical_failure(reply.rationale.clone(), VerdictSource::Supervisor)
            }
            "" => return Err("a fail verdict must state failure_kind (application or technical)".into()),
            other => return Err(format!("unknown failure_kind '{other}'")),
        }
    } else {
        return Err(format!("verdict status must be pass or fail, got '{status}'"));
    };
    Ok(Judgement::Verdict(verdict))
}
