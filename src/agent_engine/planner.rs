use std::sync::Arc;

use crate::agent_engine::history::ActionHistory;
use crate::agent_engine::prompts;
use crate::agent_engine::state::{PlannedAction, TestCase};
use crate::device::Screenshot;
use crate::errors::PlannerError;
use crate::executor::safety::validate_action;
use crate::gateway::ProviderGateway;
use crate::vision::encoder::VisionEncoder;

/// Chooses the next single action from the goal, recent history and the screen.
pub struct Planner {
    gateway: Arc<ProviderGateway>,
    vision: Arc<dyn VisionEncoder>,
    history_window: usize,
}

impl Planner {
    pub fn new(gateway: Arc<ProviderGateway>, vision: Arc<dyn VisionEncoder>, history_window: usize) -> Self {
        Self {
            gateway,
            vision,
            history_window,
        }
    }

    pub async fn plan(
        &self,
        test_case: &TestCase,
        history: &ActionHistory,
        screenshot: &Screenshot,
        step: u32,
        max_steps: u32,
    ) -> Result<PlannedAction, PlannerError> {
        let image = self
            .vision
            .encode(screenshot)
            .map_err(|e| PlannerError::Vision(e.to_string()))?;
        let prompt = prompts::planner(test_case, history, self.history_window, step, max_steps);

        let first = self.gateway.request::<PlannedAction>(&prompt, Some(&image)).await?;
        let reason = match validate_action(&first.payload.action) {
            Ok(()) => {
                tracing::info!(step, action = first.payload.action.name(), reasoning = %first.payload.reasoning, "planned");
                return Ok(first.payload);
            }
            Err(reason) => reason,
        };

        tracing::warn!(step, %reason, raw = %first.raw, "planner proposed an invalid action, re-prompting");
        let rejected = serde_json::to_string(&first.payload.action).unwrap_or_default();
        let corrected = prompts::planner_correction(&prompt, &rejected, &reason);
        let second = self.gateway.request::<PlannedAction>(&corrected, Some(&image)).await?;

        match validate_action(&second.payload.action) {
            Ok(()) => {
                tracing::info!(step, action = second.payload.action.name(), "planned after correction");
                Ok(second.payload)
            }
            Err(reason) => Err(PlannerError::InvalidAction { reason }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_engine::state::Action;
    use crate::errors::ProviderErrorKind;
    use crate::test_support::{self, ScriptedProvider};

    fn planner(provider: Arc<ScriptedProvider>) -> Planner {
        Planner::new(test_support::gateway(provider), test_support::vision(), 5)
    }

    #[tokio::test]
    async fn valid_action_is_returned_as_is() {
        let provider = ScriptedProvider::new(
            "p",
            vec![r#"{"action_type":"tap","x_pct":50,"y_pct":90,"reasoning":"settings icon"}"#],
        );
        let planned = planner(provider.clone())
            .plan(&TestCase::from_goal("open settings"), &ActionHistory::new(), &test_support::screenshot(), 1, 15)
            .await
            .unwrap();
        assert_eq!(planned.action, Action::Tap { x_pct: 50.0, y_pct: 90.0 });
        assert!(provider.prompts()[0].contains("open settings"));
    }

    #[tokio::test]
    async fn out_of_range_action_is_corrected_once() {
        let provider = ScriptedProvider::new(
            "p",
            vec![
                r#"{"action_type":"tap","x_pct":150,"y_pct":90}"#,
                r#"{"action_type":"tap","x_pct":95,"y_pct":90}"#,
            ],
        );
        let planned = planner(provider.clone())
            .plan(&TestCase::from_goal("g"), &ActionHistory::new(), &test_support::screenshot(), 1, 15)
            .await
            .unwrap();
        assert_eq!(planned.action, Action::Tap { x_pct: 95.0, y_pct: 90.0 });
        assert!(provider.prompts()[1].contains("was rejected: x_pct must be within 0-100"));
    }

    #[tokio::test]
    async fn unknown_key_is_corrected_instead_of_executed() {
        let provider = ScriptedProvider::new(
            "p",
            vec![
                r#"{"action_type":"press_key","key_name":"submit"}"#,
                r#"{"action_type":"press_key","key_name":"enter"}"#,
            ],
        );
        let planned = planner(provider.clone())
            .plan(&TestCase::from_goal("g"), &ActionHistory::new(), &test_support::screenshot(), 1, 15)
            .await
            .unwrap();
        assert_eq!(planned.action, Action::PressKey { key_name: "enter".into() });
        assert!(provider.prompts()[1].contains("unknown key 'submit'"));
    }

    #[tokio::test]
    async fn repeated_invalid_action_is_planner_error() {
        let provider = ScriptedProvider::new(
            "p",
            vec![
                r#"{"action_type":"type","text":""}"#,
                r#"{"action_type":"type","text":""}"#,
            ],
        );
        let err = planner(provider)
            .plan(&TestCase::from_goal("g"), &ActionHistory::new(), &test_support::screenshot(), 1, 15)
            .await
            .unwrap_err();
        assert!(matches!(err, PlannerError::InvalidAction { .. }));
    }

    #[tokio::test]
    async fn unknown_action_tag_surfaces_as_malformed() {
        let provider = ScriptedProvider::new(
            "p",
            vec![
                r#"{"action_type":"long_press","x_pct":1,"y_pct":1}"#,
                r#"{"action_type":"long_press","x_pct":1,"y_pct":1}"#,
            ],
        );
        let err = planner(provider)
            .plan(&TestCase::from_goal("g"), &ActionHistory::new(), &test_support::screenshot(), 1, 15)
            .await
            .unwrap_err();
        assert!(matches!(err, PlannerError::Provider(e) if e.kind == ProviderErrorKind::MalformedResponse));
    }
}
