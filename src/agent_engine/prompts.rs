use crate::agent_engine::history::ActionHistory;
use crate::agent_engine::state::TestCase;

const ACTION_REFERENCE: &str = "\
Available actions (coordinates are percentages of screen width/height, 0-100):
- {\"action_type\": \"tap\", \"x_pct\": 50, \"y_pct\": 90}
- {\"action_type\": \"type\", \"text\": \"Hello\"}            (types into the focused field)
- {\"action_type\": \"press_key\", \"key_name\": \"enter\"}   (enter, back, home, tab, backspace, ...)
- {\"action_type\": \"swipe\", \"x1_pct\": 50, \"y1_pct\": 80, \"x2_pct\": 50, \"y2_pct\": 20, \"duration_ms\": 300}
- {\"action_type\": \"wait\", \"seconds\": 2}                (at most 30)
- {\"action_type\": \"verify\", \"kind\": \"text\" | \"element\", \"target\": \"what must be visible\"}
- {\"action_type\": \"verify\", \"kind\": \"color\", \"target\": \"what is checked\", \"expected\": \"red\" | \"#ff0000\",
   \"region\": {\"x1_pct\": 0, \"y1_pct\": 0, \"x2_pct\": 10, \"y2_pct\": 5}}
- {\"action_type\": \"complete\", \"verdict_hint\": \"pass\" | \"fail\"}   (the goal is reached or clearly cannot be)";

fn goal_block(test_case: &TestCase) -> String {
    let mut out = format!("Test goal: {}\n", test_case.goal);
    if !test_case.setup.is_empty() {
        out.push_str("Preconditions:\n");
        for line in &test_case.setup {
            out.push_str(&format!("- {line}\n"));
        }
    }
    out
}

/// Prompt asking the planner for exactly one next action.
pub fn planner(test_case: &TestCase, history: &ActionHistory, window: usize, step: u32, max_steps: u32) -> String {
    format!(
        "You are a mobile QA tester operating an Android app through screenshots.\n\
         Decide the single next UI action that moves the test towards its goal.\n\n\
         {goal}\n\
         Step {step} of at most {max_steps}.\n\n\
         Recent actions:\n{recent}\n\
         {ACTION_REFERENCE}\n\n\
         Rules:\n\
         - Look at the attached screenshot before choosing coordinates.\n\
         - Before typing, make sure the target field is focused (tap it first).\n\
         - Use verify to confirm an observable fact the goal depends on.\n\
         - Choose complete once the goal is met, or when it evidently cannot be met.\n\n\
         Reply with one JSON object: the action fields plus a \"reasoning\" string.",
        goal = goal_block(test_case),
        recent = history.render_window(window),
    )
}

/// Re-prompt after the planner proposed an action the executor would refuse.
pub fn planner_correction(base: &str, rejected: &str, reason: &str) -> String {
    format!(
        "{base}\n\n\
         Your previous proposal {rejected} was rejected: {reason}.\n\
         Propose a different, valid action."
    )
}

/// Prompt asking the supervisor to judge progress. When `terminal`, a verdict is mandatory.
pub fn supervisor(test_case: &TestCase, history: &ActionHistory, window: usize, terminal: bool) -> String {
    let expectation = match &test_case.expected {
        Some(e) => format!("Suite author's expectation (for context only): {e}\n"),
        None => String::new(),
    };
    let decision = if terminal {
        "The run is over. You MUST set \"decision\" to \"verdict\"."
    } else {
        "Set \"decision\" to \"continue\" if the test should go on, or \"verdict\" if the outcome is already certain."
    };
    format!(
        "You are the supervisor of a mobile QA test. Judge the run against its goal using the \
         action history and the attached latest screenshot.\n\n\
         {goal}\
         {expectation}\n\
         Action history:\n{recent}\n\
         {decision}\n\n\
         A verdict is either:\n\
         - \"pass\": the goal's observable conditions are met.\n\
         - \"fail\" with \"failure_kind\": \"application\" when the app itself violates the goal \
           (a bug); give a short \"bug_classification\" such as \"missing element\" or \"wrong color\".\n\
         - \"fail\" with \"failure_kind\": \"technical\" when the environment broke (device offline, \
           actions not delivered) and nothing can be concluded about the app.\n\
         Never blame the application for a failure of the test environment.\n\n\
         Reply with one JSON object:\n\
         {{\"decision\": \"continue\" | \"verdict\", \"status\": \"pass\" | \"fail\", \
         \"failure_kind\": \"application\" | \"technical\", \"bug_classification\": \"...\", \
         \"rationale\": \"...\"}}",
        goal = goal_block(test_case),
        recent = history.render_window(window),
    )
}

pub fn text_check(target: &str) -> String {
    format!(
        "Look at the attached screenshot. Is the text \"{target}\" visible on screen \
         (exactly or as an obvious rendering of it)?\n\
         Reply with one JSON object: {{\"found\": true | false, \"evidence\": \"where you saw it or what is shown instead\"}}"
    )
}

pub fn element_check(descriptor: &str) -> String {
    format!(
        "Look at the attached screenshot. Is this UI element present and visible: {descriptor}?\n\
         Reply with one JSON object: {{\"found\": true | false, \"evidence\": \"what you observed\"}}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planner_prompt_carries_goal_setup_and_step() {
        let mut tc = TestCase::from_goal("Create a vault named InternVault");
        tc.setup = vec!["Obsidian is freshly installed".into()];
        let prompt = planner(&tc, &ActionHistory::new(), 5, 3, 15);
        assert!(prompt.contains("Create a vault named InternVault"));
        assert!(prompt.contains("- Obsidian is freshly installed"));
        assert!(prompt.contains("Step 3 of at most 15"));
        assert!(prompt.contains("first step"));
    }

    #[test]
    fn terminal_supervisor_prompt_demands_verdict() {
        let tc = TestCase::from_goal("g");
        assert!(supervisor(&tc, &ActionHistory::new(), 15, true).contains("MUST"));
        assert!(!supervisor(&tc, &ActionHistory::new(), 15, false).contains("MUST"));
    }
}
