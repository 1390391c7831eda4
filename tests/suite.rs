mod common;

use common::{gateway, orchestrator, MockDevice, Role, ScriptedModel, COMPLETE, PASS};
use mobile_qa_agent::agent_engine::state::TestCase;
use mobile_qa_agent::suite::SuiteRunner;

#[tokio::test]
async fn suite_brackets_each_case_with_launch_and_home() {
    let model = ScriptedModel::new("primary");
    model
        .always(Role::Planner, COMPLETE)
        .reply(Role::Supervisor, PASS)
        .reply(
            Role::Supervisor,
            r#"{"decision":"verdict","status":"fail","failure_kind":"application","bug_classification":"wrong color","rationale":"icon is gray"}"#,
        );
    let device = MockDevice::new();
    let orch = orchestrator(gateway(vec![model]), device.clone(), 5);
    let runner = SuiteRunner::new(orch, device.clone(), Some("md.obsidian".into()));

    let mut second = TestCase::from_goal("highlighter icon is red");
    second.id = "t2".into();
    second.expected = Some("FAIL".into());
    let mut first = TestCase::from_goal("open the vault");
    first.id = "t1".into();

    let summary = runner.run_all(vec![first, second]).await.unwrap();

    assert_eq!(summary.entries.len(), 2);
    assert_eq!(summary.passed(), 1);
    assert_eq!(summary.application_failures(), 1);
    assert!(!summary.all_passed());
    assert_eq!(summary.entries[1].matches_expectation, Some(true));
    assert_eq!(device.count("launch md.obsidian"), 2);
    assert_eq!(device.count("key home"), 2);

    let commands = device.commands();
    let first_launch = commands.iter().position(|c| c.starts_with("launch")).unwrap();
    let first_home = commands.iter().position(|c| c == "key home").unwrap();
    assert!(first_launch < first_home);
}
