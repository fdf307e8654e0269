//! How step failures map onto the run state

use crate::helpers::*;
use shipline::core::config::PipelineConfig;
use shipline::core::{FailureCause, RunState, StepStatus};
use shipline::execution::{CancellationToken, ExecutionEvent};
use shipline::report::RunReport;

#[tokio::test]
async fn test_push_killed_by_signal() {
    let workspace = Workspace::new();
    let executor = MockExecutor::new().on("docker push", Behavior::exit(0).signalled(9));

    let (outcome, engine) = run_with(
        &docker_job(),
        executor,
        &workspace.trigger(full_environment()),
        &CancellationToken::new(),
    )
    .await;

    assert_step_failed(&outcome, "push", "signal");
    assert_eq!(step_cause(&outcome, "push"), Some(&FailureCause::Signalled { signal: 9 }));
    assert!(!engine.executor().calls().contains(&"kubectl apply".to_string()));
    assert_eq!(outcome.run.results()[2].exit_code, None);
}

#[tokio::test]
async fn test_missing_kubectl_is_a_spawn_failure() {
    let workspace = Workspace::new();
    let executor = MockExecutor::new().on("kubectl apply", Behavior::spawn_error());

    let (outcome, _) = run_with(
        &docker_job(),
        executor,
        &workspace.trigger(full_environment()),
        &CancellationToken::new(),
    )
    .await;

    assert_step_failed(&outcome, "deploy", "spawn");
    match step_cause(&outcome, "deploy") {
        Some(FailureCause::SpawnFailed { reason }) => assert!(reason.contains("No such file")),
        other => panic!("unexpected cause {:?}", other),
    }
    assert_eq!(outcome.run.results().len(), 4);
    assert_prefix(&outcome);
}

#[tokio::test]
async fn test_push_without_login_fails() {
    // login "succeeds" without touching the world, so push is rejected by the registry
    let workspace = Workspace::new();
    let executor = MockExecutor::new()
        .on("docker login", Behavior::exit(0).skip_effect())
        .on("docker push", Behavior::exit(0));

    let (outcome, _) = run_with(
        &docker_job(),
        executor,
        &workspace.trigger(full_environment()),
        &CancellationToken::new(),
    )
    .await;

    assert_step_failed(&outcome, "push", "exit");
}

#[tokio::test]
async fn test_failed_step_result_keeps_exit_code_and_output() {
    let workspace = Workspace::new();
    let executor = MockExecutor::new().on(
        "docker push",
        Behavior::exit(1)
            .with_stdout("The push refers to repository [docker.io/acme/python-k8s-demo]\n")
            .with_stderr("denied: requested access to the resource is denied\n"),
    );

    let (outcome, _) = run_with(
        &docker_job(),
        executor,
        &workspace.trigger(full_environment()),
        &CancellationToken::new(),
    )
    .await;

    assert_step_failed(&outcome, "push", "exit");
    let push = &outcome.run.results()[2];
    assert_eq!(push.exit_code, Some(1));
    assert!(push.stdout.text.contains("The push refers to"));
    assert!(push.stderr.text.contains("denied"));
    assert!(outcome.run.results()[..2].iter().all(|r| r.is_success()));

    let report = RunReport::from_run(&outcome.run);
    assert_eq!(report.failing_step.as_deref(), Some("push"));
    assert_eq!(report.exit_code, Some(1));
    assert!(report.headline().contains("push"));
}

#[tokio::test]
async fn test_non_fatal_step_does_not_stop_the_run() {
    let yaml = r#"
name: lint-then-build
steps:
  - id: lint
    program: hadolint
    args: ["Dockerfile"]
    fatal: false
  - id: build
    program: docker
    args: ["build", "{{ workspace }}"]
"#;
    let config = PipelineConfig::from_yaml(yaml).unwrap();
    let workspace = Workspace::new();
    let executor = MockExecutor::new().on("hadolint Dockerfile", Behavior::exit(1));

    let (outcome, engine) = run_with(
        &config,
        executor,
        &workspace.trigger(full_environment()),
        &CancellationToken::new(),
    )
    .await;

    assert_run_succeeded(&outcome);
    assert_eq!(engine.executor().calls(), vec!["hadolint Dockerfile", "docker build"]);
    assert!(matches!(outcome.run.results()[0].status, StepStatus::Failed { .. }));
    assert!(outcome.events.iter().any(|e| matches!(
        e,
        ExecutionEvent::StepFailed { step_id, fatal: false, .. } if step_id == "lint"
    )));
}

#[tokio::test]
async fn test_events_for_failed_run() {
    let workspace = Workspace::new();
    let executor = MockExecutor::new().on("docker login", Behavior::exit(1));

    let (outcome, _) = run_with(
        &docker_job(),
        executor,
        &workspace.trigger(full_environment()),
        &CancellationToken::new(),
    )
    .await;

    assert!(matches!(outcome.events.first(), Some(ExecutionEvent::PipelineStarted { total_steps: 4, .. })));
    assert!(matches!(
        outcome.events.last(),
        Some(ExecutionEvent::PipelineFinished { state: RunState::Failed { step_index: 1, .. }, .. })
    ));
    let started = outcome
        .events
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::StepStarted { .. }))
        .count();
    assert_eq!(started, 2);
}
