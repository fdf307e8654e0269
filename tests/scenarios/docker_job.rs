//! The built-in build, login, push and deploy job end to end

use crate::helpers::*;
use shipline::core::config::{DOCKER_PASSWORD, DOCKER_USERNAME, IMAGE_TAG};
use shipline::core::{Environment, RunState};
use shipline::execution::{CancellationToken, ExecutionEvent};
use shipline::report::RunReport;

/// Four successes run in order and the run succeeds
#[tokio::test]
async fn test_all_steps_succeed_in_order() {
    let workspace = Workspace::new();
    let (outcome, engine) = run_with(
        &docker_job(),
        MockExecutor::new(),
        &workspace.trigger(full_environment()),
        &CancellationToken::new(),
    )
    .await;

    assert_run_succeeded(&outcome);
    assert_eq!(outcome.step_ids(), vec!["build", "login", "push", "deploy"]);
    assert_eq!(
        engine.executor().calls(),
        vec!["docker build", "docker login", "docker push", "kubectl apply"]
    );
    assert_prefix(&outcome);
}

/// Build and push name the same fully-qualified image
#[tokio::test]
async fn test_build_and_push_share_one_reference() {
    let workspace = Workspace::new();
    let (_, engine) = run_with(
        &docker_job(),
        MockExecutor::new(),
        &workspace.trigger(full_environment()),
        &CancellationToken::new(),
    )
    .await;

    let invocations = engine.executor().invocations();
    let image = image_reference();
    assert_eq!(invocations[0].args[2], image);
    assert_eq!(invocations[2].args[1], image);
    assert_eq!(invocations[0].args[3], workspace.dir.path().display().to_string());
    assert_eq!(
        invocations[3].args[2],
        workspace.dir.path().join("k8s-deployment.yaml").display().to_string()
    );
    for invocation in &invocations {
        assert_eq!(invocation.current_dir, workspace.dir.path());
    }
}

/// The password reaches login through stdin only
#[tokio::test]
async fn test_password_is_sent_on_stdin() {
    let workspace = Workspace::new();
    let (_, engine) = run_with(
        &docker_job(),
        MockExecutor::new(),
        &workspace.trigger(full_environment()),
        &CancellationToken::new(),
    )
    .await;

    let invocations = engine.executor().invocations();
    let login = &invocations[1];
    assert_eq!(login.args, vec!["login", "-u", "deploy-bot", "--password-stdin"]);
    assert_eq!(login.stdin.as_deref(), Some(PASSWORD.as_bytes()));

    for invocation in &invocations {
        assert!(!invocation.args.iter().any(|a| a.contains(PASSWORD)));
        assert!(!invocation.env.iter().any(|(_, v)| v.contains(PASSWORD)));
        assert!(invocation.env_remove.contains(&DOCKER_PASSWORD.to_string()));
    }
}

/// A failed build stops the run before anything else is invoked
#[tokio::test]
async fn test_build_failure_stops_everything() {
    let workspace = Workspace::new();
    let executor = MockExecutor::new().on(
        "docker build",
        Behavior::exit(1).with_stderr("failed to solve: python:3.12-slim: not found\n"),
    );

    let (outcome, engine) = run_with(
        &docker_job(),
        executor,
        &workspace.trigger(full_environment()),
        &CancellationToken::new(),
    )
    .await;

    assert_step_failed(&outcome, "build", "exit");
    assert_eq!(engine.executor().calls(), vec!["docker build"]);
    assert_eq!(outcome.step_ids(), vec!["build"]);
    assert!(outcome.run.results()[0].stderr.text.contains("not found"));
    assert_prefix(&outcome);
}

/// A login that hangs times out; the built image stays behind
#[tokio::test]
async fn test_login_timeout_keeps_build_artifact() {
    let workspace = Workspace::new();
    let world = std::sync::Arc::new(std::sync::Mutex::new(World::default()));
    let executor = MockExecutor::with_world(world.clone()).on(
        "docker login",
        Behavior::hang().with_stdout("Authenticating with existing credentials...\n"),
    );
    let mut config = docker_job();
    config.steps[1].timeout_secs = Some(1);

    let (outcome, engine) = run_with(
        &config,
        executor,
        &workspace.trigger(full_environment()),
        &CancellationToken::new(),
    )
    .await;

    assert_step_failed(&outcome, "login", "timeout");
    assert_eq!(engine.executor().calls(), vec!["docker build", "docker login"]);

    let login = &outcome.run.results()[1];
    assert!(login.stdout.text.contains("Authenticating"));
    assert!(world.lock().unwrap().local_images.contains(&image_reference()));
    assert!(world.lock().unwrap().registry.is_empty());
}

/// Missing password rejects the run with exit code 3 and runs nothing
#[tokio::test]
async fn test_missing_password_rejects_run() {
    let workspace = Workspace::new();
    let env = Environment::new().with(DOCKER_USERNAME, "deploy-bot").with(IMAGE_TAG, TAG);

    let (outcome, engine) = run_with(
        &docker_job(),
        MockExecutor::new(),
        &workspace.trigger(env),
        &CancellationToken::new(),
    )
    .await;

    match &outcome.state {
        RunState::Rejected { reason } => assert!(reason.contains(DOCKER_PASSWORD)),
        other => panic!("expected rejection, got {:?}", other),
    }
    assert_eq!(outcome.state.exit_code(), Some(3));
    assert!(engine.executor().calls().is_empty());
    assert!(outcome.run.results().is_empty());
    assert!(outcome
        .events
        .iter()
        .all(|e| !matches!(e, ExecutionEvent::StepStarted { .. })));
}

/// Empty values count as missing
#[tokio::test]
async fn test_empty_username_rejects_run() {
    let workspace = Workspace::new();
    let env = full_environment().with(DOCKER_USERNAME, "");

    let (outcome, engine) = run_with(
        &docker_job(),
        MockExecutor::new(),
        &workspace.trigger(env),
        &CancellationToken::new(),
    )
    .await;

    assert!(matches!(outcome.state, RunState::Rejected { .. }));
    assert!(engine.executor().calls().is_empty());
}

/// A missing manifest is caught before the build starts
#[tokio::test]
async fn test_missing_manifest_rejects_run() {
    let workspace = Workspace::new();
    std::fs::remove_file(workspace.dir.path().join("k8s-deployment.yaml")).unwrap();

    let (outcome, engine) = run_with(
        &docker_job(),
        MockExecutor::new(),
        &workspace.trigger(full_environment()),
        &CancellationToken::new(),
    )
    .await;

    match &outcome.state {
        RunState::Rejected { reason } => assert!(reason.contains("k8s-deployment.yaml")),
        other => panic!("expected rejection, got {:?}", other),
    }
    assert!(engine.executor().calls().is_empty());
}

/// `latest` is refused unless the pipeline opts in
#[tokio::test]
async fn test_latest_tag_rejected() {
    let workspace = Workspace::new();
    let env = full_environment().with(IMAGE_TAG, "latest");

    let (outcome, engine) = run_with(
        &docker_job(),
        MockExecutor::new(),
        &workspace.trigger(env.clone()),
        &CancellationToken::new(),
    )
    .await;
    assert!(matches!(outcome.state, RunState::Rejected { .. }));
    assert!(engine.executor().calls().is_empty());

    let mut config = docker_job();
    if let Some(image) = config.image.as_mut() {
        image.allow_mutable_tag = true;
    }
    let (outcome, _) = run_with(&config, MockExecutor::new(), &workspace.trigger(env), &CancellationToken::new()).await;
    assert_run_succeeded(&outcome);
}

/// Output that echoes the password is redacted in results and reports
#[tokio::test]
async fn test_secret_never_reaches_report() {
    let workspace = Workspace::new();
    let leak = format!("WARNING! Using --password {} via the CLI is insecure\n", PASSWORD);
    let executor = MockExecutor::new().on("docker login", Behavior::exit(1).with_stderr(&leak));

    let (outcome, _) = run_with(
        &docker_job(),
        executor,
        &workspace.trigger(full_environment()),
        &CancellationToken::new(),
    )
    .await;

    assert_step_failed(&outcome, "login", "exit");
    let json = RunReport::from_run(&outcome.run).to_json().unwrap();
    assert!(!json.contains(PASSWORD));
    assert!(json.contains("[REDACTED]"));
    assert!(!format!("{:?}", outcome.run).contains(PASSWORD));
}
