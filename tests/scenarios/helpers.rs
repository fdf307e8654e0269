//! Test utilities for shipline scenarios

#![allow(dead_code)]

use async_trait::async_trait;
use shipline::core::config::{PipelineConfig, DOCKER_PASSWORD, DOCKER_USERNAME, IMAGE_TAG};
use shipline::core::{Environment, FailureCause, Invocation, PipelineContext, PipelineRun, RunState, StepStatus};
use shipline::execution::{CancellationToken, ExecutionEngine, ExecutionEvent};
use shipline::process::{CommandExecutor, ExitOutcome, OutputSink, ProcessError, Stream};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const PASSWORD: &str = "pw-7f3a9c-never-print";
pub const TAG: &str = "1.4.2";
pub const REPOSITORY: &str = "acme/python-k8s-demo";

/// What a scripted command does
#[derive(Debug, Clone)]
pub enum Outcome {
    Exit(i32),
    Signal(i32),
    SpawnError,
    /// Never finishes on its own
    Hang,
}

/// One scripted behaviour
#[derive(Debug, Clone)]
pub struct Behavior {
    pub stdout: String,
    pub stderr: String,
    pub delay: Duration,
    pub outcome: Outcome,
    /// Whether a successful call updates the `World`
    pub effect: bool,
}

impl Behavior {
    pub fn exit(code: i32) -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            delay: Duration::ZERO,
            outcome: Outcome::Exit(code),
            effect: true,
        }
    }

    pub fn spawn_error() -> Self {
        Self {
            outcome: Outcome::SpawnError,
            ..Self::exit(0)
        }
    }

    pub fn signalled(mut self, signal: i32) -> Self {
        self.outcome = Outcome::Signal(signal);
        self
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Succeed without changing the `World`
    pub fn skip_effect(mut self) -> Self {
        self.effect = false;
        self
    }

    pub fn hang() -> Self {
        Self {
            outcome: Outcome::Hang,
            ..Self::exit(0)
        }
    }

    pub fn with_stdout(mut self, stdout: &str) -> Self {
        self.stdout = stdout.to_string();
        self
    }

    pub fn with_stderr(mut self, stderr: &str) -> Self {
        self.stderr = stderr.to_string();
        self
    }
}

/// Images and deployments the fake docker/kubectl act on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct World {
    pub local_images: BTreeSet<String>,
    pub registry: BTreeSet<String>,
    pub logged_in: bool,
    pub applied_manifests: Vec<String>,
}

/// Command executor that plays back scripted behaviours
///
/// Commands are keyed by program and first argument, e.g. `docker push`.
/// Unscripted commands succeed and update the shared `World`.
#[derive(Default)]
pub struct MockExecutor {
    scripts: Mutex<HashMap<String, VecDeque<Behavior>>>,
    calls: Mutex<Vec<Invocation>>,
    world: Arc<Mutex<World>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_world(world: Arc<Mutex<World>>) -> Self {
        Self {
            world,
            ..Self::default()
        }
    }

    /// Queue a behaviour for the next call of `command`
    pub fn on(self, command: &str, behavior: Behavior) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(command.to_string())
            .or_default()
            .push_back(behavior);
        self
    }

    /// Commands invoked so far, as `program arg0`
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(key).collect()
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    fn apply(&self, invocation: &Invocation) -> i32 {
        let mut world = self.world.lock().unwrap();
        let args = &invocation.args;
        let flag = |name: &str| {
            args.iter()
                .position(|arg| arg == name)
                .and_then(|index| args.get(index + 1))
                .cloned()
        };
        match key(invocation).as_str() {
            "docker build" => {
                if let Some(image) = flag("-t") {
                    world.local_images.insert(image);
                }
            }
            "docker login" => {
                if invocation.stdin.is_none() {
                    return 1;
                }
                world.logged_in = true;
            }
            "docker push" => match args.get(1) {
                Some(image) if world.logged_in && world.local_images.contains(image) => {
                    world.registry.insert(image.clone());
                }
                _ => return 1,
            },
            "kubectl apply" => match flag("-f") {
                Some(manifest) => world.applied_manifests.push(manifest),
                None => return 1,
            },
            _ => {}
        }
        0
    }
}

fn key(invocation: &Invocation) -> String {
    match invocation.args.first() {
        Some(arg) => format!("{} {}", invocation.program, arg),
        None => invocation.program.clone(),
    }
}

#[async_trait]
impl CommandExecutor for MockExecutor {
    async fn execute(&self, invocation: &Invocation, sink: &OutputSink) -> Result<ExitOutcome, ProcessError> {
        self.calls.lock().unwrap().push(invocation.clone());

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&key(invocation))
            .and_then(VecDeque::pop_front);

        let behavior = match scripted {
            Some(behavior) => behavior,
            None => return Ok(ExitOutcome::Exited(self.apply(invocation))),
        };

        sink.write(Stream::Stdout, behavior.stdout.as_bytes());
        sink.write(Stream::Stderr, behavior.stderr.as_bytes());
        tokio::time::sleep(behavior.delay).await;

        match behavior.outcome {
            Outcome::Exit(0) if behavior.effect => Ok(ExitOutcome::Exited(self.apply(invocation))),
            Outcome::Exit(code) => Ok(ExitOutcome::Exited(code)),
            Outcome::Signal(signal) => Ok(ExitOutcome::Signalled(signal)),
            Outcome::SpawnError => Err(ProcessError::Spawn {
                program: invocation.program.clone(),
                reason: "No such file or directory (os error 2)".to_string(),
            }),
            Outcome::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

/// A scratch checkout with a Dockerfile and a deployment manifest
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create workspace");
        std::fs::write(dir.path().join("Dockerfile"), "FROM python:3.12-slim\n").unwrap();
        std::fs::write(dir.path().join("k8s-deployment.yaml"), "kind: Deployment\n").unwrap();
        Self { dir }
    }

    pub fn trigger(&self, env: Environment) -> PipelineContext {
        PipelineContext::new(self.dir.path(), env)
    }
}

/// Every key the built-in job needs
pub fn full_environment() -> Environment {
    Environment::new()
        .with(DOCKER_USERNAME, "deploy-bot")
        .with(DOCKER_PASSWORD, PASSWORD)
        .with(IMAGE_TAG, TAG)
}

pub fn image_reference() -> String {
    format!("{}:{}", REPOSITORY, TAG)
}

pub fn docker_job() -> PipelineConfig {
    PipelineConfig::docker_deploy(REPOSITORY)
}

/// Everything a test wants to look at after a run
pub struct RunOutcome {
    pub state: RunState,
    pub run: PipelineRun,
    pub events: Vec<ExecutionEvent>,
}

impl RunOutcome {
    pub fn step_ids(&self) -> Vec<&str> {
        self.run.results().iter().map(|r| r.step_id.as_str()).collect()
    }
}

/// Execute one run of `config` against `executor`
pub async fn run_with<E: CommandExecutor>(
    config: &PipelineConfig,
    executor: E,
    trigger: &PipelineContext,
    cancel: &CancellationToken,
) -> (RunOutcome, ExecutionEngine<E>) {
    let mut engine = ExecutionEngine::new(executor);
    let events = Arc::new(Mutex::new(Vec::new()));
    {
        let events = events.clone();
        engine.add_event_handler(move |event| events.lock().unwrap().push(event));
    }

    let mut run = config.to_pipeline().new_run();
    let state = engine.execute(&mut run, trigger, cancel).await;
    let events = events.lock().unwrap().clone();

    (RunOutcome { state, run, events }, engine)
}

/// Assert the run succeeded
pub fn assert_run_succeeded(outcome: &RunOutcome) {
    assert_eq!(
        outcome.state,
        RunState::Succeeded,
        "run should have succeeded, results: {:?}",
        outcome.run.results()
    );
    assert_eq!(outcome.state.exit_code(), Some(0));
}

/// Assert the run failed at `step_id` with a cause of `kind`
pub fn assert_step_failed(outcome: &RunOutcome, step_id: &str, kind: &str) {
    match &outcome.state {
        RunState::Failed { step_id: failed, cause, .. } => {
            assert_eq!(failed, step_id, "wrong failing step");
            assert_eq!(cause.kind(), kind, "wrong failure cause: {}", cause);
        }
        other => panic!("run should have failed at {}, but was {:?}", step_id, other),
    }
    assert_eq!(outcome.state.exit_code(), Some(1));
}

/// Assert results are a prefix of the step list and end where the state says
pub fn assert_prefix(outcome: &RunOutcome) {
    let step_ids: Vec<&str> = outcome.run.steps().iter().map(|s| s.id.as_str()).collect();
    let result_ids = outcome.step_ids();
    assert_eq!(
        &step_ids[..result_ids.len()],
        result_ids.as_slice(),
        "results are not a prefix of the steps"
    );
    for (index, result) in outcome.run.results().iter().enumerate() {
        assert_eq!(result.step_index, index);
    }

    match &outcome.state {
        RunState::Succeeded => assert_eq!(result_ids.len(), step_ids.len()),
        RunState::Failed { step_index, .. } => assert_eq!(result_ids.len(), step_index + 1),
        RunState::Cancelled { step_index, .. } => {
            assert!(result_ids.len() <= step_index.map(|i| i + 1).unwrap_or(0))
        }
        RunState::Rejected { .. } => assert!(result_ids.is_empty()),
        other => panic!("run did not finish: {:?}", other),
    }
}

/// The cause recorded for a step, if it failed
pub fn step_cause<'a>(outcome: &'a RunOutcome, step_id: &str) -> Option<&'a FailureCause> {
    outcome
        .run
        .results()
        .iter()
        .find(|r| r.step_id == step_id)
        .and_then(|r| match &r.status {
            StepStatus::Failed { cause } => Some(cause),
            _ => None,
        })
}
