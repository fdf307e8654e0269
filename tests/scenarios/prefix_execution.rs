//! Results always form a prefix of the step list

use crate::helpers::*;
use shipline::core::RunState;
use shipline::execution::CancellationToken;

const COMMANDS: [&str; 4] = ["docker build", "docker login", "docker push", "kubectl apply"];

fn behaviors() -> Vec<(Behavior, Option<&'static str>)> {
    vec![
        (Behavior::exit(0), None),
        (Behavior::exit(1), Some("exit")),
        (Behavior::exit(0).signalled(15), Some("signal")),
        (Behavior::spawn_error(), Some("spawn")),
    ]
}

/// Every combination of per-step outcomes over the four steps
#[tokio::test]
async fn test_every_outcome_combination_is_a_prefix() {
    let workspace = Workspace::new();
    let trigger = workspace.trigger(full_environment());
    let options = behaviors();
    let total = options.len().pow(COMMANDS.len() as u32);

    for combination in 0..total {
        let mut choice = combination;
        let mut executor = MockExecutor::new();
        let mut expected_failure = None;

        for (index, command) in COMMANDS.iter().enumerate() {
            let (behavior, kind) = options[choice % options.len()].clone();
            choice /= options.len();
            executor = executor.on(command, behavior);
            if expected_failure.is_none() {
                if let Some(kind) = kind {
                    expected_failure = Some((index, kind));
                }
            }
        }

        let (outcome, engine) = run_with(&docker_job(), executor, &trigger, &CancellationToken::new()).await;
        assert_prefix(&outcome);

        match expected_failure {
            None => {
                assert_run_succeeded(&outcome);
                assert_eq!(engine.executor().calls(), COMMANDS.to_vec());
            }
            Some((index, kind)) => {
                let step_id = outcome.run.steps()[index].id.clone();
                assert_step_failed(&outcome, &step_id, kind);
                assert_eq!(
                    engine.executor().calls(),
                    COMMANDS[..=index].to_vec(),
                    "combination {} invoked steps past the failure",
                    combination
                );
                if let RunState::Failed { step_index, .. } = outcome.state {
                    assert_eq!(step_index, index);
                }
            }
        }
    }
}

/// The completed count equals the number of leading successes
#[tokio::test]
async fn test_completed_steps_match_leading_successes() {
    let workspace = Workspace::new();
    let trigger = workspace.trigger(full_environment());

    for failing in 0..COMMANDS.len() {
        let executor = MockExecutor::new().on(COMMANDS[failing], Behavior::exit(2));
        let (outcome, _) = run_with(&docker_job(), executor, &trigger, &CancellationToken::new()).await;

        assert_eq!(outcome.run.completed_steps(), failing);
        assert_eq!(outcome.run.results().len(), failing + 1);
    }
}
