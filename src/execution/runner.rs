//! Step runner - runs one step's command under its timeout

use crate::{
    core::{CapturedOutput, FailureCause, PipelineContext, Step, StepResult, StepStatus},
    execution::CancellationToken,
    process::{CommandExecutor, ExitOutcome, OutputSink, ProcessError},
};
use chrono::Utc;
use tracing::{debug, error, info, warn};

/// Runs single steps through a command executor
pub struct StepRunner<E> {
    executor: E,
}

/// How the race between command, timeout and cancellation ended
enum Finish {
    Completed(Result<ExitOutcome, ProcessError>),
    TimedOut,
    Cancelled,
}

impl<E: CommandExecutor> StepRunner<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Run a step and describe how it ended
    ///
    /// Never fails: every problem becomes a failed or cancelled result.
    /// Output captured before a timeout or cancellation is kept.
    pub async fn run(
        &self,
        step: &Step,
        index: usize,
        ctx: &PipelineContext,
        output_limit: usize,
        cancel: &CancellationToken,
    ) -> StepResult {
        let started_at = Utc::now();
        let redactor = ctx.environment.redactor();

        let invocation = match step.invocation(ctx) {
            Ok(invocation) => invocation,
            Err(e) => {
                error!("Step {} could not be prepared: {}", step.id, e);
                let cause = FailureCause::MissingInput {
                    reason: redactor.redact(&e.to_string()),
                };
                return Self::result(step, index, StepStatus::Failed { cause }, None, Default::default(), started_at);
            }
        };

        info!("Running step {}: {}", step.id, invocation.display(&redactor));
        debug!("Invocation for step {}: {:?}", step.id, invocation);

        let sink = OutputSink::new(output_limit);
        let finish = tokio::select! {
            biased;
            _ = cancel.cancelled() => Finish::Cancelled,
            _ = tokio::time::sleep(step.timeout) => Finish::TimedOut,
            outcome = self.executor.execute(&invocation, &sink) => Finish::Completed(outcome),
        };
        // The execution future is gone by now; its process group with it
        let output = sink.captured(&redactor);

        let (status, exit_code) = match finish {
            Finish::Completed(Ok(ExitOutcome::Exited(0))) => (StepStatus::Succeeded, Some(0)),
            Finish::Completed(Ok(ExitOutcome::Exited(code))) => {
                warn!("Step {} exited with code {}", step.id, code);
                (
                    StepStatus::Failed {
                        cause: FailureCause::NonZeroExit { code },
                    },
                    Some(code),
                )
            }
            Finish::Completed(Ok(ExitOutcome::Signalled(signal))) => {
                warn!("Step {} was killed by signal {}", step.id, signal);
                (
                    StepStatus::Failed {
                        cause: FailureCause::Signalled { signal },
                    },
                    None,
                )
            }
            Finish::Completed(Err(e)) => {
                error!("Step {} could not run: {}", step.id, e);
                let cause = FailureCause::SpawnFailed {
                    reason: redactor.redact(&e.to_string()),
                };
                (StepStatus::Failed { cause }, None)
            }
            Finish::TimedOut => {
                error!("Timeout for step {} after {}s", step.id, step.timeout.as_secs());
                (
                    StepStatus::Failed {
                        cause: FailureCause::Timeout {
                            after_secs: step.timeout.as_secs(),
                        },
                    },
                    None,
                )
            }
            Finish::Cancelled => {
                info!("Step {} cancelled", step.id);
                (StepStatus::Cancelled, None)
            }
        };

        Self::result(step, index, status, exit_code, output, started_at)
    }

    fn result(
        step: &Step,
        index: usize,
        status: StepStatus,
        exit_code: Option<i32>,
        (stdout, stderr): (CapturedOutput, CapturedOutput),
        started_at: chrono::DateTime<Utc>,
    ) -> StepResult {
        StepResult {
            step_id: step.id.clone(),
            step_index: index,
            status,
            exit_code,
            stdout,
            stderr,
            started_at,
            finished_at: Utc::now(),
        }
    }
}
