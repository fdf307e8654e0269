//! Main execution engine - drives a pipeline run to a terminal state

use crate::{
    core::{FailureCause, PipelineContext, PipelineRun, RunState, StepStatus},
    execution::{CancellationToken, StepRunner},
    process::CommandExecutor,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events that can occur during pipeline execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    PipelineStarted {
        execution_id: Uuid,
        pipeline_name: String,
        total_steps: usize,
    },
    PipelineRejected {
        execution_id: Uuid,
        reason: String,
    },
    StepStarted {
        step_id: String,
        step_index: usize,
        total_steps: usize,
    },
    StepSucceeded {
        step_id: String,
        duration: Duration,
    },
    StepFailed {
        step_id: String,
        cause: FailureCause,
        fatal: bool,
    },
    StepCancelled {
        step_id: String,
    },
    PipelineFinished {
        execution_id: Uuid,
        state: RunState,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Main pipeline execution engine
///
/// Steps run strictly in order. Nothing is retried here; a caller that
/// wants another attempt starts a new run.
pub struct ExecutionEngine<E> {
    runner: StepRunner<E>,
    event_handlers: Vec<EventHandler>,
}

impl<E: CommandExecutor> ExecutionEngine<E> {
    pub fn new(executor: E) -> Self {
        Self {
            runner: StepRunner::new(executor),
            event_handlers: Vec::new(),
        }
    }

    pub fn executor(&self) -> &E {
        self.runner.executor()
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    fn emit_event(&self, event: ExecutionEvent) {
        for handler in &self.event_handlers {
            handler(event.clone());
        }
    }

    /// Execute a run from `Pending` to a terminal state
    ///
    /// Configuration problems reject the run before any step starts.
    /// Cancellation kills the step in flight and ends the run as cancelled.
    pub async fn execute(
        &self,
        run: &mut PipelineRun,
        trigger: &PipelineContext,
        cancel: &CancellationToken,
    ) -> RunState {
        let execution_id = run.execution_id;
        let pipeline_name = run.pipeline().name.clone();

        if run.is_terminal() {
            warn!("Run {} already finished; not executing again", execution_id);
            return run.state().clone();
        }

        let ctx = match run.pipeline().preflight(trigger) {
            Ok(ctx) => ctx,
            Err(e) => {
                let mut environment = trigger.environment.clone();
                for key in &run.pipeline().secrets {
                    environment.mark_secret(key.clone());
                }
                let reason = environment.redactor().redact(&e.to_string());
                error!("Pipeline {} rejected: {}", pipeline_name, reason);
                if let Err(e) = run.reject(reason.clone()) {
                    warn!("Could not reject run {}: {}", execution_id, e);
                }
                self.emit_event(ExecutionEvent::PipelineRejected { execution_id, reason });
                return self.finish(run);
            }
        };

        if cancel.is_cancelled() {
            info!("Pipeline {} cancelled before start", pipeline_name);
            run.cancel();
            return self.finish(run);
        }

        if let Err(e) = run.start() {
            warn!("Could not start run {}: {}", execution_id, e);
            return run.state().clone();
        }

        let total_steps = run.steps().len();
        let output_limit = run.pipeline().output_limit_bytes;
        info!("Starting pipeline execution: {} ({})", pipeline_name, execution_id);
        self.emit_event(ExecutionEvent::PipelineStarted {
            execution_id,
            pipeline_name: pipeline_name.clone(),
            total_steps,
        });

        while let RunState::Running { step_index } = *run.state() {
            if cancel.is_cancelled() {
                info!("Pipeline {} cancelled before step {}", pipeline_name, step_index);
                run.cancel();
                break;
            }

            let step = run.steps()[step_index].clone();
            self.emit_event(ExecutionEvent::StepStarted {
                step_id: step.id.clone(),
                step_index,
                total_steps,
            });

            let result = self.runner.run(&step, step_index, &ctx, output_limit, cancel).await;

            match &result.status {
                StepStatus::Succeeded => {
                    info!("Step {} completed successfully", step.id);
                    self.emit_event(ExecutionEvent::StepSucceeded {
                        step_id: step.id.clone(),
                        duration: result.duration().to_std().unwrap_or_default(),
                    });
                }
                StepStatus::Failed { cause } => {
                    if step.fatal {
                        error!("Step {} failed: {}", step.id, cause);
                    } else {
                        warn!("Step {} failed but is not fatal: {}", step.id, cause);
                    }
                    self.emit_event(ExecutionEvent::StepFailed {
                        step_id: step.id.clone(),
                        cause: cause.clone(),
                        fatal: step.fatal,
                    });
                }
                StepStatus::Cancelled => {
                    self.emit_event(ExecutionEvent::StepCancelled {
                        step_id: step.id.clone(),
                    });
                }
            }

            if let Err(e) = run.record(result) {
                error!("Run {} rejected a step result: {}", execution_id, e);
                run.cancel();
                break;
            }
        }

        info!(
            "Pipeline execution finished: {} - {}",
            pipeline_name,
            run.state().status()
        );
        self.finish(run)
    }

    fn finish(&self, run: &PipelineRun) -> RunState {
        let state = run.state().clone();
        self.emit_event(ExecutionEvent::PipelineFinished {
            execution_id: run.execution_id,
            state: state.clone(),
        });
        state
    }
}
