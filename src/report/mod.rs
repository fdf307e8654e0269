//! Terminal run reports and the notifiers that deliver them

use crate::core::{CapturedOutput, ExecutionStatus, FailureCause, PipelineRun, RunState, StepStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};
use uuid::Uuid;

/// Log of one step that ran
#[derive(Debug, Clone, Serialize)]
pub struct StepLog {
    pub step_id: String,
    pub step_index: usize,
    #[serde(flatten)]
    pub status: StepStatus,
    pub exit_code: Option<i32>,
    pub duration_ms: i64,
    pub stdout: CapturedOutput,
    pub stderr: CapturedOutput,
}

/// Single terminal result of a run
///
/// Captured output is redacted when it is recorded, so a report never
/// holds secret values.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub execution_id: Uuid,
    pub pipeline: String,
    pub outcome: ExecutionStatus,
    pub failing_step: Option<String>,
    pub cause: Option<FailureCause>,

    /// Why preflight rejected the run
    pub rejection: Option<String>,

    /// Step that was in flight when the run was cancelled
    pub cancelled_step: Option<String>,

    pub exit_code: Option<i32>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepLog>,
}

impl RunReport {
    pub fn from_run(run: &PipelineRun) -> Self {
        let state = run.state();
        let (cause, rejection, cancelled_step) = match state {
            RunState::Failed { cause, .. } => (Some(cause.clone()), None, None),
            RunState::Rejected { reason } => (None, Some(reason.clone()), None),
            RunState::Cancelled { step_id, .. } => (None, None, step_id.clone()),
            _ => (None, None, None),
        };

        RunReport {
            execution_id: run.execution_id,
            pipeline: run.pipeline().name.clone(),
            outcome: state.status(),
            failing_step: state.failing_step().map(str::to_string),
            cause,
            rejection,
            cancelled_step,
            exit_code: state.exit_code(),
            started_at: run.started_at(),
            finished_at: run.finished_at(),
            steps: run
                .results()
                .iter()
                .map(|result| StepLog {
                    step_id: result.step_id.clone(),
                    step_index: result.step_index,
                    status: result.status.clone(),
                    exit_code: result.exit_code,
                    duration_ms: result.duration().num_milliseconds(),
                    stdout: result.stdout.clone(),
                    stderr: result.stderr.clone(),
                })
                .collect(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialise run report")
    }

    /// One-line description of the outcome
    pub fn headline(&self) -> String {
        match self.outcome {
            ExecutionStatus::Succeeded => format!("{} succeeded", self.pipeline),
            ExecutionStatus::Failed => format!(
                "{} failed at step `{}`: {}",
                self.pipeline,
                self.failing_step.as_deref().unwrap_or("?"),
                self.cause.as_ref().map(ToString::to_string).unwrap_or_default()
            ),
            ExecutionStatus::Cancelled => match &self.cancelled_step {
                Some(step) => format!("{} cancelled during step `{}`", self.pipeline, step),
                None => format!("{} cancelled before any step ran", self.pipeline),
            },
            ExecutionStatus::Rejected => format!(
                "{} rejected: {}",
                self.pipeline,
                self.rejection.as_deref().unwrap_or("invalid configuration")
            ),
            ExecutionStatus::Pending | ExecutionStatus::Running => {
                format!("{} has not finished", self.pipeline)
            }
        }
    }
}

/// Receives the terminal report of every run
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, report: &RunReport) -> Result<()>;
}

/// Writes the report to the log
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, report: &RunReport) -> Result<()> {
        match report.outcome {
            ExecutionStatus::Succeeded => info!(execution_id = %report.execution_id, "{}", report.headline()),
            _ => warn!(execution_id = %report.execution_id, "{}", report.headline()),
        }
        Ok(())
    }
}

/// Writes the report as pretty JSON to a file
#[derive(Debug, Clone)]
pub struct JsonFileNotifier {
    path: PathBuf,
}

impl JsonFileNotifier {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Notifier for JsonFileNotifier {
    async fn notify(&self, report: &RunReport) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&self.path, report.to_json()?)
            .await
            .with_context(|| format!("Failed to write report to {}", self.path.display()))?;
        info!("Run report written to {}", self.path.display());
        Ok(())
    }
}
