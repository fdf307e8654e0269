//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Overall pipeline execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Pipeline has not started
    Pending,
    /// Pipeline is currently running
    Running,
    /// Every step succeeded
    Succeeded,
    /// A fatal step failed
    Failed,
    /// Pipeline was cancelled
    Cancelled,
    /// Configuration was invalid; no step ran
    Rejected,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Succeeded => "succeeded",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
            ExecutionStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "succeeded" => Ok(ExecutionStatus::Succeeded),
            "failed" => Ok(ExecutionStatus::Failed),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            "rejected" => Ok(ExecutionStatus::Rejected),
            other => Err(format!("unknown execution status `{}`", other)),
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a step failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureCause {
    /// Process exited with a non-zero code
    NonZeroExit { code: i32 },
    /// Process was killed by a signal it did not expect
    Signalled { signal: i32 },
    /// Step exceeded its timeout and was killed
    Timeout { after_secs: u64 },
    /// Process could not be started
    SpawnFailed { reason: String },
    /// A declared input could not be supplied
    MissingInput { reason: String },
}

impl FailureCause {
    /// Short machine-readable kind
    pub fn kind(&self) -> &'static str {
        match self {
            FailureCause::NonZeroExit { .. } => "exit",
            FailureCause::Signalled { .. } => "signal",
            FailureCause::Timeout { .. } => "timeout",
            FailureCause::SpawnFailed { .. } => "spawn",
            FailureCause::MissingInput { .. } => "input",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FailureCause::Timeout { .. })
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::NonZeroExit { code } => write!(f, "exited with code {}", code),
            FailureCause::Signalled { signal } => write!(f, "killed by signal {}", signal),
            FailureCause::Timeout { after_secs } => write!(f, "timeout after {}s", after_secs),
            FailureCause::SpawnFailed { reason } => write!(f, "failed to start: {}", reason),
            FailureCause::MissingInput { reason } => write!(f, "missing input: {}", reason),
        }
    }
}

/// Captured output of one stream, bounded in size
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedOutput {
    /// Captured text (lossy UTF-8, secrets redacted)
    pub text: String,

    /// Bytes dropped after the capture limit was reached
    pub truncated_bytes: u64,
}

impl CapturedOutput {
    pub fn is_truncated(&self) -> bool {
        self.truncated_bytes > 0
    }
}

/// How a step ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed { cause: FailureCause },
    Cancelled,
}

/// Outcome of running a single step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub step_index: usize,
    pub status: StepStatus,

    /// Exit code, when the process exited on its own
    pub exit_code: Option<i32>,

    pub stdout: CapturedOutput,
    pub stderr: CapturedOutput,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl StepResult {
    pub fn is_success(&self) -> bool {
        matches!(self.status, StepStatus::Succeeded)
    }

    pub fn cause(&self) -> Option<&FailureCause> {
        match &self.status {
            StepStatus::Failed { cause } => Some(cause),
            _ => None,
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at.signed_duration_since(self.started_at)
    }
}

/// State machine of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    /// Created, not yet started
    Pending,
    /// Executing the step at `step_index`
    Running { step_index: usize },
    /// Every step succeeded
    Succeeded,
    /// The step at `step_index` failed; nothing after it ran
    Failed {
        step_index: usize,
        step_id: String,
        cause: FailureCause,
    },
    /// Stopped by an external signal, possibly mid-step
    Cancelled {
        step_index: Option<usize>,
        step_id: Option<String>,
    },
    /// Preflight found a configuration problem; no step ran
    Rejected { reason: String },
}

impl RunState {
    /// Check if the run reached a final state
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunState::Pending | RunState::Running { .. })
    }

    pub fn status(&self) -> ExecutionStatus {
        match self {
            RunState::Pending => ExecutionStatus::Pending,
            RunState::Running { .. } => ExecutionStatus::Running,
            RunState::Succeeded => ExecutionStatus::Succeeded,
            RunState::Failed { .. } => ExecutionStatus::Failed,
            RunState::Cancelled { .. } => ExecutionStatus::Cancelled,
            RunState::Rejected { .. } => ExecutionStatus::Rejected,
        }
    }

    /// Process exit code for a terminal state
    ///
    /// 0 succeeded, 1 failed, 2 cancelled, 3 invalid configuration.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            RunState::Succeeded => Some(0),
            RunState::Failed { .. } => Some(1),
            RunState::Cancelled { .. } => Some(2),
            RunState::Rejected { .. } => Some(3),
            RunState::Pending | RunState::Running { .. } => None,
        }
    }

    /// Id of the step that failed, if the run failed
    pub fn failing_step(&self) -> Option<&str> {
        match self {
            RunState::Failed { step_id, .. } => Some(step_id),
            _ => None,
        }
    }
}
