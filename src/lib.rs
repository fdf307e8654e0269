//! shipline - build, push and deploy a container image as a sequential pipeline

pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;
pub mod process;
pub mod report;

// Re-export commonly used types
pub use core::{
    Environment, ExecutionStatus, FailureCause, Pipeline, PipelineContext, PipelineRun, RunState, Step, StepResult,
};
pub use execution::{CancellationToken, ExecutionEngine, ExecutionEvent};
pub use process::{CommandExecutor, ExecutorConfig, SubprocessExecutor};
pub use report::{JsonFileNotifier, LogNotifier, Notifier, RunReport};
