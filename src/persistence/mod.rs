//! Persistence layer for pipeline run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteExecutionStore;

pub use crate::core::ExecutionStatus;
use crate::core::PipelineRun;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

/// Summary of a finished pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    /// Unique execution ID
    pub execution_id: Uuid,

    /// Pipeline name
    pub pipeline_name: String,

    /// Terminal status
    pub status: ExecutionStatus,

    /// Step that failed, for failed runs
    pub failing_step: Option<String>,

    /// Why the run failed or was rejected
    pub cause: Option<String>,

    /// When execution started (creation time for runs that never started)
    pub started_at: DateTime<Utc>,

    /// When the run reached its terminal state
    pub completed_at: Option<DateTime<Utc>>,

    /// Number of steps that succeeded
    pub completed_steps: usize,

    /// Total number of steps
    pub total_steps: usize,
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save a run summary, replacing one with the same ID
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()>;

    /// Load a run by ID
    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>>;

    /// List runs of a pipeline, newest first
    async fn list_executions(&self, pipeline_name: &str) -> Result<Vec<ExecutionSummary>>;

    /// List all pipeline names, sorted
    async fn list_pipelines(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or ephemeral use)
#[derive(Default)]
pub struct InMemoryPersistence {
    executions: RwLock<HashMap<Uuid, ExecutionSummary>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()> {
        let mut execs = self.executions.write().await;
        execs.insert(execution.execution_id, execution.clone());
        Ok(())
    }

    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>> {
        let execs = self.executions.read().await;
        Ok(execs.get(&execution_id).cloned())
    }

    async fn list_executions(&self, pipeline_name: &str) -> Result<Vec<ExecutionSummary>> {
        let execs = self.executions.read().await;
        let mut result: Vec<_> = execs
            .values()
            .filter(|exec| exec.pipeline_name == pipeline_name)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(result)
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let execs = self.executions.read().await;
        let mut names: Vec<_> = execs.values().map(|exec| exec.pipeline_name.clone()).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

/// Use an opened history store, or keep history in memory if it failed to open
pub fn or_in_memory(opened: Result<Arc<dyn PersistenceBackend>>) -> Arc<dyn PersistenceBackend> {
    match opened {
        Ok(store) => store,
        Err(e) => {
            warn!("Could not open execution history, keeping this run in memory: {:#}", e);
            Arc::new(InMemoryPersistence::new())
        }
    }
}

/// Create a summary from a run
pub fn create_summary(run: &PipelineRun) -> ExecutionSummary {
    let state = run.state();
    let cause = match state {
        crate::core::RunState::Failed { cause, .. } => Some(cause.to_string()),
        crate::core::RunState::Rejected { reason } => Some(reason.clone()),
        _ => None,
    };

    ExecutionSummary {
        execution_id: run.execution_id,
        pipeline_name: run.pipeline().name.clone(),
        status: state.status(),
        failing_step: state.failing_step().map(str::to_string),
        cause,
        started_at: run.started_at().unwrap_or_else(|| run.created_at()),
        completed_at: run.finished_at(),
        completed_steps: run.completed_steps(),
        total_steps: run.steps().len(),
    }
}
