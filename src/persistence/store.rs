//! SQLite-based run history

use crate::persistence::{ExecutionStatus, ExecutionSummary, PersistenceBackend};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS executions (
    id TEXT PRIMARY KEY,
    pipeline_name TEXT NOT NULL,
    status TEXT NOT NULL,
    failing_step TEXT,
    cause TEXT,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    completed_steps INTEGER NOT NULL DEFAULT 0,
    total_steps INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_pipeline_name ON executions(pipeline_name);
CREATE INDEX IF NOT EXISTS idx_started_at ON executions(started_at);
"#;

const COLUMNS: &str =
    "id, pipeline_name, status, failing_step, cause, started_at, completed_at, completed_steps, total_steps";

/// SQLite execution store
pub struct SqliteExecutionStore {
    pool: SqlitePool,
}

impl SqliteExecutionStore {
    /// Open (creating if needed) a database file
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open history database {}", db_path.display()))?;

        Self::with_pool(pool).await
    }

    /// A private database that lives as long as the store
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // Each in-memory connection is its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to open in-memory database")?;

        Self::with_pool(pool).await
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        Self::new(Self::default_path()?).await
    }

    /// `<data dir>/shipline/executions.db`, creating the directory
    pub fn default_path() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
        let db_dir = data_dir.join("shipline");
        std::fs::create_dir_all(&db_dir)
            .with_context(|| format!("Failed to create {}", db_dir.display()))?;
        Ok(db_dir.join("executions.db"))
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .context("Failed to initialise history schema")?;
        Ok(Self { pool })
    }

    fn summary_from_row(row: &SqliteRow) -> Result<ExecutionSummary> {
        let status: String = row.try_get("status")?;
        Ok(ExecutionSummary {
            execution_id: Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
            pipeline_name: row.try_get("pipeline_name")?,
            status: ExecutionStatus::from_str(&status).map_err(|e| anyhow!(e))?,
            failing_step: row.try_get("failing_step")?,
            cause: row.try_get("cause")?,
            started_at: row.try_get::<DateTime<Utc>, _>("started_at")?,
            completed_at: row.try_get::<Option<DateTime<Utc>>, _>("completed_at")?,
            completed_steps: row.try_get::<i64, _>("completed_steps")? as usize,
            total_steps: row.try_get::<i64, _>("total_steps")? as usize,
        })
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for SqliteExecutionStore {
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO executions
            (id, pipeline_name, status, failing_step, cause, started_at, completed_at, completed_steps, total_steps)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(execution.execution_id.to_string())
        .bind(&execution.pipeline_name)
        .bind(execution.status.as_str())
        .bind(&execution.failing_step)
        .bind(&execution.cause)
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(execution.completed_steps as i64)
        .bind(execution.total_steps as i64)
        .execute(&self.pool)
        .await
        .context("Failed to save execution")?;

        Ok(())
    }

    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>> {
        let row = sqlx::query(&format!("SELECT {} FROM executions WHERE id = ?1", COLUMNS))
            .bind(execution_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load execution")?;

        row.as_ref().map(Self::summary_from_row).transpose()
    }

    async fn list_executions(&self, pipeline_name: &str) -> Result<Vec<ExecutionSummary>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM executions WHERE pipeline_name = ?1 ORDER BY started_at DESC",
            COLUMNS
        ))
        .bind(pipeline_name)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list executions")?;

        rows.iter().map(Self::summary_from_row).collect()
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT pipeline_name FROM executions ORDER BY pipeline_name ASC")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list pipelines")?;

        rows.iter()
            .map(|row| Ok(row.try_get::<String, _>("pipeline_name")?))
            .collect()
    }
}
