//! Pipeline domain model

use crate::core::{
    config::{ConfigError, PipelineConfig, DEFAULT_OUTPUT_LIMIT_BYTES, DEFAULT_TIMEOUT_SECS, DEPLOY_MANIFEST},
    context::PipelineContext,
    image::ImageReference,
    state::{RunState, StepResult, StepStatus},
    step::{placeholders, render_template, Step},
};
use chrono::{DateTime, Utc};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

/// Image settings carried from configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSpec {
    pub repository: String,
    pub tag: Option<String>,
    pub allow_mutable_tag: bool,
}

/// A pipeline definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    /// Pipeline name
    pub name: String,

    /// Pipeline steps, in execution order
    pub steps: Vec<Step>,

    pub image: Option<ImageSpec>,

    /// Deployment manifest, relative to the workspace unless absolute
    pub manifest: Option<String>,

    /// Keys whose values must never be shown
    pub secrets: Vec<String>,

    /// Keys that must be present before the run starts
    pub required_env: Vec<String>,

    /// Capture limit per output stream
    pub output_limit_bytes: usize,
}

impl Pipeline {
    /// Create a pipeline from configuration
    pub fn from_config(config: &PipelineConfig) -> Self {
        let default_timeout =
            Duration::from_secs(config.default_timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));

        Pipeline {
            name: config.name.clone(),
            steps: config
                .steps
                .iter()
                .map(|step| Step::from_config(step, default_timeout))
                .collect(),
            image: config.image.as_ref().map(|image| ImageSpec {
                repository: image.repository.clone(),
                tag: image.tag.clone(),
                allow_mutable_tag: image.allow_mutable_tag,
            }),
            manifest: config.manifest.clone(),
            secrets: config.secrets.clone(),
            required_env: config.required_env.clone(),
            output_limit_bytes: config.output_limit_bytes.unwrap_or(DEFAULT_OUTPUT_LIMIT_BYTES),
        }
    }

    /// Get a step by ID
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Start a fresh run; retries are new runs of the same pipeline
    pub fn new_run(&self) -> PipelineRun {
        PipelineRun::new(self.clone())
    }

    /// Every environment key a run needs, sorted
    pub fn required_keys(&self) -> Vec<String> {
        let mut keys = self.required_env.clone();
        if let Some(tag) = self.image.as_ref().and_then(|image| image.tag.as_ref()) {
            keys.extend(placeholders(tag));
        }
        for step in &self.steps {
            keys.extend(step.required_keys());
        }
        keys.sort();
        keys.dedup();
        keys
    }

    /// Check a trigger's context and resolve image and manifest
    ///
    /// Every configuration error surfaces here, before any step runs.
    pub fn preflight(&self, trigger: &PipelineContext) -> Result<PipelineContext, ConfigError> {
        let mut ctx = trigger.clone();
        for key in &self.secrets {
            ctx.environment.mark_secret(key.clone());
        }

        if !ctx.workspace.is_dir() {
            return Err(ConfigError::WorkspaceNotFound(ctx.workspace.clone()));
        }

        for key in self.required_keys() {
            ctx.environment.require(&key)?;
        }

        ctx.image = match &self.image {
            Some(spec) => Some(self.resolve_image(spec, &ctx)?),
            None => None,
        };

        if self.steps.iter().any(|step| step.references("manifest")) {
            ctx.manifest = Some(self.resolve_manifest(&ctx)?);
        }

        // Render every step once so a bad template fails the whole run up front
        for step in &self.steps {
            step.invocation(&ctx)?;
        }

        Ok(ctx)
    }

    fn resolve_image(&self, spec: &ImageSpec, ctx: &PipelineContext) -> Result<ImageReference, ConfigError> {
        let env = &ctx.environment;
        let tag = match &spec.tag {
            Some(template) => Some(render_template(template, |name| {
                env.require(name).map(str::to_string)
            })?),
            None => None,
        };

        let reference = match &tag {
            Some(tag) => ImageReference::with_tag(&spec.repository, tag),
            None => spec.repository.parse(),
        }
        .map_err(|source| ConfigError::InvalidImageReference {
            reference: match &tag {
                Some(tag) => format!("{}:{}", spec.repository, tag),
                None => spec.repository.clone(),
            },
            source,
        })?;

        if reference.is_mutable() {
            if !spec.allow_mutable_tag {
                return Err(ConfigError::MutableImageTag(reference.to_string()));
            }
            warn!(
                "Image {} uses a mutable tag; retried runs may not converge",
                reference
            );
        }

        Ok(reference)
    }

    fn resolve_manifest(&self, ctx: &PipelineContext) -> Result<PathBuf, ConfigError> {
        let raw = ctx
            .environment
            .get(DEPLOY_MANIFEST)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .or_else(|| self.manifest.clone())
            .ok_or_else(|| ConfigError::MissingEnv(DEPLOY_MANIFEST.to_string()))?;

        if raw.trim().is_empty() || raw.contains('\0') {
            return Err(ConfigError::InvalidManifestPath(raw));
        }

        let relative = Path::new(&raw);
        if relative.is_relative() && relative.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(ConfigError::InvalidManifestPath(raw));
        }

        let path = ctx.workspace.join(relative);
        if !path.is_file() {
            return Err(ConfigError::ManifestNotFound(path));
        }
        Ok(path)
    }
}

/// Violations of the run's ordering rules
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RunError {
    #[error("run is not running (state: {0})")]
    NotRunning(String),

    #[error("expected result for step {expected_index} (`{expected}`), got step {got_index} (`{got}`)")]
    OutOfOrder {
        expected: String,
        expected_index: usize,
        got: String,
        got_index: usize,
    },

    #[error("run has already started")]
    AlreadyStarted,
}

/// One execution of a pipeline, from trigger to terminal state
///
/// The results recorded so far are always a prefix of the step list: only
/// the step under the cursor can report, and nothing reports after a
/// terminal state.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    /// Unique execution ID
    pub execution_id: Uuid,

    pipeline: Pipeline,
    cursor: usize,
    results: Vec<StepResult>,
    state: RunState,

    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            pipeline,
            cursor: 0,
            results: Vec::new(),
            state: RunState::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn steps(&self) -> &[Step] {
        &self.pipeline.steps
    }

    pub fn results(&self) -> &[StepResult] {
        &self.results
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Index of the next step to run
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// The step under the cursor while running
    pub fn current_step(&self) -> Option<&Step> {
        match self.state {
            RunState::Running { step_index } => self.pipeline.steps.get(step_index),
            _ => None,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Number of steps that succeeded
    pub fn completed_steps(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    /// Calculate progress (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.pipeline.steps.is_empty() {
            return 0.0;
        }
        self.results.len() as f64 / self.pipeline.steps.len() as f64
    }

    /// `Pending -> Running(0)`, or straight to `Succeeded` with no steps
    pub fn start(&mut self) -> Result<(), RunError> {
        if self.state != RunState::Pending {
            return Err(RunError::AlreadyStarted);
        }
        self.started_at = Some(Utc::now());
        if self.pipeline.steps.is_empty() {
            self.finish(RunState::Succeeded);
        } else {
            self.state = RunState::Running { step_index: 0 };
        }
        Ok(())
    }

    /// Record the result of the step under the cursor and advance
    pub fn record(&mut self, result: StepResult) -> Result<(), RunError> {
        let index = match self.state {
            RunState::Running { step_index } => step_index,
            ref other => return Err(RunError::NotRunning(other.status().to_string())),
        };

        let expected = &self.pipeline.steps[index];
        if result.step_index != index || result.step_id != expected.id {
            return Err(RunError::OutOfOrder {
                expected: expected.id.clone(),
                expected_index: index,
                got: result.step_id,
                got_index: result.step_index,
            });
        }

        let fatal = expected.fatal;
        let step_id = expected.id.clone();
        let status = result.status.clone();
        self.results.push(result);
        self.cursor = index + 1;

        match status {
            StepStatus::Failed { cause } if fatal => {
                self.finish(RunState::Failed {
                    step_index: index,
                    step_id,
                    cause,
                });
            }
            StepStatus::Cancelled => {
                self.finish(RunState::Cancelled {
                    step_index: Some(index),
                    step_id: Some(step_id),
                });
            }
            StepStatus::Succeeded | StepStatus::Failed { .. } => {
                if self.cursor == self.pipeline.steps.len() {
                    self.finish(RunState::Succeeded);
                } else {
                    self.state = RunState::Running { step_index: self.cursor };
                }
            }
        }

        Ok(())
    }

    /// Move any non-terminal state to `Cancelled`
    pub fn cancel(&mut self) {
        let state = match self.state {
            RunState::Pending => RunState::Cancelled {
                step_index: None,
                step_id: None,
            },
            RunState::Running { step_index } => RunState::Cancelled {
                step_index: Some(step_index),
                step_id: self.pipeline.steps.get(step_index).map(|s| s.id.clone()),
            },
            _ => return,
        };
        self.finish(state);
    }

    /// `Pending -> Rejected`; a run that started cannot be rejected
    pub fn reject(&mut self, reason: impl Into<String>) -> Result<(), RunError> {
        if self.state != RunState::Pending {
            return Err(RunError::AlreadyStarted);
        }
        self.finish(RunState::Rejected { reason: reason.into() });
        Ok(())
    }

    fn finish(&mut self, state: RunState) {
        self.state = state;
        self.finished_at = Some(Utc::now());
    }
}
