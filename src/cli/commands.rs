//! CLI command definitions

use crate::core::{
    config::{ConfigError, ImageConfig, PipelineConfig, DEPLOY_MANIFEST, IMAGE_TAG},
    Environment,
};
use clap::Args;
use std::path::PathBuf;

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file (defaults to the built-in build/push/deploy job)
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Source checkout the steps run in
    #[arg(short, long, default_value = ".")]
    pub workspace: PathBuf,

    /// Image repository, e.g. `acme/app` or `registry.example.com/acme/app`
    #[arg(long)]
    pub image: Option<String>,

    /// Image tag (sets IMAGE_TAG)
    #[arg(long)]
    pub tag: Option<String>,

    /// Deployment manifest, relative to the workspace (sets DEPLOY_MANIFEST)
    #[arg(long)]
    pub manifest: Option<String>,

    /// Timeout applied to every step, in seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Capture limit per output stream, in bytes
    #[arg(long)]
    pub output_limit: Option<usize>,

    /// Write the JSON run report to this path
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Don't save execution to history
    #[arg(long)]
    pub no_history: bool,
}

impl RunCommand {
    /// Load the pipeline and apply command-line overrides
    pub fn load_config(&self) -> Result<PipelineConfig, ConfigError> {
        let mut config = load_config(self.file.as_ref(), self.image.as_deref())?;

        if let Some(secs) = self.timeout_secs {
            config.default_timeout_secs = Some(secs);
            for step in &mut config.steps {
                step.timeout_secs = Some(secs);
            }
        }
        if let Some(limit) = self.output_limit {
            config.output_limit_bytes = Some(limit);
        }

        config.validate()?;
        Ok(config)
    }

    /// Layer `--tag` and `--manifest` over the trigger environment
    pub fn environment(&self, mut env: Environment) -> Environment {
        if let Some(tag) = &self.tag {
            env.set(IMAGE_TAG, tag.clone());
        }
        if let Some(manifest) = &self.manifest {
            env.set(DEPLOY_MANIFEST, manifest.clone());
        }
        env
    }
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file (defaults to the built-in job)
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Image repository for the built-in job
    #[arg(long)]
    pub image: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

impl ValidateCommand {
    pub fn load_config(&self) -> Result<PipelineConfig, ConfigError> {
        let config = load_config(self.file.as_ref(), self.image.as_deref())?;
        config.validate()?;
        Ok(config)
    }
}

/// List pipelines found in history
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Show execution counts
    #[arg(long)]
    pub with_counts: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show execution history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline name to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Number of recent executions to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show full details
    #[arg(long)]
    pub details: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a single execution
    #[arg(long)]
    pub execution_id: Option<String>,
}

/// Read a pipeline file, or build the built-in job for `image`
///
/// With both, `image` replaces the file's repository.
fn load_config(file: Option<&PathBuf>, image: Option<&str>) -> Result<PipelineConfig, ConfigError> {
    match (file, image) {
        (Some(path), image) => {
            let mut config = PipelineConfig::from_file(path)?;
            if let Some(repository) = image {
                match &mut config.image {
                    Some(existing) => existing.repository = repository.to_string(),
                    None => {
                        config.image = Some(ImageConfig {
                            repository: repository.to_string(),
                            tag: Some(format!("{{{{ {} }}}}", IMAGE_TAG)),
                            allow_mutable_tag: false,
                        })
                    }
                }
            }
            Ok(config)
        }
        (None, Some(repository)) => Ok(PipelineConfig::docker_deploy(repository)),
        (None, None) => Err(ConfigError::Invalid(
            "pass --file, or --image for the built-in job".to_string(),
        )),
    }
}
