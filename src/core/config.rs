//! Pipeline configuration from YAML

use crate::core::{context::PipelineContext, image::ImageReferenceError, step::placeholders, Pipeline};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default per-step timeout (15 minutes)
pub const DEFAULT_TIMEOUT_SECS: u64 = 900;

/// Default capture limit per output stream (1 MiB)
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 1024 * 1024;

/// Environment keys used by the built-in job
pub const DOCKER_USERNAME: &str = "DOCKER_USERNAME";
pub const DOCKER_PASSWORD: &str = "DOCKER_PASSWORD";
pub const IMAGE_TAG: &str = "IMAGE_TAG";
pub const DEPLOY_MANIFEST: &str = "DEPLOY_MANIFEST";

/// Configuration problems, detected before any step runs
///
/// Messages name keys and paths, never values.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid pipeline YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("pipeline has no steps")]
    NoSteps,

    #[error("duplicate step id `{0}`")]
    DuplicateStep(String),

    #[error("invalid pipeline: {0}")]
    Invalid(String),

    #[error("required environment variable `{0}` is missing or empty")]
    MissingEnv(String),

    #[error("step `{step}` passes secret `{key}` as a command-line argument")]
    SecretInArguments { step: String, key: String },

    #[error("step `{step}` uses `{{{{ {name} }}}}` but it has no value")]
    UnresolvedPlaceholder { step: String, name: String },

    #[error("workspace {0} is not a directory")]
    WorkspaceNotFound(PathBuf),

    #[error("deployment manifest {0} does not exist")]
    ManifestNotFound(PathBuf),

    #[error("malformed manifest path `{0}`")]
    InvalidManifestPath(String),

    #[error("invalid image reference `{reference}`: {source}")]
    InvalidImageReference {
        reference: String,
        #[source]
        source: ImageReferenceError,
    },

    #[error("image reference `{0}` uses a mutable tag; set a tag or allow_mutable_tag")]
    MutableImageTag(String),
}

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Pipeline version (optional)
    #[serde(default)]
    pub version: Option<String>,

    /// Image built, pushed and deployed by the pipeline
    #[serde(default)]
    pub image: Option<ImageConfig>,

    /// Deployment manifest, relative to the workspace
    #[serde(default)]
    pub manifest: Option<String>,

    /// Environment keys holding secrets
    #[serde(default)]
    pub secrets: Vec<String>,

    /// Extra keys that must be present before the run starts
    #[serde(default)]
    pub required_env: Vec<String>,

    /// Default timeout for steps (in seconds)
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,

    /// Capture limit per output stream (in bytes)
    #[serde(default)]
    pub output_limit_bytes: Option<usize>,

    /// Pipeline steps, in execution order
    pub steps: Vec<StepConfig>,
}

/// Image configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    /// `[registry/]repository`
    pub repository: String,

    /// Tag template, e.g. `"{{ IMAGE_TAG }}"`
    #[serde(default)]
    pub tag: Option<String>,

    /// Accept `latest` or untagged references
    #[serde(default)]
    pub allow_mutable_tag: bool,
}

/// Step configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Unique step identifier
    pub id: String,

    /// Human-readable step name
    #[serde(default)]
    pub name: Option<String>,

    /// Program to execute
    pub program: String,

    /// Argument templates
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment keys forwarded to the process
    #[serde(default)]
    pub env: Vec<String>,

    /// Environment key written to stdin
    #[serde(default)]
    pub stdin: Option<String>,

    /// Timeout for this step (overrides global)
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Whether a failure stops the pipeline
    #[serde(default = "default_fatal")]
    pub fatal: bool,
}

fn default_fatal() -> bool {
    true
}

fn is_env_key(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// The build, login, push and deploy job
    pub fn docker_deploy(repository: impl Into<String>) -> Self {
        let repository = repository.into();
        let has_registry = repository
            .split_once('/')
            .is_some_and(|(first, _)| first.contains('.') || first.contains(':') || first == "localhost");

        let mut login_args = vec![
            "login".to_string(),
            "-u".to_string(),
            format!("{{{{ {} }}}}", DOCKER_USERNAME),
            "--password-stdin".to_string(),
        ];
        if has_registry {
            login_args.push("{{ registry }}".to_string());
        }

        let step = |id: &str, name: &str, program: &str, args: Vec<String>| StepConfig {
            id: id.to_string(),
            name: Some(name.to_string()),
            program: program.to_string(),
            args,
            env: Vec::new(),
            stdin: None,
            timeout_secs: None,
            fatal: true,
        };

        let mut login = step("login", "Log in to registry", "docker", login_args);
        login.stdin = Some(DOCKER_PASSWORD.to_string());

        PipelineConfig {
            name: "build-and-deploy".to_string(),
            version: None,
            image: Some(ImageConfig {
                repository,
                tag: Some(format!("{{{{ {} }}}}", IMAGE_TAG)),
                allow_mutable_tag: false,
            }),
            manifest: Some("k8s-deployment.yaml".to_string()),
            secrets: vec![DOCKER_PASSWORD.to_string()],
            required_env: Vec::new(),
            default_timeout_secs: None,
            output_limit_bytes: None,
            steps: vec![
                step(
                    "build",
                    "Build image",
                    "docker",
                    vec!["build".into(), "-t".into(), "{{ image }}".into(), "{{ workspace }}".into()],
                ),
                login,
                step("push", "Push image", "docker", vec!["push".into(), "{{ image }}".into()]),
                step(
                    "deploy",
                    "Apply manifest",
                    "kubectl",
                    vec!["apply".into(), "-f".into(), "{{ manifest }}".into()],
                ),
            ],
        }
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("pipeline name is empty".to_string()));
        }

        if self.steps.is_empty() {
            return Err(ConfigError::NoSteps);
        }

        // Check that all step IDs are unique
        let mut seen_ids = HashSet::new();
        for step in &self.steps {
            if step.id.trim().is_empty() {
                return Err(ConfigError::Invalid("step id is empty".to_string()));
            }
            if !seen_ids.insert(&step.id) {
                return Err(ConfigError::DuplicateStep(step.id.clone()));
            }
        }

        for key in self.secrets.iter().chain(&self.required_env) {
            if !is_env_key(key) {
                return Err(ConfigError::Invalid(format!("`{}` is not a valid environment key", key)));
            }
        }

        for step in &self.steps {
            if step.program.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("step `{}` has no program", step.id)));
            }
            if step.timeout_secs == Some(0) {
                return Err(ConfigError::Invalid(format!("step `{}` has a zero timeout", step.id)));
            }

            for key in step.env.iter().chain(&step.stdin) {
                if !is_env_key(key) {
                    return Err(ConfigError::Invalid(format!(
                        "step `{}` declares invalid environment key `{}`",
                        step.id, key
                    )));
                }
            }

            for arg in &step.args {
                for name in placeholders(arg) {
                    if self.secrets.contains(&name) {
                        return Err(ConfigError::SecretInArguments {
                            step: step.id.clone(),
                            key: name,
                        });
                    }
                    if name == "image" && self.image.is_none() {
                        return Err(ConfigError::UnresolvedPlaceholder {
                            step: step.id.clone(),
                            name,
                        });
                    }
                }
            }
        }

        if let Some(image) = &self.image {
            if image.repository.trim().is_empty() {
                return Err(ConfigError::Invalid("image repository is empty".to_string()));
            }
            if let Some(tag) = &image.tag {
                for name in placeholders(tag) {
                    if self.secrets.contains(&name) || PipelineContext::is_builtin(&name) {
                        return Err(ConfigError::Invalid(format!(
                            "image tag cannot use `{}`",
                            name
                        )));
                    }
                }
            }
        }

        if self.default_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid("default timeout is zero".to_string()));
        }
        if self.output_limit_bytes == Some(0) {
            return Err(ConfigError::Invalid("output limit is zero".to_string()));
        }

        Ok(())
    }

    /// Convert config to a Pipeline domain model
    pub fn to_pipeline(&self) -> Pipeline {
        Pipeline::from_config(self)
    }
}
