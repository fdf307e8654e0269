//! Pipeline context - the workspace and environment handed over by a trigger

use crate::core::{config::ConfigError, image::ImageReference};
use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Placeholder shown wherever a secret value would otherwise appear
pub const REDACTED: &str = "[REDACTED]";

/// Read-only mapping of environment values passed into every step
///
/// Keys marked as secret are never rendered by `Debug` and are scrubbed from
/// any text passed through the matching [`Redactor`].
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Environment {
    values: BTreeMap<String, String>,
    secrets: BTreeSet<String>,
}

impl Environment {
    /// Create an empty environment
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the current process environment
    ///
    /// Entries whose key or value is not valid UTF-8 are skipped.
    pub fn from_process() -> Self {
        Self::from_os_vars(std::env::vars_os())
    }

    fn from_os_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        vars.into_iter()
            .filter_map(|(key, value)| match (key.into_string(), value.into_string()) {
                (Ok(key), Ok(value)) => Some((key, value)),
                (Ok(key), Err(_)) => {
                    debug!("Skipping environment variable {} with a non-UTF-8 value", key);
                    None
                }
                (Err(key), _) => {
                    debug!("Skipping environment variable with a non-UTF-8 name {:?}", key);
                    None
                }
            })
            .collect()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Set a value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Flag a key as secret
    pub fn mark_secret(&mut self, key: impl Into<String>) {
        self.secrets.insert(key.into());
    }

    /// Get a value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Get a value that must be present and non-empty
    pub fn require(&self, key: &str) -> Result<&str, ConfigError> {
        match self.get(key) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(ConfigError::MissingEnv(key.to_string())),
        }
    }

    /// Whether a key holds a secret
    pub fn is_secret(&self, key: &str) -> bool {
        self.secrets.contains(key)
    }

    /// Secret keys, present or not
    pub fn secret_keys(&self) -> impl Iterator<Item = &str> {
        self.secrets.iter().map(String::as_str)
    }

    /// Build a redactor for all secret values currently set
    pub fn redactor(&self) -> Redactor {
        Redactor::new(
            self.secrets
                .iter()
                .filter_map(|key| self.values.get(key))
                .cloned(),
        )
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in &self.values {
            if self.is_secret(key) {
                map.entry(key, &REDACTED);
            } else {
                map.entry(key, value);
            }
        }
        map.finish()
    }
}

impl FromIterator<(String, String)> for Environment {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
            secrets: BTreeSet::new(),
        }
    }
}

/// Replaces secret values in free text
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    secrets: Vec<String>,
}

impl Redactor {
    pub fn new(secrets: impl IntoIterator<Item = String>) -> Self {
        let mut secrets: Vec<String> = secrets.into_iter().filter(|s| !s.is_empty()).collect();
        // Longest first so a secret containing another is replaced whole
        secrets.sort_by_key(|s| std::cmp::Reverse(s.len()));
        secrets.dedup();
        Self { secrets }
    }

    /// Return `text` with every secret replaced by [`REDACTED`]
    pub fn redact(&self, text: &str) -> String {
        let mut redacted = text.to_string();
        for secret in &self.secrets {
            if redacted.contains(secret.as_str()) {
                redacted = redacted.replace(secret.as_str(), REDACTED);
            }
        }
        redacted
    }

    /// Length of the longest tail of `bytes` that starts some secret
    ///
    /// Output cut off at a limit may end part-way through a secret; that
    /// tail does not match in [`Redactor::redact`] and has to be dropped.
    pub fn partial_tail(&self, bytes: &[u8]) -> usize {
        self.secrets
            .iter()
            .filter_map(|secret| {
                let secret = secret.as_bytes();
                (1..secret.len().min(bytes.len() + 1))
                    .rev()
                    .find(|&n| bytes.ends_with(&secret[..n]))
            })
            .max()
            .unwrap_or(0)
    }
}

/// Execution context for a pipeline run
///
/// A trigger supplies the workspace and environment. Preflight fills in the
/// resolved image reference and manifest path before any step runs.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    /// Checked-out source tree; every step runs here
    pub workspace: PathBuf,

    /// Credentials and other inputs
    pub environment: Environment,

    /// Image reference shared by build, push and deploy
    pub image: Option<ImageReference>,

    /// Deployment manifest, resolved against the workspace
    pub manifest: Option<PathBuf>,
}

impl PipelineContext {
    /// Create the context a trigger hands to the executor
    pub fn new(workspace: impl Into<PathBuf>, environment: Environment) -> Self {
        Self {
            workspace: workspace.into(),
            environment,
            image: None,
            manifest: None,
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Resolve a built-in template variable
    pub fn builtin(&self, name: &str) -> Option<String> {
        match name {
            "workspace" => Some(self.workspace.display().to_string()),
            "image" => self.image.as_ref().map(ToString::to_string),
            "manifest" => self.manifest.as_ref().map(|p| p.display().to_string()),
            "registry" => self
                .image
                .as_ref()
                .and_then(|image| image.registry_host())
                .map(str::to_string),
            _ => None,
        }
    }

    /// Names reserved for built-in template variables
    pub fn is_builtin(name: &str) -> bool {
        matches!(name, "workspace" | "image" | "manifest" | "registry")
    }
}
