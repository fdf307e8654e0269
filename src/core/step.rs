//! Step domain model

use crate::core::{
    config::{ConfigError, StepConfig},
    context::{PipelineContext, Redactor},
};
use regex::{Captures, Regex};
use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

/// A single step in a pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Unique step identifier
    pub id: String,

    /// Human-readable step name
    pub name: String,

    /// The external command this step wraps
    pub command: CommandSpec,

    /// Whether a failure stops the pipeline
    pub fatal: bool,

    /// Hard limit on how long the command may run
    pub timeout: Duration,
}

/// Program, argument templates and declared inputs of a step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,

    /// Argument templates; `{{ name }}` is replaced at run time
    pub args: Vec<String>,

    /// Environment keys forwarded to the process
    pub env: Vec<String>,

    /// Environment key whose value is written to the process stdin
    pub stdin: Option<String>,
}

/// A fully rendered command, ready to spawn
#[derive(Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: PathBuf,

    /// Variables set for the process
    pub env: Vec<(String, String)>,

    /// Inherited variables removed from the process
    pub env_remove: Vec<String>,

    /// Bytes written to stdin, then stdin is closed
    pub stdin: Option<Vec<u8>>,
}

impl Invocation {
    /// Render the command line for logs
    pub fn display(&self, redactor: &Redactor) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        redactor.redact(&line)
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("current_dir", &self.current_dir)
            .field("env", &self.env.iter().map(|(k, _)| k).collect::<Vec<_>>())
            .field("env_remove", &self.env_remove)
            .field("stdin", &self.stdin.as_ref().map(|bytes| bytes.len()))
            .finish()
    }
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder pattern is valid")
    })
}

/// Names of all `{{ name }}` placeholders in a template
pub fn placeholders(template: &str) -> Vec<String> {
    placeholder_regex()
        .captures_iter(template)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Substitute every placeholder, failing on the first name `lookup` cannot resolve
pub fn render_template<F>(template: &str, mut lookup: F) -> Result<String, ConfigError>
where
    F: FnMut(&str) -> Result<String, ConfigError>,
{
    let mut error = None;
    let rendered = placeholder_regex().replace_all(template, |caps: &Captures| {
        if error.is_some() {
            return String::new();
        }
        match lookup(&caps[1]) {
            Ok(value) => value,
            Err(e) => {
                error = Some(e);
                String::new()
            }
        }
    });

    match error {
        Some(e) => Err(e),
        None => Ok(rendered.into_owned()),
    }
}

impl Step {
    /// Create a step from a step config
    pub fn from_config(config: &StepConfig, default_timeout: Duration) -> Self {
        Step {
            id: config.id.clone(),
            name: config.name.clone().unwrap_or_else(|| config.id.clone()),
            command: CommandSpec {
                program: config.program.clone(),
                args: config.args.clone(),
                env: config.env.clone(),
                stdin: config.stdin.clone(),
            },
            fatal: config.fatal,
            timeout: config
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(default_timeout),
        }
    }

    /// Every environment key this step needs at run time
    pub fn required_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .command
            .args
            .iter()
            .flat_map(|arg| placeholders(arg))
            .filter(|name| !PipelineContext::is_builtin(name))
            .collect();
        keys.extend(self.command.env.iter().cloned());
        keys.extend(self.command.stdin.iter().cloned());
        keys.sort();
        keys.dedup();
        keys
    }

    /// Whether any argument uses the given placeholder
    pub fn references(&self, name: &str) -> bool {
        self.command
            .args
            .iter()
            .any(|arg| placeholders(arg).iter().any(|p| p == name))
    }

    /// Render the command against a context
    ///
    /// Secrets may reach the process through stdin or declared env only,
    /// never through argv. Secrets the step does not declare are removed
    /// from the inherited environment.
    pub fn invocation(&self, ctx: &PipelineContext) -> Result<Invocation, ConfigError> {
        let env = &ctx.environment;

        let args = self
            .command
            .args
            .iter()
            .map(|arg| {
                render_template(arg, |name| {
                    if PipelineContext::is_builtin(name) {
                        return ctx.builtin(name).ok_or_else(|| ConfigError::UnresolvedPlaceholder {
                            step: self.id.clone(),
                            name: name.to_string(),
                        });
                    }
                    if env.is_secret(name) {
                        return Err(ConfigError::SecretInArguments {
                            step: self.id.clone(),
                            key: name.to_string(),
                        });
                    }
                    env.require(name).map(str::to_string)
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let forwarded = self
            .command
            .env
            .iter()
            .map(|key| env.require(key).map(|value| (key.clone(), value.to_string())))
            .collect::<Result<Vec<_>, _>>()?;

        let stdin = match &self.command.stdin {
            Some(key) => Some(env.require(key)?.as_bytes().to_vec()),
            None => None,
        };

        let env_remove = env
            .secret_keys()
            .filter(|key| !self.command.env.iter().any(|declared| declared == key))
            .map(str::to_string)
            .collect();

        Ok(Invocation {
            program: self.command.program.clone(),
            args,
            current_dir: ctx.workspace.clone(),
            env: forwarded,
            env_remove,
            stdin,
        })
    }
}
