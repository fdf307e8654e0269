//! Executor configuration

use std::time::Duration;

/// Variables kept when the inherited environment is cleared
pub const BASE_ENV: &[&str] = &["PATH", "HOME", "USER", "TMPDIR", "DOCKER_CONFIG", "DOCKER_HOST", "KUBECONFIG"];

/// Configuration for the subprocess executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Start every process from [`BASE_ENV`] plus the step's declared
    /// variables instead of the full parent environment
    pub clear_env: bool,

    /// How long to wait for output readers after the process group is gone
    pub drain_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            clear_env: false,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

impl ExecutorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clear_env(mut self, clear_env: bool) -> Self {
        self.clear_env = clear_env;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }
}
