//! External process execution
//!
//! The [`CommandExecutor`] trait is the seam between the step runner and the
//! operating system, so tests can script outcomes without spawning anything.

pub mod config;
pub mod output;
pub mod subprocess;

use crate::core::Invocation;
use async_trait::async_trait;
pub use config::ExecutorConfig;
pub use output::{BoundedBuffer, ExitOutcome, OutputSink, ProcessError, Stream};
pub use subprocess::SubprocessExecutor;

/// Trait for command execution - allows for different implementations
///
/// Implementations write whatever the process prints into `sink` as it
/// arrives. The runner may drop the returned future at any await point
/// (timeout or cancellation); implementations must make sure nothing they
/// started keeps running once that happens.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run a command to completion
    async fn execute(&self, invocation: &Invocation, sink: &OutputSink) -> Result<ExitOutcome, ProcessError>;
}

#[async_trait]
impl<E: CommandExecutor + ?Sized> CommandExecutor for std::sync::Arc<E> {
    async fn execute(&self, invocation: &Invocation, sink: &OutputSink) -> Result<ExitOutcome, ProcessError> {
        (**self).execute(invocation, sink).await
    }
}
