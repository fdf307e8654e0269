//! Pipeline execution engine

pub mod cancel;
pub mod engine;
pub mod runner;

pub use cancel::CancellationToken;
pub use engine::{EventHandler, ExecutionEngine, ExecutionEvent};
pub use runner::StepRunner;
