//! Process outcome types and bounded output capture

use crate::core::{CapturedOutput, Redactor, REDACTED};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Error types for process execution
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start `{program}`: {reason}")]
    Spawn { program: String, reason: String },

    #[error("I/O error while running `{program}`: {reason}")]
    Io { program: String, reason: String },
}

/// How a process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exited on its own with a code
    Exited(i32),
    /// Terminated by a signal
    Signalled(i32),
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        matches!(self, ExitOutcome::Exited(0))
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ExitOutcome::Exited(code) => Some(*code),
            ExitOutcome::Signalled(_) => None,
        }
    }
}

/// Byte buffer that stops growing at a fixed limit
///
/// Writes past the limit are counted and discarded so the producer can keep
/// draining its pipe.
#[derive(Debug, Clone)]
pub struct BoundedBuffer {
    limit: usize,
    bytes: Vec<u8>,
    dropped: u64,
}

impl BoundedBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            bytes: Vec::new(),
            dropped: 0,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        let room = self.limit.saturating_sub(self.bytes.len());
        let kept = room.min(chunk.len());
        self.bytes.extend_from_slice(&chunk[..kept]);
        self.dropped += (chunk.len() - kept) as u64;
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Decode, redact and mark truncation
    ///
    /// When the limit cut a secret in half, the kept half is masked too.
    pub fn capture(&self, redactor: &Redactor) -> CapturedOutput {
        let (bytes, cut_secret) = if self.dropped > 0 {
            let tail = redactor.partial_tail(&self.bytes);
            (&self.bytes[..self.bytes.len() - tail], tail > 0)
        } else {
            (&self.bytes[..], false)
        };

        let mut text = redactor.redact(&String::from_utf8_lossy(bytes));
        if cut_secret {
            text.push_str(REDACTED);
        }
        if self.dropped > 0 {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&format!("[... {} bytes truncated ...]\n", self.dropped));
        }
        CapturedOutput {
            text,
            truncated_bytes: self.dropped,
        }
    }
}

/// Which output stream a chunk came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Shared destination for a running process's output
///
/// The runner keeps a handle, so whatever was captured survives even when
/// the execution future is dropped on timeout or cancellation.
#[derive(Debug, Clone)]
pub struct OutputSink {
    stdout: Arc<Mutex<BoundedBuffer>>,
    stderr: Arc<Mutex<BoundedBuffer>>,
}

fn lock(buffer: &Mutex<BoundedBuffer>) -> MutexGuard<'_, BoundedBuffer> {
    buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl OutputSink {
    /// Create a sink with a per-stream byte limit
    pub fn new(limit: usize) -> Self {
        Self {
            stdout: Arc::new(Mutex::new(BoundedBuffer::new(limit))),
            stderr: Arc::new(Mutex::new(BoundedBuffer::new(limit))),
        }
    }

    pub fn write(&self, stream: Stream, chunk: &[u8]) {
        match stream {
            Stream::Stdout => lock(&self.stdout).push(chunk),
            Stream::Stderr => lock(&self.stderr).push(chunk),
        }
    }

    /// Snapshot both streams as `(stdout, stderr)`
    pub fn captured(&self, redactor: &Redactor) -> (CapturedOutput, CapturedOutput) {
        (
            lock(&self.stdout).capture(redactor),
            lock(&self.stderr).capture(redactor),
        )
    }
}
