//! Subprocess executor - runs step commands as child processes

use crate::core::Invocation;
use crate::process::{
    config::BASE_ENV, CommandExecutor, ExecutorConfig, ExitOutcome, OutputSink, ProcessError, Stream,
};
use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Executor that spawns real processes
///
/// On Unix every command runs as the leader of a fresh process group. When
/// the command exits, or the execution future is dropped, the whole group
/// is sent `SIGKILL`, so nothing the step started outlives it.
#[derive(Debug, Clone, Default)]
pub struct SubprocessExecutor {
    config: ExecutorConfig,
}

impl SubprocessExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    fn command(&self, invocation: &Invocation) -> Command {
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .current_dir(&invocation.current_dir)
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if self.config.clear_env {
            command.env_clear();
            for key in BASE_ENV {
                if let Some(value) = std::env::var_os(key) {
                    command.env(key, value);
                }
            }
        }
        for key in &invocation.env_remove {
            command.env_remove(key);
        }
        for (key, value) in &invocation.env {
            command.env(key, value);
        }

        #[cfg(unix)]
        command.process_group(0);

        command
    }
}

/// Kills a process group when dropped
struct ProcessGroupGuard {
    #[cfg_attr(not(unix), allow(dead_code))]
    pgid: Option<i32>,
}

impl ProcessGroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: pid.and_then(|pid| i32::try_from(pid).ok()),
        }
    }

    fn kill(&mut self) {
        #[cfg(unix)]
        if let Some(pgid) = self.pgid.take() {
            // SAFETY: killpg has no memory-safety preconditions; ESRCH just
            // means the group is already gone.
            let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
            if rc == 0 {
                debug!("Killed process group {}", pgid);
            }
        }
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Copy a pipe into the sink until EOF
fn pump<R>(reader: Option<R>, sink: OutputSink, stream: Stream) -> Option<JoinHandle<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    reader.map(|mut reader| {
        tokio::spawn(async move {
            let mut buf = [0u8; 8192];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => sink.write(stream, &buf[..n]),
                    Err(e) => {
                        debug!("Stopped reading {:?}: {}", stream, e);
                        break;
                    }
                }
            }
        })
    })
}

fn exit_outcome(status: ExitStatus) -> ExitOutcome {
    if let Some(code) = status.code() {
        return ExitOutcome::Exited(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExitOutcome::Signalled(signal);
        }
    }
    ExitOutcome::Exited(-1)
}

#[async_trait]
impl CommandExecutor for SubprocessExecutor {
    async fn execute(&self, invocation: &Invocation, sink: &OutputSink) -> Result<ExitOutcome, ProcessError> {
        let program = invocation.program.clone();
        debug!("Spawning {} with {} argument(s)", program, invocation.args.len());

        let mut child = self.command(invocation).spawn().map_err(|e| ProcessError::Spawn {
            program: program.clone(),
            reason: e.to_string(),
        })?;
        let mut guard = ProcessGroupGuard::new(child.id());

        let readers = [
            pump(child.stdout.take(), sink.clone(), Stream::Stdout),
            pump(child.stderr.take(), sink.clone(), Stream::Stderr),
        ];

        if let (Some(input), Some(mut stdin)) = (&invocation.stdin, child.stdin.take()) {
            if let Err(e) = stdin.write_all(input).await {
                warn!("Could not write stdin of {}: {}", program, e);
            }
            // Dropping the handle closes the pipe so the reader sees EOF
        }

        let status = child.wait().await.map_err(|e| ProcessError::Io {
            program: program.clone(),
            reason: e.to_string(),
        })?;

        // Anything the command left running in the background goes too
        guard.kill();

        for mut reader in readers.into_iter().flatten() {
            if tokio::time::timeout(self.config.drain_timeout, &mut reader).await.is_err() {
                warn!("Output of {} still open after exit; discarding the rest", program);
                reader.abort();
            }
        }

        let outcome = exit_outcome(status);
        debug!("{} finished: {:?}", program, outcome);
        Ok(outcome)
    }
}
