//! Subprocess supervision behind the `CommandRunner` seam
//!
//! Every step and every provisioning action goes through `CommandRunner`, so
//! tests can substitute a scripted implementation. The Tokio implementation
//! runs commands argv-style (no shell), merges stdout and stderr into one
//! bounded buffer, enforces a deadline, and on timeout or cancellation sends
//! SIGTERM to the child's process group, waits out a grace period, then
//! SIGKILLs.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::debug;

/// Grace period between the soft terminate and the hard kill.
pub const KILL_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Default cap on captured (merged) output.
pub const DEFAULT_OUTPUT_CAP_BYTES: usize = 2 * 1024 * 1024;

/// A command to execute: discrete argv elements, never a shell string.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(OsString, OsString)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Human-readable rendering for logs.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.to_string_lossy().into_owned()];
        parts.extend(self.args.iter().map(|a| a.to_string_lossy().into_owned()));
        parts.join(" ")
    }
}

/// Completed execution (exit code may still be nonzero).
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code, None when the child died to a signal
    pub exit_code: Option<i32>,
    /// Merged stdout + stderr, tail-capped
    pub output: String,
    pub truncated: bool,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out after {timeout_secs}s")]
    Timeout {
        timeout_secs: u64,
        /// Output collected before the deadline hit
        partial_output: String,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("i/o error supervising child: {0}")]
    Io(#[from] std::io::Error),
}

/// Execution seam for everything that spawns a subprocess.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        spec: &CommandSpec,
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError>;
}

/// Tail-keeping byte buffer: overflow drops the oldest bytes.
#[derive(Debug)]
struct CappedBuffer {
    bytes: VecDeque<u8>,
    cap: usize,
    total_written: usize,
}

impl CappedBuffer {
    fn new(cap: usize) -> Self {
        Self {
            bytes: VecDeque::new(),
            cap,
            total_written: 0,
        }
    }

    fn write(&mut self, chunk: &[u8]) {
        self.total_written += chunk.len();
        self.bytes.extend(chunk);
        while self.bytes.len() > self.cap {
            self.bytes.pop_front();
        }
    }

    fn was_truncated(&self) -> bool {
        self.total_written > self.bytes.len()
    }

    fn into_string(self) -> String {
        let bytes: Vec<u8> = self.bytes.into();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

enum RunEnd {
    Completed(std::process::ExitStatus),
    TimedOut,
    Cancelled,
}

/// Real subprocess runner on the Tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioCommandRunner {
    cancel: Option<watch::Receiver<bool>>,
    output_cap: usize,
}

impl Default for TokioCommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl TokioCommandRunner {
    pub fn new() -> Self {
        Self {
            cancel: None,
            output_cap: DEFAULT_OUTPUT_CAP_BYTES,
        }
    }

    /// Runner whose in-flight children are torn down when the cancel signal
    /// flips to true.
    pub fn with_cancel(cancel: watch::Receiver<bool>) -> Self {
        Self {
            cancel: Some(cancel),
            output_cap: DEFAULT_OUTPUT_CAP_BYTES,
        }
    }

    fn build_command(spec: &CommandSpec) -> Command {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        // New process group so the whole child tree can be signalled at once.
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                nix::unistd::setpgid(nix::unistd::Pid::from_raw(0), nix::unistd::Pid::from_raw(0))
                    .map_err(std::io::Error::other)
            });
        }
        cmd
    }

    async fn terminate(child: &mut tokio::process::Child, pid: Option<u32>) {
        #[cfg(unix)]
        if let Some(pid) = pid {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            let pgid = Pid::from_raw(pid as i32);
            let _ = killpg(pgid, Signal::SIGTERM);
            if tokio::time::timeout(KILL_GRACE_PERIOD, child.wait())
                .await
                .is_ok()
            {
                return;
            }
            let _ = killpg(pgid, Signal::SIGKILL);
            let _ = child.wait().await;
            return;
        }

        let _ = pid;
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError> {
        debug!("CMD: {}", spec.display());

        let mut cancel = self.cancel.clone();
        if let Some(rx) = &cancel {
            if *rx.borrow() {
                return Err(CommandError::Cancelled);
            }
        }

        let mut child =
            Self::build_command(spec)
                .spawn()
                .map_err(|source| CommandError::Spawn {
                    program: spec.program.to_string_lossy().into_owned(),
                    source,
                })?;
        let pid = child.id();
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + timeout;

        let mut stdout_pipe = child
            .stdout
            .take()
            .ok_or_else(|| CommandError::Io(std::io::Error::other("failed to capture stdout")))?;
        let mut stderr_pipe = child
            .stderr
            .take()
            .ok_or_else(|| CommandError::Io(std::io::Error::other("failed to capture stderr")))?;
        let mut buffer = CappedBuffer::new(self.output_cap);

        let supervise = async {
            let mut out_buf = vec![0u8; 8192];
            let mut err_buf = vec![0u8; 8192];
            let mut out_done = false;
            let mut err_done = false;

            while !(out_done && err_done) {
                tokio::select! {
                    read = stdout_pipe.read(&mut out_buf), if !out_done => match read {
                        Ok(0) => out_done = true,
                        Ok(n) => buffer.write(&out_buf[..n]),
                        Err(err) => return Err(err.into()),
                    },
                    read = stderr_pipe.read(&mut err_buf), if !err_done => match read {
                        Ok(0) => err_done = true,
                        Ok(n) => buffer.write(&err_buf[..n]),
                        Err(err) => return Err(err.into()),
                    },
                    () = tokio::time::sleep_until(deadline) => return Ok(RunEnd::TimedOut),
                    () = wait_cancelled(&mut cancel) => return Ok(RunEnd::Cancelled),
                }
            }

            tokio::select! {
                status = child.wait() => Ok(RunEnd::Completed(status?)),
                () = tokio::time::sleep_until(deadline) => Ok(RunEnd::TimedOut),
                () = wait_cancelled(&mut cancel) => Ok(RunEnd::Cancelled),
            }
        };

        let end: Result<RunEnd, CommandError> = supervise.await;
        match end? {
            RunEnd::Completed(status) => {
                let truncated = buffer.was_truncated();
                Ok(CommandOutput {
                    exit_code: status.code(),
                    output: buffer.into_string(),
                    truncated,
                    duration: started.elapsed(),
                })
            }
            RunEnd::TimedOut => {
                Self::terminate(&mut child, pid).await;
                Err(CommandError::Timeout {
                    timeout_secs: timeout.as_secs(),
                    partial_output: buffer.into_string(),
                })
            }
            RunEnd::Cancelled => {
                Self::terminate(&mut child, pid).await;
                Err(CommandError::Cancelled)
            }
        }
    }
}

/// Resolves when cancellation fires; pends forever once the sender is gone
/// so the select loop never spins on a dead channel.
async fn wait_cancelled(cancel: &mut Option<watch::Receiver<bool>>) {
    if let Some(rx) = cancel {
        loop {
            if rx.changed().await.is_err() {
                break;
            }
            if *rx.borrow() {
                return;
            }
        }
        *cancel = None;
    }
    std::future::pending().await
}
