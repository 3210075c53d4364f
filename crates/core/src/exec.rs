//! Command execution primitive
//!
//! Runs a single external program with an explicitly constructed environment,
//! a hard wall-clock timeout, and streaming output capture. The child never
//! inherits the parent environment: it receives exactly the request's `env`
//! entries plus whatever ambient variables the request whitelists. Secrets
//! in the orchestrator's environment must not leak into arbitrary stage
//! commands.
//!
//! Command failure (non-zero exit, timeout, cooperative stop) is reported
//! through [`ExecOutcome`], never as an error. Only programmer errors (an
//! executable that cannot be spawned) surface as [`ExecError`].

use crate::errors::ExecError;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tracing::{debug, instrument, warn};

/// Default wall-clock limit for a single command (2 hours).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);

/// A single command invocation: program, arguments, and environment policy.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Executable path or name
    pub program: String,
    /// Positional arguments
    pub args: Vec<String>,
    /// Variables set explicitly for the child
    pub env: HashMap<String, String>,
    /// Ambient process environment variables allowed to pass through;
    /// everything else ambient is stripped
    pub whitelist_env: Vec<String>,
    /// Hard wall-clock timeout; the child is killed when it elapses
    pub timeout: Duration,
    /// Working directory for the child
    pub cwd: Option<PathBuf>,
}

impl ExecRequest {
    /// Create a request for `program` with no arguments, an empty environment,
    /// and the default timeout.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            whitelist_env: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            cwd: None,
        }
    }

    /// Append positional arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an explicit environment variable for the child.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Allow the named ambient variables to pass through to the child.
    pub fn with_whitelist_env<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.whitelist_env.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Set the wall-clock timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the working directory.
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

/// Result of a command invocation.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    /// Whether the command exited zero without timing out or being stopped
    pub success: bool,
    /// Combined stdout + stderr, captured line by line in arrival order
    pub output: String,
    /// Wall-clock time the invocation took
    pub elapsed: Duration,
    /// The command exceeded its timeout and was killed
    pub timed_out: bool,
    /// The command was stopped via the cancellation signal
    pub stopped: bool,
}

/// Executes external commands under a restricted environment.
///
/// The executor blocks its calling task until the child exits, times out, or
/// is cancelled; callers that must stay responsive run it on a dedicated task.
#[derive(Debug, Clone, Default)]
pub struct CommandExecutor;

impl CommandExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Run a command to completion without external cancellation.
    #[instrument(skip(self, request), fields(program = %request.program))]
    pub async fn execute(&self, request: &ExecRequest) -> Result<ExecOutcome, ExecError> {
        // Keep the sender alive for the duration so the cancel branch stays quiet.
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        self.execute_with_cancel(request, cancel_rx).await
    }

    /// Run a command to completion, killing it if `cancel` flips to true.
    ///
    /// Cancellation is cooperative at the process boundary: the child is
    /// killed, its remaining output is drained, and the outcome reports
    /// `stopped = true` with `success = false`.
    #[instrument(skip(self, request, cancel), fields(program = %request.program))]
    pub async fn execute_with_cancel(
        &self,
        request: &ExecRequest,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<ExecOutcome, ExecError> {
        if request.program.trim().is_empty() {
            return Err(ExecError::Invocation {
                program: request.program.clone(),
                message: "program name is empty".to_string(),
            });
        }

        if *cancel.borrow() {
            return Ok(ExecOutcome {
                success: false,
                output: "### stopped before execution\n".to_string(),
                elapsed: Duration::ZERO,
                timed_out: false,
                stopped: true,
            });
        }

        let mut command = Command::new(&request.program);
        command
            .args(&request.args)
            .env_clear()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Whitelisted ambient variables first, then explicit entries so the
        // request's env map always wins on key collisions.
        for key in &request.whitelist_env {
            if let Ok(value) = std::env::var(key) {
                command.env(key, value);
            }
        }
        command.envs(&request.env);

        if let Some(ref cwd) = request.cwd {
            command.current_dir(cwd);
        }

        let start = Instant::now();
        let mut child = command.spawn().map_err(|e| ExecError::Invocation {
            program: request.program.clone(),
            message: e.to_string(),
        })?;

        let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
        if let Some(stdout) = child.stdout.take() {
            spawn_line_reader(stdout, line_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_reader(stderr, line_tx.clone());
        }
        drop(line_tx);

        let deadline = tokio::time::Instant::now() + request.timeout;
        let mut output = String::new();
        let mut timed_out = false;
        let mut stopped = false;
        let mut cancel_closed = false;

        // Drain combined output in arrival order. The line channel closes when
        // both pipes hit EOF, which is when the child has exited or been
        // killed. After a kill we drain with a short grace period instead of
        // waiting for EOF: a grandchild holding the pipe open must not pin us.
        let status = loop {
            tokio::select! {
                maybe_line = line_rx.recv() => {
                    match maybe_line {
                        Some(line) => {
                            output.push_str(&line);
                            output.push('\n');
                        }
                        None => break child.wait().await?,
                    }
                }
                _ = tokio::time::sleep_until(deadline), if !timed_out && !stopped => {
                    timed_out = true;
                    warn!(program = %request.program, timeout = ?request.timeout, "Command timed out, killing child");
                    let _ = child.start_kill();
                    drain_with_grace(&mut line_rx, &mut output).await;
                    break child.wait().await?;
                }
                changed = cancel.changed(), if !cancel_closed && !timed_out && !stopped => {
                    match changed {
                        Ok(()) if *cancel.borrow_and_update() => {
                            stopped = true;
                            debug!(program = %request.program, "Cancellation requested, killing child");
                            let _ = child.start_kill();
                            drain_with_grace(&mut line_rx, &mut output).await;
                            break child.wait().await?;
                        }
                        Ok(()) => {}
                        Err(_) => cancel_closed = true,
                    }
                }
            }
        };

        let elapsed = start.elapsed();

        if timed_out {
            output.push_str(&format!(
                "### command timed out after {}s\n",
                request.timeout.as_secs()
            ));
        }
        if stopped {
            output.push_str("### command stopped\n");
        }

        let success = status.success() && !timed_out && !stopped;
        debug!(
            program = %request.program,
            success,
            timed_out,
            stopped,
            elapsed_ms = elapsed.as_millis() as u64,
            "Command finished"
        );

        Ok(ExecOutcome {
            success,
            output,
            elapsed,
            timed_out,
            stopped,
        })
    }
}

/// How long to keep reading buffered output after killing the child.
const KILL_DRAIN_GRACE: Duration = Duration::from_millis(100);

/// Collect whatever output is already in flight after a kill. Bounded by
/// [`KILL_DRAIN_GRACE`] so a grandchild holding the pipe open cannot stall
/// the outcome.
async fn drain_with_grace(rx: &mut mpsc::UnboundedReceiver<String>, output: &mut String) {
    let _ = tokio::time::timeout(KILL_DRAIN_GRACE, async {
        while let Some(line) = rx.recv().await {
            output.push_str(&line);
            output.push('\n');
        }
    })
    .await;
}

/// Forward one pipe to the combined line channel, line by line.
fn spawn_line_reader<R>(stream: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_execute_captures_output() {
        let executor = CommandExecutor::new();
        let request = ExecRequest::new("sh").with_args(["-c", "echo hello; echo world >&2"]);

        let outcome = executor.execute(&request).await.unwrap();

        assert!(outcome.success);
        assert!(!outcome.timed_out);
        assert!(!outcome.stopped);
        assert!(outcome.output.contains("hello"));
        assert!(outcome.output.contains("world"));
    }

    #[tokio::test]
    async fn test_execute_reports_failure_without_error() {
        let executor = CommandExecutor::new();
        let request = ExecRequest::new("sh").with_args(["-c", "echo broken; exit 3"]);

        let outcome = executor.execute(&request).await.unwrap();

        assert!(!outcome.success);
        assert!(outcome.output.contains("broken"));
    }

    #[tokio::test]
    async fn test_execute_invalid_program_is_invocation_error() {
        let executor = CommandExecutor::new();
        let request = ExecRequest::new("definitely-not-an-executable-bosun");

        let result = executor.execute(&request).await;

        assert!(matches!(result, Err(ExecError::Invocation { .. })));
    }

    #[tokio::test]
    async fn test_empty_program_is_invocation_error() {
        let executor = CommandExecutor::new();
        let request = ExecRequest::new("  ");

        let result = executor.execute(&request).await;

        assert!(matches!(result, Err(ExecError::Invocation { .. })));
    }

    #[tokio::test]
    async fn test_env_map_overrides_whitelisted_ambient() {
        std::env::set_var("BOSUN_EXEC_TEST_COLLIDE", "ambient");

        let executor = CommandExecutor::new();
        let request = ExecRequest::new("sh")
            .with_args(["-c", "echo value=$BOSUN_EXEC_TEST_COLLIDE"])
            .with_whitelist_env(["BOSUN_EXEC_TEST_COLLIDE", "PATH"])
            .with_env("BOSUN_EXEC_TEST_COLLIDE", "explicit");

        let outcome = executor.execute(&request).await.unwrap();

        assert!(outcome.success);
        assert!(outcome.output.contains("value=explicit"));
    }

    #[tokio::test]
    async fn test_cancel_before_start_short_circuits() {
        let executor = CommandExecutor::new();
        let request = ExecRequest::new("sh").with_args(["-c", "sleep 5"]);
        let (tx, rx) = watch::channel(true);

        let outcome = executor.execute_with_cancel(&request, rx).await.unwrap();
        drop(tx);

        assert!(outcome.stopped);
        assert!(!outcome.success);
    }
}
