//! Worker process sessions.
//!
//! A [`ProcessSession`] spawns one optimization worker, decodes its stdout
//! and stderr, and reports to a [`SessionSink`]. Whatever happens (normal
//! exit, crash, cancellation) the sink receives exactly one terminal event.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use foodmap_core::{SessionState, StreamEvent};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};

use crate::decoder::{Decoded, OutputDecoder};
use crate::error::BridgeError;
use crate::framer::LineReader;
use crate::sink::SessionSink;

/// How many stderr lines are kept for failure reports.
const STDERR_TAIL_LINES: usize = 20;

/// Message used when a worker exits cleanly without a result.
pub const NO_RESULT_MESSAGE: &str = "process closed without producing a result";

/// Message used when a session is cancelled before it finished.
pub const CANCELLED_MESSAGE: &str = "session cancelled";

/// Command line and environment for one worker process.
///
/// # Example
///
/// ```rust,no_run
/// use foodmap_bridge::WorkerCommand;
///
/// let command = WorkerCommand::new("python3")
///     .arg("run_optimization_stream.py")
///     .args(["--domain", "la_central", "--budget", "750000"])
///     .env("PYTHONUNBUFFERED", "1");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerCommand {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    current_dir: Option<PathBuf>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            current_dir: None,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set the working directory.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_env(&self) -> &[(String, String)] {
        &self.env
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

/// Handle to a running session.
///
/// Dropping the handle does not stop the session; use [`cancel`] or hold the
/// guard from [`cancel_on_drop`] to bind the worker to a scope.
///
/// [`cancel`]: SessionHandle::cancel
/// [`cancel_on_drop`]: SessionHandle::cancel_on_drop
pub struct SessionHandle {
    cancel: CancellationToken,
    state: watch::Receiver<SessionState>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub(crate) fn from_parts(
        cancel: CancellationToken,
        state: watch::Receiver<SessionState>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            cancel,
            state,
            task,
        }
    }

    /// Kill the worker and end the session. Safe to call more than once and
    /// after the worker has exited.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receiver for state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// A guard that cancels the session when dropped.
    pub fn cancel_on_drop(&self) -> DropGuard {
        self.cancel.clone().drop_guard()
    }

    /// Wait until the session task has delivered its final callbacks.
    pub async fn wait(self) {
        if let Err(e) = self.task.await {
            error!(error = %e, "Session task failed");
        }
    }
}

/// Spawns and supervises worker processes.
pub struct ProcessSession;

impl ProcessSession {
    /// Spawn the worker and start streaming its output into `sink`.
    ///
    /// If the process cannot be spawned the sink still receives its terminal
    /// `Error` (and `on_exit`) before the error is returned.
    pub async fn start(
        command: WorkerCommand,
        sink: Arc<dyn SessionSink>,
    ) -> Result<SessionHandle, BridgeError> {
        let (state_tx, state_rx) = watch::channel(SessionState::Created);
        let mut driver = SessionDriver::new(sink, state_tx);

        info!(
            program = %command.program,
            args = ?command.args,
            "Spawning worker process"
        );
        driver.transition(SessionState::Spawning).await;

        let mut child = match command.to_command().spawn() {
            Ok(child) => child,
            Err(source) => {
                error!(program = %command.program, error = %source, "Failed to spawn worker");
                let err = BridgeError::SpawnError {
                    program: command.program.clone(),
                    source,
                };
                driver.close(None, err.to_string()).await;
                return Err(err);
            }
        };
        info!(pid = ?child.id(), "Worker process spawned");

        let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => (stdout, stderr),
            _ => {
                let err = BridgeError::ProtocolError("worker output pipes unavailable".to_string());
                child.start_kill().ok();
                driver.close(None, err.to_string()).await;
                return Err(err);
            }
        };

        let cancel = CancellationToken::new();
        let task = tokio::spawn(supervise(child, stdout, stderr, driver, cancel.clone()));

        Ok(SessionHandle::from_parts(cancel, state_rx, task))
    }
}

/// Session task: pump both pipes until they close, then reap the process.
async fn supervise(
    mut child: Child,
    stdout: ChildStdout,
    stderr: ChildStderr,
    mut driver: SessionDriver,
    cancel: CancellationToken,
) {
    let mut stdout = LineReader::new(stdout);
    let mut stderr = LineReader::new(stderr);
    let mut decoder = OutputDecoder::new();
    let mut stdout_open = true;
    let mut stderr_open = true;

    while stdout_open || stderr_open {
        tokio::select! {
            _ = cancel.cancelled() => {
                let code = kill(&mut child).await;
                driver.close(code, CANCELLED_MESSAGE.to_string()).await;
                return;
            }
            line = stdout.next_line(), if stdout_open => match line {
                Ok(Some(line)) => {
                    driver.observe_output().await;
                    if let Some(decoded) = decoder.decode_line(line) {
                        driver.deliver(decoded).await;
                    }
                }
                Ok(None) => {
                    stdout_open = false;
                    driver.end_of_stdout(&mut decoder, None).await;
                }
                Err(e) => {
                    stdout_open = false;
                    driver.end_of_stdout(&mut decoder, Some(e.into())).await;
                }
            },
            line = stderr.next_line(), if stderr_open => match line {
                Ok(Some(line)) => {
                    driver.observe_output().await;
                    let promoted = decoder.scan_stderr(&line);
                    driver.observe_stderr(&line, promoted).await;
                }
                Ok(None) => stderr_open = false,
                Err(e) => {
                    error!(error = %BridgeError::Io(e), "Error reading worker stderr");
                    stderr_open = false;
                }
            },
        }
    }

    let code = tokio::select! {
        status = child.wait() => match status {
            Ok(status) => status.code(),
            Err(e) => {
                error!(error = %e, "Failed to wait for worker process");
                None
            }
        },
        _ = cancel.cancelled() => {
            let code = kill(&mut child).await;
            driver.close(code, CANCELLED_MESSAGE.to_string()).await;
            return;
        }
    };

    driver.exited(code).await;
}

async fn kill(child: &mut Child) -> Option<i32> {
    info!(pid = ?child.id(), "Killing worker process");
    if let Err(e) = child.start_kill() {
        // Already exited.
        debug!(error = %e, "Worker kill failed");
    }
    match child.wait().await {
        Ok(status) => status.code(),
        Err(e) => {
            warn!(error = %e, "Failed to reap killed worker");
            None
        }
    }
}

/// Bounded record of what the worker wrote to stderr.
#[derive(Debug, Default)]
struct StderrCapture {
    error_lines: VecDeque<String>,
    tail: VecDeque<String>,
}

impl StderrCapture {
    fn record(&mut self, line: &str, is_error: bool) {
        push_bounded(&mut self.tail, line);
        if is_error {
            push_bounded(&mut self.error_lines, line);
        }
    }

    /// Error-severity lines if any were seen, else the last lines of stderr.
    fn summary(&self) -> Option<String> {
        let lines = if self.error_lines.is_empty() {
            &self.tail
        } else {
            &self.error_lines
        };
        if lines.is_empty() {
            None
        } else {
            Some(lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n"))
        }
    }
}

fn push_bounded(lines: &mut VecDeque<String>, line: &str) {
    if lines.len() == STDERR_TAIL_LINES {
        lines.pop_front();
    }
    lines.push_back(line.to_string());
}

/// Applies the session state machine and terminal-event rules on top of a
/// sink. Shared by process and relay sessions.
pub(crate) struct SessionDriver {
    sink: Arc<dyn SessionSink>,
    state: watch::Sender<SessionState>,
    terminal_sent: bool,
    first_error: Option<String>,
    stderr: StderrCapture,
}

impl SessionDriver {
    pub(crate) fn new(sink: Arc<dyn SessionSink>, state: watch::Sender<SessionState>) -> Self {
        Self {
            sink,
            state,
            terminal_sent: false,
            first_error: None,
            stderr: StderrCapture::default(),
        }
    }

    pub(crate) async fn transition(&mut self, next: SessionState) {
        let current = *self.state.borrow();
        if !current.can_transition_to(next) {
            return;
        }
        debug!(from = ?current, to = ?next, "Session state change");
        self.state.send_replace(next);
        self.sink.on_state(next).await;
    }

    /// First output line moves the session to Streaming.
    pub(crate) async fn observe_output(&mut self) {
        if *self.state.borrow() == SessionState::Spawning {
            self.transition(SessionState::Streaming).await;
        }
    }

    pub(crate) async fn observe_stderr(&mut self, line: &str, promoted: Option<StreamEvent>) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return;
        }
        self.stderr.record(trimmed, promoted.is_some());
        match promoted {
            Some(event) => {
                warn!(stderr = %trimmed, "Worker reported an error");
                self.deliver(Decoded::progress(event)).await;
            }
            None => debug!(stderr = %trimmed, "Worker stderr"),
        }
    }

    /// Stdout is done, at EOF or on a read error. An open result block is
    /// reported in both cases.
    pub(crate) async fn end_of_stdout(
        &mut self,
        decoder: &mut OutputDecoder,
        read_error: Option<BridgeError>,
    ) {
        match read_error {
            Some(e) => error!(error = %e, "Error reading worker stdout"),
            None => debug!(
                messages = decoder.parser().message_count(),
                skipped = decoder.parser().skipped_count(),
                "Worker stdout closed (EOF)"
            ),
        }
        if let Some(decoded) = decoder.finish() {
            self.deliver(decoded).await;
        }
    }

    pub(crate) async fn deliver(&mut self, decoded: Decoded) {
        if self.terminal_sent {
            debug!(
                message_type = decoded.event.kind(),
                "Discarding event after terminal state"
            );
            return;
        }

        if decoded.terminal {
            self.finish_with(decoded.event).await;
            return;
        }

        if let StreamEvent::Error { message } = &decoded.event {
            self.first_error.get_or_insert_with(|| message.clone());
        }
        if let Err(e) = self.sink.on_event(decoded.event).await {
            debug!(error = %e, "Sink rejected event");
        }
    }

    async fn finish_with(&mut self, event: StreamEvent) {
        if self.terminal_sent {
            return;
        }
        self.terminal_sent = true;

        let next = match event {
            StreamEvent::Result { .. } => SessionState::Completed,
            _ => SessionState::Failed,
        };
        info!(outcome = ?next, "Session reached terminal state");
        self.transition(next).await;

        if let Err(e) = self.sink.on_terminal(event).await {
            debug!(error = %e, "Sink rejected terminal event");
        }
    }

    /// Worker process exited on its own.
    pub(crate) async fn exited(&mut self, code: Option<i32>) {
        info!(exit_code = ?code, "Worker process exited");
        let message = match code {
            Some(0) => self
                .first_error
                .clone()
                .unwrap_or_else(|| NO_RESULT_MESSAGE.to_string()),
            Some(code) => self
                .stderr
                .summary()
                .or_else(|| self.first_error.clone())
                .unwrap_or_else(|| format!("process exited with code {}", code)),
            None => self
                .stderr
                .summary()
                .unwrap_or_else(|| "process terminated by signal".to_string()),
        };
        self.close(code, message).await;
    }

    /// End the session, failing it with `message` if no terminal event was
    /// delivered yet.
    pub(crate) async fn close(&mut self, code: Option<i32>, message: String) {
        if !self.terminal_sent {
            warn!(error = %message, "Session ended without a result");
            self.finish_with(StreamEvent::error(message)).await;
        }
        self.sink.on_exit(code).await;
    }

    pub(crate) fn first_error(&self) -> Option<&str> {
        self.first_error.as_deref()
    }
}
