//! Supervisor runner for a long-running server process.
//!
//! The supervisor is split into a handle and a control task. Every control
//! operation is a message to the task, which owns the child process, its
//! input stream, the output pump and the state machine. The same task awaits
//! the child's exit and the shutdown deadline, so every state change happens
//! on one serialized path.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::ChildStdin;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::ConsoleConfig;
use crate::console::{
    ClassifiedLine, CommandChannel, LaunchTarget, OutputCategory, OutputPump, ServerProcess,
    ServerProcessBuilder, SpawnError, DEFAULT_JOIN_TIMEOUT, DEFAULT_READ_BUFFER, STOP_COMMAND,
};
use crate::supervisor::{
    ShutdownOutcome, SupervisorError, SupervisorEvent, SupervisorEvents, SupervisorState,
    SupervisorStateMachine, SupervisorStats,
};

/// Default time the server gets to exit after `stop`.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the control request queue.
const CONTROL_BUFFER: usize = 32;

/// Tuning for a supervisor instance.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Bound on each wait for the output pump to finish.
    pub pump_join_timeout: Duration,
    /// Size of each read from the server's output.
    pub read_buffer_size: usize,
    /// Echo submitted commands as `> command` lines.
    pub echo_commands: bool,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            pump_join_timeout: DEFAULT_JOIN_TIMEOUT,
            read_buffer_size: DEFAULT_READ_BUFFER,
            echo_commands: true,
        }
    }
}

impl From<&ConsoleConfig> for SupervisorOptions {
    fn from(config: &ConsoleConfig) -> Self {
        Self {
            pump_join_timeout: config.pump_join_timeout(),
            read_buffer_size: config.read_buffer_size,
            echo_commands: config.echo_commands,
        }
    }
}

/// Handle to a supervised server.
///
/// Dropping the handle ends the control task, which kills any running child.
#[derive(Debug)]
pub struct ProcessSupervisor {
    requests: mpsc::Sender<ControlRequest>,
    state_rx: watch::Receiver<SupervisorState>,
    task: JoinHandle<()>,
}

impl ProcessSupervisor {
    /// Spawn the control task on the current Tokio runtime.
    ///
    /// Returns the handle and the receiving end of the event queue.
    #[must_use]
    pub fn spawn(options: SupervisorOptions) -> (Self, SupervisorEvents) {
        let (request_tx, request_rx) = mpsc::channel(CONTROL_BUFFER);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SupervisorState::Stopped);

        let control = ControlTask {
            requests: request_rx,
            events: event_tx,
            state_tx,
            machine: SupervisorStateMachine::new(),
            running: None,
            shutdown: None,
            options,
        };
        let task = tokio::spawn(control.run());

        (
            Self {
                requests: request_tx,
                state_rx,
                task,
            },
            SupervisorEvents::new(event_rx),
        )
    }

    /// Current state, as last published by the control task.
    #[must_use]
    pub fn state(&self) -> SupervisorState {
        *self.state_rx.borrow()
    }

    /// Subscribe to state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SupervisorState> {
        self.state_rx.clone()
    }

    /// Launch `executable` in `working_dir`.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyRunning` unless the server is stopped or crashed,
    /// `LaunchNotFound` if the executable is missing, and `SpawnFailed` if
    /// the OS refuses to start it.
    pub async fn start(
        &self,
        executable: impl Into<PathBuf>,
        working_dir: impl Into<PathBuf>,
    ) -> Result<(), SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.send(ControlRequest::Start {
            executable: executable.into(),
            working_dir: working_dir.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| SupervisorError::Closed)?
    }

    /// Launch a resolved target.
    ///
    /// # Errors
    ///
    /// See [`ProcessSupervisor::start`].
    pub async fn start_target(&self, target: &LaunchTarget) -> Result<(), SupervisorError> {
        self.start(target.executable.clone(), target.working_dir.clone())
            .await
    }

    /// Send one command line to the server.
    ///
    /// # Errors
    ///
    /// Returns `NotRunning` unless the server is running, and `WriteFailed`
    /// if the input stream is gone.
    pub async fn submit_command(&self, text: impl Into<String>) -> Result<(), SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.send(ControlRequest::Submit {
            text: text.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| SupervisorError::Closed)?
    }

    /// Ask the server to stop, killing it if it is still alive after
    /// `timeout`.
    pub async fn request_shutdown(&self, timeout: Duration) -> ShutdownOutcome {
        let (reply, rx) = oneshot::channel();
        if self
            .send(ControlRequest::Shutdown { timeout, reply })
            .await
            .is_err()
        {
            return ShutdownOutcome::GRACEFUL;
        }
        rx.await.unwrap_or(ShutdownOutcome::GRACEFUL)
    }

    /// Kill the server now. A no-op when nothing is running.
    pub async fn force_terminate(&self) {
        let (reply, rx) = oneshot::channel();
        if self
            .send(ControlRequest::ForceTerminate { reply })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    /// Lifetime counters.
    ///
    /// # Errors
    ///
    /// Returns `Closed` if the control task has ended.
    pub async fn stats(&self) -> Result<SupervisorStats, SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.send(ControlRequest::Stats { reply }).await?;
        rx.await.map_err(|_| SupervisorError::Closed)
    }

    /// Shut down and wait for the control task to finish.
    pub async fn close(self, timeout: Duration) -> ShutdownOutcome {
        let outcome = self.request_shutdown(timeout).await;
        let Self { requests, task, .. } = self;
        drop(requests);
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Supervisor control task failed");
        }
        outcome
    }

    async fn send(&self, request: ControlRequest) -> Result<(), SupervisorError> {
        self.requests
            .send(request)
            .await
            .map_err(|_| SupervisorError::Closed)
    }
}

enum ControlRequest {
    Start {
        executable: PathBuf,
        working_dir: PathBuf,
        reply: oneshot::Sender<Result<(), SupervisorError>>,
    },
    Submit {
        text: String,
        reply: oneshot::Sender<Result<(), SupervisorError>>,
    },
    Shutdown {
        timeout: Duration,
        reply: oneshot::Sender<ShutdownOutcome>,
    },
    ForceTerminate {
        reply: oneshot::Sender<()>,
    },
    Stats {
        reply: oneshot::Sender<SupervisorStats>,
    },
}

/// The child and everything bound to its lifetime.
struct RunningServer {
    process: ServerProcess,
    stdin: Option<ChildStdin>,
    pump: OutputPump,
    stop_requested: bool,
}

/// A stop in progress, waiting for exit or the deadline.
struct PendingShutdown {
    deadline: Instant,
    replies: Vec<oneshot::Sender<ShutdownOutcome>>,
}

struct ControlTask {
    requests: mpsc::Receiver<ControlRequest>,
    events: mpsc::UnboundedSender<SupervisorEvent>,
    state_tx: watch::Sender<SupervisorState>,
    machine: SupervisorStateMachine,
    running: Option<RunningServer>,
    shutdown: Option<PendingShutdown>,
    options: SupervisorOptions,
}

impl ControlTask {
    async fn run(mut self) {
        loop {
            tokio::select! {
                request = self.requests.recv() => {
                    let Some(request) = request else { break };
                    self.handle(request).await;
                }
                status = wait_for_exit(self.running.as_mut()) => {
                    self.on_exit(status).await;
                }
                () = shutdown_deadline(self.shutdown.as_ref()) => {
                    tracing::warn!("Server did not exit in time, terminating");
                    self.terminate().await;
                }
            }
        }

        if self.running.is_some() {
            tracing::info!("Supervisor handle dropped, terminating server");
            self.terminate().await;
        }
        tracing::debug!("Supervisor control task finished");
    }

    async fn handle(&mut self, request: ControlRequest) {
        match request {
            ControlRequest::Start {
                executable,
                working_dir,
                reply,
            } => {
                let _ = reply.send(self.start(executable, working_dir));
            }
            ControlRequest::Submit { text, reply } => {
                let _ = reply.send(self.submit(&text).await);
            }
            ControlRequest::Shutdown { timeout, reply } => {
                self.begin_shutdown(timeout, reply).await;
            }
            ControlRequest::ForceTerminate { reply } => {
                self.terminate().await;
                let _ = reply.send(());
            }
            ControlRequest::Stats { reply } => {
                let _ = reply.send(self.machine.stats());
            }
        }
    }

    fn start(&mut self, executable: PathBuf, working_dir: PathBuf) -> Result<(), SupervisorError> {
        let state = self.machine.state();
        if !state.can_start() {
            return Err(SupervisorError::AlreadyRunning { state });
        }

        if !executable.exists() {
            let err = SupervisorError::LaunchNotFound { path: executable };
            self.notice(format!("Error starting server: {err}"), OutputCategory::Error);
            self.set_state(SupervisorState::Stopped);
            return Err(err);
        }

        self.set_state(SupervisorState::Starting);
        self.notice("Server starting...", OutputCategory::Info);

        let builder = ServerProcessBuilder::new(&executable).working_dir(working_dir);
        let mut process = match builder.spawn() {
            Ok(process) => process,
            Err(e) => {
                let err = spawn_failure(e, executable);
                tracing::error!(error = %err, "Failed to start server");
                self.notice(format!("Error starting server: {err}"), OutputCategory::Error);
                self.set_state(SupervisorState::Stopped);
                return Err(err);
            }
        };

        let stdin = process.take_stdin();
        let Some(stdout) = process.take_stdout() else {
            let err = SupervisorError::SpawnFailed {
                path: executable,
                source: std::io::Error::other("stdout was not captured"),
            };
            self.notice(format!("Error starting server: {err}"), OutputCategory::Error);
            self.set_state(SupervisorState::Stopped);
            return Err(err);
        };
        let stderr = process.take_stderr();

        tracing::info!(
            executable = %executable.display(),
            pid = ?process.id(),
            "Server started"
        );
        self.set_state(SupervisorState::Running);

        let pump = OutputPump::start(
            stdout,
            stderr,
            self.events.clone(),
            self.options.read_buffer_size,
        );
        self.running = Some(RunningServer {
            process,
            stdin,
            pump,
            stop_requested: false,
        });
        Ok(())
    }

    async fn submit(&mut self, text: &str) -> Result<(), SupervisorError> {
        let state = self.machine.state();
        if !state.accepts_commands() {
            return Err(SupervisorError::NotRunning { state });
        }
        self.write_command(text).await
    }

    /// Write a command without checking state. Failures are also reported
    /// as an error line.
    async fn write_command(&mut self, text: &str) -> Result<(), SupervisorError> {
        let Some(line) = CommandChannel::normalize(text) else {
            return Ok(());
        };

        let result = match self.running.as_mut().and_then(|r| r.stdin.as_mut()) {
            Some(stdin) => CommandChannel::write(stdin, line).await,
            None => Err(SupervisorError::WriteFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "server input is closed",
            ))),
        };

        match result {
            Ok(()) => {
                if self.options.echo_commands {
                    self.emit(SupervisorEvent::Output(ClassifiedLine::echo(line)));
                }
                Ok(())
            }
            Err(err) => {
                tracing::warn!(command = %line, error = %err, "Command write failed");
                self.notice(err.to_string(), OutputCategory::Error);
                Err(err)
            }
        }
    }

    async fn begin_shutdown(&mut self, timeout: Duration, reply: oneshot::Sender<ShutdownOutcome>) {
        if self.running.is_none() || !self.machine.state().is_active() {
            let _ = reply.send(ShutdownOutcome::GRACEFUL);
            return;
        }
        if let Some(pending) = self.shutdown.as_mut() {
            pending.replies.push(reply);
            return;
        }

        self.set_state(SupervisorState::Stopping);
        self.notice("Stopping server...", OutputCategory::Warning);
        if let Some(running) = self.running.as_mut() {
            running.stop_requested = true;
            running.pump.mark_stopping();
        }
        if let Err(e) = self.write_command(STOP_COMMAND).await {
            tracing::debug!(error = %e, "Stop command not delivered, waiting for deadline");
        }

        self.shutdown = Some(PendingShutdown {
            deadline: Instant::now() + timeout,
            replies: vec![reply],
        });
    }

    /// The child exited on its own or after `stop`.
    async fn on_exit(&mut self, status: std::io::Result<ExitStatus>) {
        let Some(running) = self.running.take() else {
            return;
        };
        let RunningServer {
            process,
            stdin,
            pump,
            stop_requested,
        } = running;
        drop(stdin);

        let pump_exit = pump.join(self.options.pump_join_timeout).await;
        tracing::debug!(?pump_exit, "Output pump joined");
        drop(process);

        let code = match status {
            Ok(status) => status.code(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read server exit status");
                None
            }
        };
        self.finish(code, stop_requested, false);
    }

    /// Kill the child if one exists, then settle to `Stopped`.
    async fn terminate(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };
        running.stop_requested = true;
        running.pump.mark_stopping();

        if let Err(e) = running.process.start_kill() {
            let err = SupervisorError::TerminateFailed(e);
            tracing::warn!(error = %err, "Kill failed");
        }

        let grace = self.options.pump_join_timeout;
        let code = match tokio::time::timeout(grace, running.process.wait()).await {
            Ok(Ok(status)) => status.code(),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Failed to reap killed server");
                None
            }
            Err(_) => {
                tracing::warn!("Killed server did not exit in time");
                None
            }
        };

        drop(running.stdin);
        let pump_exit = running.pump.join(grace).await;
        tracing::debug!(?pump_exit, "Output pump joined after kill");

        self.machine.record_forced_stop();
        self.finish(code, true, true);
    }

    /// Report the exit. The pump is already joined, so every output chunk
    /// is queued before the final state change.
    fn finish(&mut self, code: Option<i32>, expected: bool, forced: bool) {
        if expected {
            self.notice("Server stopped.", OutputCategory::Warning);
        } else {
            let message = match code {
                Some(code) => format!("Server stopped unexpectedly (exit code {code})."),
                None => "Server stopped unexpectedly.".to_string(),
            };
            self.notice(message, OutputCategory::Error);
        }
        tracing::info!(?code, expected, forced, "Server exited");
        self.emit(SupervisorEvent::Exited { code, expected });

        self.set_state(if expected {
            SupervisorState::Stopped
        } else {
            SupervisorState::Crashed
        });

        if let Some(pending) = self.shutdown.take() {
            let outcome = if forced {
                ShutdownOutcome::FORCED
            } else {
                ShutdownOutcome::GRACEFUL
            };
            for reply in pending.replies {
                let _ = reply.send(outcome);
            }
        }
    }

    fn set_state(&mut self, to: SupervisorState) {
        let from = self.machine.transition(to);
        if from != to {
            self.state_tx.send_replace(to);
            self.emit(SupervisorEvent::StateChanged { from, to });
        }
    }

    fn notice(&self, text: impl Into<String>, category: OutputCategory) {
        self.emit(SupervisorEvent::Output(ClassifiedLine::notice(text, category)));
    }

    fn emit(&self, event: SupervisorEvent) {
        let _ = self.events.send(event);
    }
}

async fn wait_for_exit(running: Option<&mut RunningServer>) -> std::io::Result<ExitStatus> {
    match running {
        Some(running) => running.process.wait().await,
        None => std::future::pending().await,
    }
}

async fn shutdown_deadline(pending: Option<&PendingShutdown>) {
    match pending {
        Some(pending) => tokio::time::sleep_until(pending.deadline).await,
        None => std::future::pending().await,
    }
}

fn spawn_failure(err: SpawnError, executable: PathBuf) -> SupervisorError {
    match err {
        SpawnError::NotFound(path) => SupervisorError::LaunchNotFound { path },
        SpawnError::PermissionDenied => SupervisorError::SpawnFailed {
            path: executable,
            source: std::io::ErrorKind::PermissionDenied.into(),
        },
        SpawnError::Io(source) => SupervisorError::SpawnFailed {
            path: executable,
            source,
        },
    }
}
