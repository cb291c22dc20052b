//! Server process spawning and control.
//!
//! This module provides a builder for configuring the launch of a server
//! process with all three standard streams piped, and a handle for
//! controlling the running child.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

/// Error type for process spawning operations.
#[derive(thiserror::Error, Debug)]
pub enum SpawnError {
    /// The launch target does not exist.
    #[error("Launch target not found: {0}")]
    NotFound(PathBuf),
    /// Permission denied when spawning.
    #[error("Permission denied")]
    PermissionDenied,
    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpawnError {
    /// Create a `SpawnError` from an I/O error, classifying common cases.
    fn from_io(err: std::io::Error, executable: &Path) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(executable.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            _ => Self::Io(err),
        }
    }
}

/// Builder for configuring a server launch.
#[derive(Debug, Clone)]
pub struct ServerProcessBuilder {
    executable: PathBuf,
    args: Vec<OsString>,
    working_dir: Option<PathBuf>,
}

impl ServerProcessBuilder {
    /// Create a new builder for the given executable or launch script.
    #[must_use]
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    /// Append a command-line argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set the working directory for the server process.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Get the working directory, if set.
    #[must_use]
    pub fn get_working_dir(&self) -> Option<&PathBuf> {
        self.working_dir.as_ref()
    }

    #[must_use]
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Build the tokio command with all standard streams piped.
    fn command(&self, program: &Path) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        // Own process group, so a forced stop reaches whatever the launch
        // script started.
        #[cfg(unix)]
        cmd.process_group(0);

        #[cfg(windows)]
        {
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        cmd
    }

    /// Spawn the configured process.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the executable is missing or the OS refuses
    /// to start it.
    pub fn spawn(&self) -> Result<ServerProcess, SpawnError> {
        if !self.executable.exists() {
            return Err(SpawnError::NotFound(self.executable.clone()));
        }

        // Relative paths would otherwise resolve against the new working
        // directory on some platforms.
        let program = if self.executable.is_relative() {
            std::env::current_dir()
                .map(|cwd| cwd.join(&self.executable))
                .map_err(SpawnError::Io)?
        } else {
            self.executable.clone()
        };
        let child = self
            .command(&program)
            .spawn()
            .map_err(|e| SpawnError::from_io(e, &self.executable))?;

        tracing::debug!(
            executable = %self.executable.display(),
            pid = ?child.id(),
            "Server process spawned"
        );
        Ok(ServerProcess { child })
    }
}

/// A running server process.
#[derive(Debug)]
pub struct ServerProcess {
    child: Child,
}

impl ServerProcess {
    /// Take ownership of the stdin handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    /// Take ownership of the stdout handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Take ownership of the stderr handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Get the process ID, if still running.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Check if the process has exited without blocking.
    ///
    /// # Errors
    ///
    /// Returns an error if the process state cannot be queried.
    pub fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    /// Wait for the process to exit. Cancel safe.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting fails.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Send a kill to the process without waiting for it to exit.
    ///
    /// On Unix the whole process group is killed first, falling back to the
    /// child alone.
    ///
    /// # Errors
    ///
    /// Returns an error if no kill signal could be delivered.
    pub fn start_kill(&mut self) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            if self.kill_group().is_ok() {
                return Ok(());
            }
        }
        self.child.start_kill()
    }

    #[cfg(unix)]
    fn kill_group(&self) -> std::io::Result<()> {
        use nix::sys::signal::{killpg, Signal};

        let pid = self
            .id()
            .ok_or_else(|| std::io::Error::other("process already reaped"))?;
        killpg(process_group(pid)?, Signal::SIGKILL).map_err(std::io::Error::from)
    }
}

/// The group id of a child spawned as its own group leader.
#[cfg(unix)]
fn process_group(pid: u32) -> std::io::Result<nix::unistd::Pid> {
    let pid = i32::try_from(pid).map_err(|_| std::io::Error::other("process id out of range"))?;
    Ok(nix::unistd::Pid::from_raw(pid))
}
