//! Supervisor error types.

use std::path::PathBuf;

use crate::supervisor::SupervisorState;

/// Error type for supervisor operations.
#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
    /// The launch target does not exist.
    #[error("Launch target not found: {}", path.display())]
    LaunchNotFound { path: PathBuf },
    /// The OS refused to start the process.
    #[error("Failed to start {}: {source}", path.display())]
    SpawnFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// `start` was called while a process is active.
    #[error("Server is already {state}")]
    AlreadyRunning { state: SupervisorState },
    /// A command was submitted while the server is not running.
    #[error("Server is not running (state: {state})")]
    NotRunning { state: SupervisorState },
    /// A command held a line break and would reach the server as several
    /// commands.
    #[error("Error sending command: commands must be a single line")]
    InvalidCommand,
    /// Writing to the server's input failed.
    #[error("Error sending command: {0}")]
    WriteFailed(#[source] std::io::Error),
    /// Reading the server's output failed.
    #[error("Error reading server output: {0}")]
    ReadFailed(#[source] std::io::Error),
    /// Killing the server failed. Logged, never returned to callers.
    #[error("Failed to terminate server: {0}")]
    TerminateFailed(#[source] std::io::Error),
    /// The supervisor's control task is no longer running.
    #[error("Supervisor control task closed")]
    Closed,
}
