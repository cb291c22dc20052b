//! Launch script resolution for a server directory.

use std::path::{Path, PathBuf};

use crate::supervisor::SupervisorError;

/// Launch script names tried in order on this platform.
#[cfg(windows)]
pub const LAUNCH_SCRIPTS: &[&str] = &["start.cmd", "start.bat"];
#[cfg(not(windows))]
pub const LAUNCH_SCRIPTS: &[&str] = &["start.sh"];

/// A resolved executable plus the directory it runs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchTarget {
    pub executable: PathBuf,
    pub working_dir: PathBuf,
}

impl LaunchTarget {
    /// Find the platform launch script inside `server_dir`.
    ///
    /// `script` overrides the default candidates when set.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::LaunchNotFound` naming the first expected
    /// script when none exists.
    pub fn find_in(server_dir: &Path, script: Option<&str>) -> Result<Self, SupervisorError> {
        let candidates: Vec<&str> = match script {
            Some(name) => vec![name],
            None => LAUNCH_SCRIPTS.to_vec(),
        };

        for name in &candidates {
            let path = server_dir.join(name);
            if path.is_file() {
                tracing::debug!(path = %path.display(), "Resolved launch script");
                return Ok(Self {
                    executable: path,
                    working_dir: server_dir.to_path_buf(),
                });
            }
        }

        Err(SupervisorError::LaunchNotFound {
            path: server_dir.join(candidates.first().copied().unwrap_or_default()),
        })
    }

    /// Use an explicit executable, running in its parent directory unless
    /// `working_dir` is given.
    #[must_use]
    pub fn explicit(executable: impl Into<PathBuf>, working_dir: Option<PathBuf>) -> Self {
        let executable = executable.into();
        let working_dir = working_dir
            .or_else(|| executable.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            executable,
            working_dir,
        }
    }
}
