//! Configuration file loader.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Console configuration loaded from a TOML file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// How long to wait for the server to exit after `stop`.
    pub shutdown_timeout_secs: u64,
    /// Bound on joining the output pump after the process is gone.
    pub pump_join_timeout_ms: u64,
    /// Size of each read from the server's output.
    pub read_buffer_size: usize,
    /// Echo submitted commands into the console.
    pub echo_commands: bool,
    /// Launch script name inside the server directory, overriding the
    /// platform default.
    pub launch_script: Option<String>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: 10,
            pump_join_timeout_ms: 2000,
            read_buffer_size: 1024,
            echo_commands: true,
            launch_script: None,
        }
    }
}

impl ConsoleConfig {
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    #[must_use]
    pub fn pump_join_timeout(&self) -> Duration {
        Duration::from_millis(self.pump_join_timeout_ms)
    }
}

/// Configuration loader that searches multiple locations.
#[derive(Debug)]
pub struct ConfigLoader {
    /// Search paths in order of priority.
    search_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader with default search paths.
    #[must_use]
    pub fn new() -> Self {
        let mut search_paths = Vec::new();

        // 1. Current directory: .server-console.toml
        search_paths.push(PathBuf::from(".server-console.toml"));

        // 2. User config directory: ~/.config/server-console/config.toml
        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join("server-console").join("config.toml"));
        }

        Self { search_paths }
    }

    /// Create a config loader with a specific config file path.
    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            search_paths: vec![path],
        }
    }

    /// Load configuration from the first available file, or return defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load(&self) -> Result<ConsoleConfig, ConfigError> {
        for path in &self.search_paths {
            if path.exists() {
                tracing::debug!(path = %path.display(), "Loading config file");
                return Self::load_from_path(path);
            }
        }

        tracing::debug!("No config file found, using defaults");
        Ok(ConsoleConfig::default())
    }

    /// Load configuration from a specific path.
    fn load_from_path(path: &PathBuf) -> Result<ConsoleConfig, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.clone(),
            source: e,
        })
    }

    /// Get the search paths for debugging.
    #[must_use]
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },
}
