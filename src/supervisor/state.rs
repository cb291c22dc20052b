//! Supervisor state machine.

use serde::{Deserialize, Serialize};

/// Lifecycle state of the supervised server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    Crashed,
}

impl SupervisorState {
    /// `start` is only accepted from a resting state.
    #[must_use]
    pub fn can_start(self) -> bool {
        matches!(self, Self::Stopped | Self::Crashed)
    }

    /// Commands are only forwarded while running.
    #[must_use]
    pub fn accepts_commands(self) -> bool {
        self == Self::Running
    }

    /// A child process may exist in this state.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Crashed => "crashed",
        };
        f.write_str(name)
    }
}

/// State machine for tracking the server lifecycle.
#[derive(Debug, Clone)]
pub struct SupervisorStateMachine {
    state: SupervisorState,
    starts: usize,
    crashes: usize,
    forced_stops: usize,
}

impl Default for SupervisorStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SupervisorStateMachine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: SupervisorState::Stopped,
            starts: 0,
            crashes: 0,
            forced_stops: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Move to `new_state`, returning the previous state.
    pub fn transition(&mut self, new_state: SupervisorState) -> SupervisorState {
        let from = self.state;
        tracing::debug!(from = ?from, to = ?new_state, "State transition");
        match new_state {
            SupervisorState::Running => self.starts = self.starts.saturating_add(1),
            SupervisorState::Crashed => self.crashes = self.crashes.saturating_add(1),
            _ => {}
        }
        self.state = new_state;
        from
    }

    pub fn record_forced_stop(&mut self) {
        self.forced_stops = self.forced_stops.saturating_add(1);
    }

    #[must_use]
    pub fn stats(&self) -> SupervisorStats {
        SupervisorStats {
            starts: self.starts,
            crashes: self.crashes,
            forced_stops: self.forced_stops,
        }
    }
}

/// Lifetime counters across restarts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorStats {
    pub starts: usize,
    pub crashes: usize,
    pub forced_stops: usize,
}
