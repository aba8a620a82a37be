use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a supervised server
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerState {
    /// Allocated, never started
    Created,
    /// Child process is alive and monitored
    Running,
    /// A shutdown is in progress
    Stopping,
    /// Child reaped, supervisor finished
    Exited,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerState::Created => write!(f, "created"),
            ServerState::Running => write!(f, "running"),
            ServerState::Stopping => write!(f, "stopping"),
            ServerState::Exited => write!(f, "exited"),
        }
    }
}

/// Why a server stopped
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitCondition {
    /// `end()` on a supervisor that is not running
    NotRunning,
    /// The child terminated without anyone asking
    UnsolicitedExit,
    /// Run time exhausted, child obeyed "stop"
    TimeoutRequested,
    /// Run time exhausted, child had to be killed
    TimeoutKilled,
    /// Stopped on request and exited on its own
    AuthorityRequested,
    /// Stopped on request by a signal
    AuthorityKilled,
}

impl ExitCondition {
    pub fn is_timeout(self) -> bool {
        matches!(self, ExitCondition::TimeoutRequested | ExitCondition::TimeoutKilled)
    }

    /// Human-readable status line for the command layer
    pub fn describe(self) -> &'static str {
        match self {
            ExitCondition::NotRunning => "server is not running",
            ExitCondition::UnsolicitedExit => "server exited unexpectedly",
            ExitCondition::TimeoutRequested => "server reached its maximum run time and stopped",
            ExitCondition::TimeoutKilled => {
                "server reached its maximum run time and was killed after ignoring stop"
            }
            ExitCondition::AuthorityRequested => "server stopped on request",
            ExitCondition::AuthorityKilled => "server was killed on request",
        }
    }
}

impl fmt::Display for ExitCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Result of a liveness probe
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Liveness {
    NotStarted,
    Running,
    Terminated,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_conditions() {
        assert!(ExitCondition::TimeoutKilled.is_timeout());
        assert!(ExitCondition::TimeoutRequested.is_timeout());
        assert!(!ExitCondition::UnsolicitedExit.is_timeout());
        assert!(!ExitCondition::AuthorityRequested.is_timeout());
    }

    #[test]
    fn test_display() {
        assert_eq!(ServerState::Stopping.to_string(), "stopping");
        assert_eq!(
            ExitCondition::NotRunning.to_string(),
            "server is not running"
        );
    }
}
