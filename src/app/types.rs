use serde::Serialize;
use std::fmt;

/// Lifecycle state of a supervised component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComponentState::Stopped => "stopped",
            ComponentState::Starting => "starting",
            ComponentState::Running => "running",
            ComponentState::Stopping => "stopping",
            ComponentState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Why the service is going down
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT or SIGTERM
    Signal(&'static str),
    /// The API server stopped serving on its own
    ServerExited,
}

impl ShutdownReason {
    /// Failures map to a non-zero exit code
    pub fn is_failure(&self) -> bool {
        matches!(self, ShutdownReason::ServerExited)
    }
}
