//! Connection session states.

use std::fmt;

/// Where the orchestrator is in the controller lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Probing for a controller.
    #[default]
    Scanning,
    /// Controller found, establishing the session.
    Connecting,
    /// Session up; servicing transport and IPC.
    Active,
    /// Tearing the session down.
    Disconnecting,
    /// Shutdown observed; terminal.
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Scanning => write!(f, "SCANNING"),
            SessionState::Connecting => write!(f, "CONNECTING"),
            SessionState::Active => write!(f, "ACTIVE"),
            SessionState::Disconnecting => write!(f, "DISCONNECTING"),
            SessionState::Stopped => write!(f, "STOPPED"),
        }
    }
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Stopped)
    }
}
