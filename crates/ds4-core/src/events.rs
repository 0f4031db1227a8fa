//! Event system for decoupling the orchestrator from its presentation.
//!
//! The daemon logs events through [`TracingObserver`]; tests record them.

use std::fmt;

use crate::state::SessionState;

/// Why an active session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// Transport read failed or the controller went away.
    TransportLost(String),
    /// Readiness wait failed.
    PollFailed(String),
    /// Shutdown was requested.
    Shutdown,
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEnd::TransportLost(e) => write!(f, "transport lost: {}", e),
            SessionEnd::PollFailed(e) => write!(f, "poll failed: {}", e),
            SessionEnd::Shutdown => write!(f, "shutdown requested"),
        }
    }
}

/// Events emitted by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonEvent {
    StateChanged { from: SessionState, to: SessionState },
    /// Discovery found controllers.
    ControllerFound { count: usize },
    /// Discovery probe failed; scanning continues.
    ScanFailed { message: String },
    /// Connection attempt failed; back to scanning.
    ConnectFailed { message: String },
    /// Controller vanished between discovery and connect.
    ConnectionLost,
    SessionStarted,
    SessionEnded { reason: SessionEnd },
    /// A client received a snapshot.
    ClientServed { sequence: u32, command: bool },
    /// A client connection was closed without a reply.
    ClientDropped { received: usize },
    /// A client connection failed mid-exchange.
    ClientFailed { message: String },
}

/// Observer trait for receiving daemon events.
pub trait DaemonObserver {
    fn on_event(&self, event: &DaemonEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl DaemonObserver for NullObserver {
    fn on_event(&self, _event: &DaemonEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl DaemonObserver for TracingObserver {
    fn on_event(&self, event: &DaemonEvent) {
        match event {
            DaemonEvent::StateChanged { from, to } => {
                tracing::debug!(from = %from, to = %to, "State transition");
            }
            DaemonEvent::ControllerFound { count } => {
                tracing::info!(count, "Controller found");
            }
            DaemonEvent::ScanFailed { message } => {
                tracing::warn!("Error during controller scan: {}", message);
            }
            DaemonEvent::ConnectFailed { message } => {
                tracing::warn!("Error during controller connection: {}", message);
            }
            DaemonEvent::ConnectionLost => {
                tracing::info!("Controller lost before connect, rescanning");
            }
            DaemonEvent::SessionStarted => {
                tracing::info!("Controller connected");
            }
            DaemonEvent::SessionEnded { reason } => {
                tracing::info!(reason = %reason, "Controller session ended");
            }
            DaemonEvent::ClientServed { sequence, command } => {
                tracing::trace!(sequence, command, "IPC client served");
            }
            DaemonEvent::ClientDropped { received } => {
                tracing::debug!(received, "IPC client dropped");
            }
            DaemonEvent::ClientFailed { message } => {
                tracing::warn!("Error during IPC connection: {}", message);
            }
        }
    }
}
