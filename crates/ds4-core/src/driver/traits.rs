//! Transport driver abstraction.
//!
//! The orchestrator only sees this trait; the Bluetooth plumbing and report
//! parsing live behind it.

use std::os::fd::BorrowedFd;

use thiserror::Error;

use crate::protocol::{ControlState, OutputCommand};

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Controller disconnected")]
    Disconnected,

    #[error("No active controller session")]
    NotConnected,

    #[error("Driver failure: {0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of a discovery probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Nothing found yet.
    NotFound,
    /// At least one controller is available.
    Found(usize),
}

/// Result of a connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Session established; the transport handle is valid.
    Established,
    /// The controller went away between discovery and connect.
    Lost,
}

/// Controller transport consumed by the orchestrator.
pub trait ControllerDriver {
    /// Non-blocking discovery probe.
    fn scan(&mut self) -> Result<ScanOutcome, DriverError>;

    fn connect(&mut self) -> Result<ConnectOutcome, DriverError>;

    /// Readiness-pollable descriptor for report traffic. Only valid while connected.
    fn transport_handle(&self) -> Result<BorrowedFd<'_>, DriverError>;

    /// Consume one pending report and refresh [`ControllerDriver::current_controls`].
    fn read_report(&mut self) -> Result<(), DriverError>;

    /// Tear down the active session. Idempotent.
    fn disconnect(&mut self);

    /// Most recently read snapshot. Never blocks.
    fn current_controls(&self) -> &ControlState;

    /// Apply an outbound command received from a client.
    ///
    /// Device output is not supported yet, so the default discards it.
    fn apply_output(&mut self, _command: &OutputCommand) -> Result<(), DriverError> {
        Ok(())
    }
}
