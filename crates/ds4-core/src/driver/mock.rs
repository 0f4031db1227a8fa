//! Scripted driver for testing orchestrator logic.

use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Mutex};

use super::traits::{ConnectOutcome, ControllerDriver, DriverError, ScanOutcome};
use crate::protocol::{ControlState, OutputCommand};
use crate::shutdown::ShutdownToken;

/// Driver operation recorded by [`ScriptedDriver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverCall {
    Scan,
    Connect,
    ReadReport,
    Disconnect,
    ApplyOutput,
}

/// Test-side view of a [`ScriptedDriver`] that outlives moving the driver
/// into an orchestrator.
#[derive(Clone)]
pub struct ScriptHandle {
    calls: Arc<Mutex<Vec<DriverCall>>>,
    outputs: Arc<Mutex<Vec<OutputCommand>>>,
    feed: Arc<Mutex<UnixStream>>,
}

impl ScriptHandle {
    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: DriverCall) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == call).count()
    }

    pub fn outputs(&self) -> Vec<OutputCommand> {
        self.outputs.lock().unwrap().clone()
    }

    /// Make `report` readable on the transport handle.
    pub fn push_report(&self, report: &[u8]) -> io::Result<()> {
        self.feed.lock().unwrap().write_all(report)
    }
}

/// Driver that replays scripted outcomes over a real socket pair, so the
/// transport handle can be polled like a live session.
pub struct ScriptedDriver {
    scans: VecDeque<Result<ScanOutcome, DriverError>>,
    connects: VecDeque<Result<ConnectOutcome, DriverError>>,
    reads_before_failure: Option<usize>,
    on_exhausted: Option<ShutdownToken>,
    handle: ScriptHandle,
    transport: UnixStream,
    connected: bool,
    controls: ControlState,
}

impl ScriptedDriver {
    pub fn new() -> io::Result<Self> {
        let (transport, feed) = UnixStream::pair()?;
        transport.set_nonblocking(true)?;
        Ok(Self {
            scans: VecDeque::new(),
            connects: VecDeque::new(),
            reads_before_failure: None,
            on_exhausted: None,
            handle: ScriptHandle {
                calls: Arc::new(Mutex::new(Vec::new())),
                outputs: Arc::new(Mutex::new(Vec::new())),
                feed: Arc::new(Mutex::new(feed)),
            },
            transport,
            connected: false,
            controls: ControlState::default(),
        })
    }

    pub fn scan_results(
        mut self,
        results: impl IntoIterator<Item = Result<ScanOutcome, DriverError>>,
    ) -> Self {
        self.scans.extend(results);
        self
    }

    pub fn connect_results(
        mut self,
        results: impl IntoIterator<Item = Result<ConnectOutcome, DriverError>>,
    ) -> Self {
        self.connects.extend(results);
        self
    }

    /// Fail the read after `n` successful ones.
    pub fn fail_reads_after(mut self, n: usize) -> Self {
        self.reads_before_failure = Some(n);
        self
    }

    /// Cancel `token` once the scan script runs out.
    pub fn cancel_when_exhausted(mut self, token: ShutdownToken) -> Self {
        self.on_exhausted = Some(token);
        self
    }

    pub fn handle(&self) -> ScriptHandle {
        self.handle.clone()
    }

    fn record(&self, call: DriverCall) {
        self.handle.calls.lock().unwrap().push(call);
    }
}

impl ControllerDriver for ScriptedDriver {
    fn scan(&mut self) -> Result<ScanOutcome, DriverError> {
        self.record(DriverCall::Scan);
        match self.scans.pop_front() {
            Some(result) => result,
            None => {
                if let Some(token) = &self.on_exhausted {
                    token.cancel();
                }
                Ok(ScanOutcome::NotFound)
            }
        }
    }

    fn connect(&mut self) -> Result<ConnectOutcome, DriverError> {
        self.record(DriverCall::Connect);
        let result = self
            .connects
            .pop_front()
            .unwrap_or_else(|| Err(DriverError::Failed("connect script exhausted".into())));
        if let Ok(ConnectOutcome::Established) = result {
            self.connected = true;
        }
        result
    }

    fn transport_handle(&self) -> Result<BorrowedFd<'_>, DriverError> {
        if !self.connected {
            return Err(DriverError::NotConnected);
        }
        Ok(self.transport.as_fd())
    }

    fn read_report(&mut self) -> Result<(), DriverError> {
        self.record(DriverCall::ReadReport);
        if !self.connected {
            return Err(DriverError::NotConnected);
        }
        if let Some(remaining) = self.reads_before_failure.as_mut() {
            if *remaining == 0 {
                return Err(DriverError::Disconnected);
            }
            *remaining -= 1;
        }

        let mut buf = [0u8; 128];
        match (&self.transport).read(&mut buf) {
            Ok(0) => Err(DriverError::Disconnected),
            Ok(n) => {
                self.controls.update(&buf[..n]);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn disconnect(&mut self) {
        self.record(DriverCall::Disconnect);
        self.connected = false;
    }

    fn current_controls(&self) -> &ControlState {
        &self.controls
    }

    fn apply_output(&mut self, command: &OutputCommand) -> Result<(), DriverError> {
        self.record(DriverCall::ApplyOutput);
        self.handle.outputs.lock().unwrap().push(*command);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_scans_then_not_found() {
        let token = ShutdownToken::new();
        let mut driver = ScriptedDriver::new()
            .unwrap()
            .scan_results([Ok(ScanOutcome::Found(1))])
            .cancel_when_exhausted(token.clone());

        assert_eq!(driver.scan().unwrap(), ScanOutcome::Found(1));
        assert!(!token.is_cancelled());
        assert_eq!(driver.scan().unwrap(), ScanOutcome::NotFound);
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_reports_flow_through_socket() {
        let mut driver = ScriptedDriver::new()
            .unwrap()
            .connect_results([Ok(ConnectOutcome::Established)]);
        let handle = driver.handle();

        assert!(driver.transport_handle().is_err());
        driver.connect().unwrap();
        handle.push_report(&[0x11, 0x22]).unwrap();
        driver.read_report().unwrap();
        assert_eq!(driver.current_controls().sequence, 1);
        assert_eq!(&driver.current_controls().report[..2], &[0x11, 0x22]);

        // Nothing pending is not an error.
        driver.read_report().unwrap();
        assert_eq!(driver.current_controls().sequence, 1);
        assert_eq!(
            handle.calls(),
            vec![DriverCall::Connect, DriverCall::ReadReport, DriverCall::ReadReport]
        );
    }
}
