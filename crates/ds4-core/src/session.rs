//! Connection orchestrator - drives a controller from discovery to an
//! active session and back.
//!
//! Everything runs on the calling thread. While a session is active the
//! orchestrator waits on two descriptors, the IPC listening socket and the
//! driver's transport handle, with a bounded timeout so shutdown is seen
//! within one wait interval. When both are ready in the same wait the IPC
//! client is served first, then the pending report is read.

use std::sync::Arc;

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use tracing::{info, instrument, warn};

use crate::config::{IpcConfig, SessionConfig};
use crate::driver::{ConnectOutcome, ControllerDriver, ScanOutcome};
use crate::events::{DaemonEvent, DaemonObserver, SessionEnd, TracingObserver};
use crate::ipc::{IpcBridge, Served};
use crate::shutdown::ShutdownToken;
use crate::state::SessionState;

/// Owns the controller driver for the daemon's lifetime.
pub struct Orchestrator<D: ControllerDriver, O: DaemonObserver> {
    driver: D,
    ipc: IpcConfig,
    session: SessionConfig,
    shutdown: ShutdownToken,
    observer: Arc<O>,
    /// Consecutive scans that found nothing or failed.
    scan_misses: u32,
}

impl<D: ControllerDriver> Orchestrator<D, TracingObserver> {
    /// Create an orchestrator that logs events through tracing.
    pub fn new(driver: D, ipc: IpcConfig, session: SessionConfig, shutdown: ShutdownToken) -> Self {
        Self::with_observer(driver, ipc, session, shutdown, Arc::new(TracingObserver))
    }
}

impl<D: ControllerDriver, O: DaemonObserver> Orchestrator<D, O> {
    pub fn with_observer(
        driver: D,
        ipc: IpcConfig,
        session: SessionConfig,
        shutdown: ShutdownToken,
        observer: Arc<O>,
    ) -> Self {
        Self {
            driver,
            ipc,
            session,
            shutdown,
            observer,
            scan_misses: 0,
        }
    }

    fn emit(&self, event: DaemonEvent) {
        self.observer.on_event(&event);
    }

    /// Run until shutdown is requested.
    ///
    /// Only a failure to set up the IPC socket is returned as an error;
    /// every driver failure is logged and retried from scanning.
    #[instrument(skip(self))]
    pub fn run(&mut self) -> Result<()> {
        info!("Waiting for controller...");
        let mut state = SessionState::Scanning;
        while !state.is_terminal() {
            let next = self.step(state)?;
            if next != state {
                self.emit(DaemonEvent::StateChanged {
                    from: state,
                    to: next,
                });
            }
            state = next;
        }
        info!("Orchestrator stopped");
        Ok(())
    }

    /// Perform one transition out of `state`.
    pub fn step(&mut self, state: SessionState) -> Result<SessionState> {
        if self.shutdown.is_cancelled()
            && matches!(state, SessionState::Scanning | SessionState::Connecting)
        {
            return Ok(SessionState::Stopped);
        }

        match state {
            SessionState::Scanning => Ok(self.scan()),
            SessionState::Connecting => Ok(self.connect()),
            SessionState::Active => self.run_active_session(),
            SessionState::Disconnecting => Ok(self.disconnect()),
            SessionState::Stopped => Ok(SessionState::Stopped),
        }
    }

    fn scan(&mut self) -> SessionState {
        match self.driver.scan() {
            Ok(ScanOutcome::Found(count)) => {
                self.scan_misses = 0;
                self.emit(DaemonEvent::ControllerFound { count });
                return SessionState::Connecting;
            }
            Ok(ScanOutcome::NotFound) => {}
            Err(e) => self.emit(DaemonEvent::ScanFailed {
                message: e.to_string(),
            }),
        }

        self.scan_misses = self.scan_misses.saturating_add(1);
        let delay = self.session.scan_retry.delay(self.scan_misses);
        if !delay.is_zero() {
            self.shutdown.sleep(delay);
        }
        SessionState::Scanning
    }

    fn connect(&mut self) -> SessionState {
        match self.driver.connect() {
            Ok(ConnectOutcome::Established) => {
                self.emit(DaemonEvent::SessionStarted);
                SessionState::Active
            }
            Ok(ConnectOutcome::Lost) => {
                self.emit(DaemonEvent::ConnectionLost);
                SessionState::Disconnecting
            }
            Err(e) => {
                self.emit(DaemonEvent::ConnectFailed {
                    message: e.to_string(),
                });
                SessionState::Scanning
            }
        }
    }

    fn disconnect(&mut self) -> SessionState {
        self.driver.disconnect();
        if self.shutdown.is_cancelled() {
            SessionState::Stopped
        } else {
            SessionState::Scanning
        }
    }

    fn run_active_session(&mut self) -> Result<SessionState> {
        let bridge = match IpcBridge::bind(&self.ipc) {
            Ok(bridge) => bridge,
            Err(e) => {
                self.driver.disconnect();
                return Err(e).context("Could not set up IPC socket");
            }
        };

        let reason = loop {
            if self.shutdown.is_cancelled() {
                break SessionEnd::Shutdown;
            }

            let (ipc_ready, transport_ready) = match self.wait_ready(&bridge) {
                Ok(ready) => ready,
                Err(reason) => break reason,
            };

            if let Err(reason) = self.dispatch(&bridge, ipc_ready, transport_ready) {
                break reason;
            }
        };

        self.emit(DaemonEvent::SessionEnded { reason });
        Ok(SessionState::Disconnecting)
    }

    /// Wait for readiness on the IPC listener and the transport handle.
    fn wait_ready(&self, bridge: &IpcBridge) -> Result<(bool, bool), SessionEnd> {
        let transport = self
            .driver
            .transport_handle()
            .map_err(|e| SessionEnd::TransportLost(e.to_string()))?;

        let mut fds = [
            PollFd::new(bridge.listen_handle(), PollFlags::POLLIN),
            PollFd::new(transport, PollFlags::POLLIN),
        ];
        match poll(&mut fds, PollTimeout::from(self.session.poll_timeout_ms)) {
            Ok(0) | Err(Errno::EINTR) => Ok((false, false)),
            Ok(_) => Ok((
                is_ready(&fds[0], PollFlags::POLLIN),
                // Hang-ups surface as a failed read.
                is_ready(
                    &fds[1],
                    PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR | PollFlags::POLLNVAL,
                ),
            )),
            Err(e) => Err(SessionEnd::PollFailed(e.to_string())),
        }
    }

    /// Handle one wait's readiness. A waiting client is served before the
    /// pending report is consumed.
    fn dispatch(
        &mut self,
        bridge: &IpcBridge,
        ipc_ready: bool,
        transport_ready: bool,
    ) -> Result<(), SessionEnd> {
        if ipc_ready {
            self.service_client(bridge);
        }
        if transport_ready {
            self.driver
                .read_report()
                .map_err(|e| SessionEnd::TransportLost(e.to_string()))?;
        }
        Ok(())
    }

    fn service_client(&mut self, bridge: &IpcBridge) {
        let stream = match bridge.accept_one() {
            Ok(Some(stream)) => stream,
            Ok(None) => return,
            Err(e) => {
                self.emit(DaemonEvent::ClientFailed {
                    message: e.to_string(),
                });
                return;
            }
        };

        let controls = self.driver.current_controls();
        let sequence = controls.sequence;
        match bridge.serve(stream, controls) {
            Ok(Served::Replied { command }) => {
                self.emit(DaemonEvent::ClientServed {
                    sequence,
                    command: command.is_some(),
                });
                if let Some(command) = command {
                    if let Err(e) = self.driver.apply_output(&command) {
                        warn!(error = %e, "Failed to apply output command");
                    }
                }
            }
            Ok(Served::Dropped { received }) => {
                self.emit(DaemonEvent::ClientDropped { received });
            }
            Err(e) => self.emit(DaemonEvent::ClientFailed {
                message: e.to_string(),
            }),
        }
    }
}

fn is_ready(fd: &PollFd<'_>, flags: PollFlags) -> bool {
    fd.revents().is_some_and(|revents| revents.intersects(flags))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::driver::{DriverCall, DriverError, ScriptedDriver};
    use crate::events::NullObserver;
    use crate::ipc::IpcClient;
    use crate::protocol::{IpcMessage, OutputCommand};
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;
    use std::path::Path;
    use std::sync::Mutex;
    use std::thread;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<DaemonEvent>>,
    }

    impl RecordingObserver {
        fn events(&self) -> Vec<DaemonEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl DaemonObserver for RecordingObserver {
        fn on_event(&self, event: &DaemonEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    fn ipc_config(dir: &Path) -> IpcConfig {
        IpcConfig {
            socket_path: dir.join("controller.ipc"),
            backlog: 4,
            client_timeout_ms: 200,
        }
    }

    fn session_config(poll_timeout_ms: u16) -> SessionConfig {
        SessionConfig {
            poll_timeout_ms,
            scan_retry: RetryPolicy::Immediate,
        }
    }

    fn orchestrator(
        driver: ScriptedDriver,
        dir: &Path,
        shutdown: ShutdownToken,
    ) -> (Orchestrator<ScriptedDriver, RecordingObserver>, Arc<RecordingObserver>) {
        let observer = Arc::new(RecordingObserver::default());
        let orch = Orchestrator::with_observer(
            driver,
            ipc_config(dir),
            session_config(100),
            shutdown,
            Arc::clone(&observer),
        );
        (orch, observer)
    }

    #[test]
    fn test_scans_until_found_then_connects_once() {
        let dir = tempfile::tempdir().unwrap();
        let driver = ScriptedDriver::new()
            .unwrap()
            .scan_results([
                Ok(ScanOutcome::NotFound),
                Ok(ScanOutcome::NotFound),
                Ok(ScanOutcome::NotFound),
                Ok(ScanOutcome::Found(1)),
            ])
            .connect_results([Ok(ConnectOutcome::Established)]);
        let handle = driver.handle();
        let (mut orch, _) = orchestrator(driver, dir.path(), ShutdownToken::new());

        let mut state = SessionState::Scanning;
        let mut visited = Vec::new();
        while state == SessionState::Scanning {
            state = orch.step(state).unwrap();
            visited.push(state);
        }
        assert_eq!(
            visited,
            vec![
                SessionState::Scanning,
                SessionState::Scanning,
                SessionState::Scanning,
                SessionState::Connecting
            ]
        );
        assert_eq!(orch.step(state).unwrap(), SessionState::Active);
        assert_eq!(
            handle.calls(),
            vec![
                DriverCall::Scan,
                DriverCall::Scan,
                DriverCall::Scan,
                DriverCall::Scan,
                DriverCall::Connect
            ]
        );
    }

    #[test]
    fn test_lost_connection_disconnects_once_before_rescanning() {
        let dir = tempfile::tempdir().unwrap();
        let driver = ScriptedDriver::new()
            .unwrap()
            .connect_results([Ok(ConnectOutcome::Lost)]);
        let handle = driver.handle();
        let (mut orch, observer) = orchestrator(driver, dir.path(), ShutdownToken::new());

        let state = orch.step(SessionState::Connecting).unwrap();
        assert_eq!(state, SessionState::Disconnecting);
        assert_eq!(orch.step(state).unwrap(), SessionState::Scanning);

        assert_eq!(handle.calls(), vec![DriverCall::Connect, DriverCall::Disconnect]);
        assert_eq!(handle.count(DriverCall::Disconnect), 1);
        assert!(observer.events().contains(&DaemonEvent::ConnectionLost));
    }

    #[test]
    fn test_connect_error_rescans_without_disconnect() {
        let dir = tempfile::tempdir().unwrap();
        let driver = ScriptedDriver::new()
            .unwrap()
            .connect_results([Err(DriverError::Failed("page timeout".into()))]);
        let handle = driver.handle();
        let (mut orch, observer) = orchestrator(driver, dir.path(), ShutdownToken::new());

        assert_eq!(
            orch.step(SessionState::Connecting).unwrap(),
            SessionState::Scanning
        );
        assert_eq!(handle.count(DriverCall::Disconnect), 0);
        assert!(matches!(
            observer.events().as_slice(),
            [DaemonEvent::ConnectFailed { .. }]
        ));
    }

    #[test]
    fn test_scan_error_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let driver = ScriptedDriver::new()
            .unwrap()
            .scan_results([Err(DriverError::Failed("adapter down".into()))]);
        let (mut orch, observer) = orchestrator(driver, dir.path(), ShutdownToken::new());

        assert_eq!(
            orch.step(SessionState::Scanning).unwrap(),
            SessionState::Scanning
        );
        assert_eq!(
            observer.events(),
            vec![DaemonEvent::ScanFailed {
                message: "Driver failure: adapter down".into()
            }]
        );
    }

    #[test]
    fn test_fixed_retry_sleeps_only_after_misses() {
        let dir = tempfile::tempdir().unwrap();
        let driver = ScriptedDriver::new().unwrap().scan_results([
            Ok(ScanOutcome::NotFound),
            Err(DriverError::Failed("adapter down".into())),
            Ok(ScanOutcome::Found(1)),
        ]);
        let mut orch = Orchestrator::with_observer(
            driver,
            ipc_config(dir.path()),
            SessionConfig {
                poll_timeout_ms: 100,
                scan_retry: RetryPolicy::Fixed { delay_ms: 80 },
            },
            ShutdownToken::new(),
            Arc::new(NullObserver),
        );

        for misses in 1..=2 {
            let start = Instant::now();
            assert_eq!(
                orch.step(SessionState::Scanning).unwrap(),
                SessionState::Scanning
            );
            assert!(start.elapsed() >= Duration::from_millis(80));
            assert_eq!(orch.scan_misses, misses);
        }

        assert_eq!(
            orch.step(SessionState::Scanning).unwrap(),
            SessionState::Connecting
        );
        assert_eq!(orch.scan_misses, 0);
    }

    #[test]
    fn test_exponential_retry_restarts_after_find() {
        let dir = tempfile::tempdir().unwrap();
        let driver = ScriptedDriver::new().unwrap().scan_results([
            Ok(ScanOutcome::NotFound),
            Ok(ScanOutcome::NotFound),
            Ok(ScanOutcome::Found(1)),
            Ok(ScanOutcome::NotFound),
        ]);
        let mut orch = Orchestrator::with_observer(
            driver,
            ipc_config(dir.path()),
            SessionConfig {
                poll_timeout_ms: 100,
                scan_retry: RetryPolicy::Exponential {
                    initial_ms: 40,
                    max_ms: 1000,
                },
            },
            ShutdownToken::new(),
            Arc::new(NullObserver),
        );

        // 40ms then 80ms.
        let start = Instant::now();
        orch.step(SessionState::Scanning).unwrap();
        orch.step(SessionState::Scanning).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(120));
        assert_eq!(orch.scan_misses, 2);

        assert_eq!(
            orch.step(SessionState::Scanning).unwrap(),
            SessionState::Connecting
        );

        // Back to the initial delay rather than 160ms.
        let start = Instant::now();
        orch.step(SessionState::Scanning).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(40));
        assert_eq!(orch.scan_misses, 1);
        assert_eq!(orch.session.scan_retry.delay(orch.scan_misses), Duration::from_millis(40));
    }

    #[test]
    fn test_shutdown_stops_scanning() {
        let dir = tempfile::tempdir().unwrap();
        let token = ShutdownToken::new();
        let driver = ScriptedDriver::new().unwrap();
        let handle = driver.handle();
        let (mut orch, _) = orchestrator(driver, dir.path(), token.clone());

        token.cancel();
        assert_eq!(
            orch.step(SessionState::Scanning).unwrap(),
            SessionState::Stopped
        );
        assert!(handle.calls().is_empty());
    }

    #[test]
    fn test_active_session_exits_within_one_wait_after_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let token = ShutdownToken::new();
        let mut driver = ScriptedDriver::new()
            .unwrap()
            .connect_results([Ok(ConnectOutcome::Established)]);
        driver.connect().unwrap();
        let (mut orch, observer) = orchestrator(driver, dir.path(), token.clone());

        let canceller = token.clone();
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            canceller.cancel();
        });

        let start = Instant::now();
        let next = orch.step(SessionState::Active).unwrap();
        let elapsed = start.elapsed();
        worker.join().unwrap();

        assert_eq!(next, SessionState::Disconnecting);
        // 30ms until cancel, then at most one 100ms wait.
        assert!(elapsed < Duration::from_millis(1000), "took {:?}", elapsed);
        assert!(observer.events().contains(&DaemonEvent::SessionEnded {
            reason: SessionEnd::Shutdown
        }));
        assert_eq!(orch.step(next).unwrap(), SessionState::Stopped);
    }

    #[test]
    fn test_client_served_before_pending_report() {
        let dir = tempfile::tempdir().unwrap();
        let mut driver = ScriptedDriver::new()
            .unwrap()
            .connect_results([Ok(ConnectOutcome::Established)]);
        driver.connect().unwrap();
        let handle = driver.handle();
        let (mut orch, _) = orchestrator(driver, dir.path(), ShutdownToken::new());
        let bridge = IpcBridge::bind(&ipc_config(dir.path())).unwrap();

        // Both descriptors become ready before the wait.
        handle.push_report(&[0x11, 0x01]).unwrap();
        let mut client = UnixStream::connect(bridge.path()).unwrap();
        client
            .write_all(&IpcMessage::request(None).to_bytes())
            .unwrap();

        let (ipc_ready, transport_ready) = orch.wait_ready(&bridge).unwrap();
        assert!(ipc_ready);
        assert!(transport_ready);
        orch.dispatch(&bridge, ipc_ready, transport_ready).unwrap();

        let mut buf = [0u8; IpcMessage::SIZE];
        client.read_exact(&mut buf).unwrap();
        let reply = IpcMessage::from_bytes(&buf).unwrap();
        assert_eq!(reply.controls.sequence, 0);
        assert_eq!(orch.driver.current_controls().sequence, 1);
        assert_eq!(
            handle.calls(),
            vec![DriverCall::Connect, DriverCall::ReadReport]
        );
    }

    #[test]
    fn test_read_failure_ends_session_and_rescans() {
        let dir = tempfile::tempdir().unwrap();
        let token = ShutdownToken::new();
        let driver = ScriptedDriver::new()
            .unwrap()
            .scan_results([Ok(ScanOutcome::Found(1))])
            .connect_results([Ok(ConnectOutcome::Established)])
            .fail_reads_after(0)
            .cancel_when_exhausted(token.clone());
        let handle = driver.handle();
        handle.push_report(&[0x11, 0x00]).unwrap();
        let (mut orch, observer) = orchestrator(driver, dir.path(), token);

        orch.run().unwrap();

        assert_eq!(
            handle.calls(),
            vec![
                DriverCall::Scan,
                DriverCall::Connect,
                DriverCall::ReadReport,
                DriverCall::Disconnect,
                DriverCall::Scan
            ]
        );
        let events = observer.events();
        assert!(events.contains(&DaemonEvent::SessionEnded {
            reason: SessionEnd::TransportLost("Controller disconnected".into())
        }));
        assert!(events.contains(&DaemonEvent::StateChanged {
            from: SessionState::Scanning,
            to: SessionState::Stopped
        }));
        // Socket is torn down with the session.
        assert!(!dir.path().join("controller.ipc").exists());
    }

    #[test]
    fn test_ipc_setup_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut driver = ScriptedDriver::new()
            .unwrap()
            .connect_results([Ok(ConnectOutcome::Established)]);
        driver.connect().unwrap();
        let handle = driver.handle();
        let mut orch = Orchestrator::with_observer(
            driver,
            IpcConfig {
                socket_path: dir.path().join("missing").join("controller.ipc"),
                ..ipc_config(dir.path())
            },
            session_config(100),
            ShutdownToken::new(),
            Arc::new(NullObserver),
        );

        assert!(orch.step(SessionState::Active).is_err());
        assert_eq!(handle.count(DriverCall::Disconnect), 1);
    }

    #[test]
    fn test_clients_receive_latest_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let token = ShutdownToken::new();
        let driver = ScriptedDriver::new()
            .unwrap()
            .scan_results([Ok(ScanOutcome::Found(1))])
            .connect_results([Ok(ConnectOutcome::Established)]);
        let handle = driver.handle();
        handle.push_report(&[0x11, 0xC0, 0x7F]).unwrap();

        let observer = Arc::new(RecordingObserver::default());
        let mut orch = Orchestrator::with_observer(
            driver,
            ipc_config(dir.path()),
            session_config(50),
            token.clone(),
            observer,
        );
        let daemon = thread::spawn(move || orch.run());

        let client =
            IpcClient::new(dir.path().join("controller.ipc")).with_timeout(Duration::from_secs(1));
        let command = OutputCommand {
            green: 0x80,
            ..Default::default()
        };
        let deadline = Instant::now() + Duration::from_secs(5);
        let reply = loop {
            assert!(Instant::now() < deadline, "daemon never served a fresh snapshot");
            if let Ok(reply) = client.query(Some(command)) {
                if reply.controls.sequence == 1 {
                    break reply;
                }
            }
            thread::sleep(Duration::from_millis(10));
        };
        assert_eq!(&reply.controls.report[..3], &[0x11, 0xC0, 0x7F]);

        while handle.outputs().is_empty() {
            assert!(Instant::now() < deadline, "output command never applied");
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(handle.outputs()[0], command);

        token.cancel();
        daemon.join().unwrap().unwrap();
        assert_eq!(handle.count(DriverCall::Disconnect), 1);
    }
}
