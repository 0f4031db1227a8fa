//! DS4-Core: DualShock 4 pairing and connection daemon core.
//!
//! This crate provides USB provisioning of a controller's Bluetooth pairing
//! and the poll-driven orchestrator that keeps a live session bridged to
//! local clients.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Pairing feature-report codec, IPC message layout
//! - **USB**: Feature-report channel abstraction (nusb, mock) and pairing session
//! - **Driver**: Controller transport abstraction (hidraw, scripted mock)
//! - **IPC**: Local socket bridge and client
//! - **State**: Session states
//! - **Events**: Observer pattern for logging and tests
//! - **Session**: The connection orchestrator
//!
//! # Example
//!
//! ```no_run
//! use ds4_core::config::DaemonConfig;
//! use ds4_core::driver::HidrawDriver;
//! use ds4_core::session::Orchestrator;
//! use ds4_core::shutdown::ShutdownToken;
//!
//! let config = DaemonConfig::default();
//! let driver = HidrawDriver::new(config.device.vendor_id, &config.device.product_ids);
//! let mut orchestrator =
//!     Orchestrator::new(driver, config.ipc, config.session, ShutdownToken::new());
//! orchestrator.run().expect("IPC setup failed");
//! ```

pub mod config;
pub mod driver;
pub mod events;
pub mod ipc;
pub mod protocol;
pub mod session;
pub mod shutdown;
pub mod state;
pub mod usb;

// Re-exports for convenience
pub use config::{DaemonConfig, RetryPolicy};
pub use driver::{ControllerDriver, DriverError, HidrawDriver, ScriptedDriver};
pub use events::{DaemonEvent, DaemonObserver, NullObserver, TracingObserver};
pub use ipc::{IpcBridge, IpcClient, IpcError};
pub use protocol::{BdAddr, ControlState, HostIdentity, IpcMessage, LinkKey, OutputCommand};
pub use session::Orchestrator;
pub use shutdown::ShutdownToken;
pub use state::SessionState;
pub use usb::{PairingError, PairingSession, ProvisionOutcome};
