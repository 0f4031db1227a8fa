//! Transport driver module.

pub mod hidraw;
pub mod mock;
pub mod traits;

pub use hidraw::HidrawDriver;
pub use mock::{DriverCall, ScriptHandle, ScriptedDriver};
pub use traits::{ConnectOutcome, ControllerDriver, DriverError, ScanOutcome};
