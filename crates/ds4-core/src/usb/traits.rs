//! Control-transfer channel abstraction.
//!
//! Defines the `FeatureReportChannel` trait used by the pairing session,
//! allowing different implementations (nusb, mock, etc.), and
//! `ClaimedChannel` for channels that must be released after use.

use thiserror::Error;

use crate::protocol::CodecError;

#[derive(Error, Debug)]
pub enum PairingError {
    #[error("No controller found: VID={vid:04X}")]
    DeviceNotFound { vid: u16 },

    #[error("Controller busy or unavailable: {0}")]
    DeviceBusyOrUnavailable(String),

    #[error("Feature report 0x{report:02X} transferred {actual} bytes, expected {expected}")]
    Transfer {
        report: u8,
        expected: usize,
        actual: usize,
    },

    #[error("USB transfer failed: {0}")]
    Usb(String),

    #[error("Pairing was not persisted: controller reports host {actual}, expected {expected}")]
    VerifyFailed { expected: String, actual: String },

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// HID feature-report access on a claimed interface.
pub trait FeatureReportChannel {
    /// GET_REPORT for `report_id`, returning whatever the device sent back.
    fn get_feature_report(&self, report_id: u8, length: usize) -> Result<Vec<u8>, PairingError>;

    /// SET_REPORT with `data` (report id included), returning bytes written.
    fn set_feature_report(&self, report_id: u8, data: &[u8]) -> Result<usize, PairingError>;
}

/// A channel holding an exclusive claim on the controller.
pub trait ClaimedChannel: FeatureReportChannel {
    /// Give the interface back to the system. Consumes the claim.
    fn release(self);
}
