//! Mock feature-report channel for testing.

use std::sync::{Arc, Mutex};

use super::traits::{ClaimedChannel, FeatureReportChannel, PairingError};
use crate::protocol::constants::{GET_PAIRING_REPORT_LEN, REPORT_ID_GET_PAIRING};
use crate::protocol::{BdAddr, LinkKey, decode_set_report};

#[derive(Debug, Default)]
struct MockDevice {
    device_addr: BdAddr,
    stored_host: BdAddr,
    stored_key: Option<LinkKey>,
    get_truncate: Option<usize>,
    set_truncate: Option<usize>,
    ignore_writes: bool,
    releases: usize,
}

/// Emulates a controller that persists SET pairing reports and echoes the
/// stored host back through GET.
#[derive(Clone, Default)]
pub struct MockPairingChannel {
    device: Arc<Mutex<MockDevice>>,
    /// Captured SET payloads.
    write_log: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MockPairingChannel {
    pub fn new(device_addr: BdAddr, stored_host: BdAddr) -> Self {
        let mock = Self::default();
        {
            let mut dev = mock.device.lock().unwrap();
            dev.device_addr = device_addr;
            dev.stored_host = stored_host;
        }
        mock
    }

    /// Return only `len` bytes from subsequent GET transfers.
    pub fn truncate_get_reports(&self, len: usize) {
        self.device.lock().unwrap().get_truncate = Some(len);
    }

    /// Report only `len` bytes written for subsequent SET transfers.
    pub fn truncate_set_reports(&self, len: usize) {
        self.device.lock().unwrap().set_truncate = Some(len);
    }

    /// Accept SET transfers without updating the stored host.
    pub fn ignore_writes(&self) {
        self.device.lock().unwrap().ignore_writes = true;
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        self.write_log.lock().unwrap().clone()
    }

    pub fn stored_key(&self) -> Option<LinkKey> {
        self.device.lock().unwrap().stored_key
    }

    /// Number of times a clone of this channel was released.
    pub fn release_count(&self) -> usize {
        self.device.lock().unwrap().releases
    }
}

impl FeatureReportChannel for MockPairingChannel {
    fn get_feature_report(&self, report_id: u8, length: usize) -> Result<Vec<u8>, PairingError> {
        if report_id != REPORT_ID_GET_PAIRING {
            return Err(PairingError::Usb(format!("unsupported report 0x{:02X}", report_id)));
        }
        let dev = self.device.lock().unwrap();
        let mut report = vec![0u8; GET_PAIRING_REPORT_LEN];
        report[0] = REPORT_ID_GET_PAIRING;
        report[1..7].copy_from_slice(&dev.device_addr.to_wire());
        report[10..16].copy_from_slice(&dev.stored_host.to_wire());
        report.truncate(dev.get_truncate.unwrap_or(length).min(length));
        Ok(report)
    }

    fn set_feature_report(&self, _report_id: u8, data: &[u8]) -> Result<usize, PairingError> {
        self.write_log.lock().unwrap().push(data.to_vec());
        let mut dev = self.device.lock().unwrap();
        if let Some(len) = dev.set_truncate {
            return Ok(len);
        }
        if !dev.ignore_writes {
            let (host, key) = decode_set_report(data)?;
            dev.stored_host = host;
            dev.stored_key = Some(key);
        }
        Ok(data.len())
    }
}

impl ClaimedChannel for MockPairingChannel {
    fn release(self) {
        self.device.lock().unwrap().releases += 1;
    }
}
