//! hidraw-backed driver for a controller connected over Bluetooth.
//!
//! Once the controller has been paired and the host's Bluetooth stack has
//! accepted its connection, the kernel HID core exposes it as a hidraw node.
//! Discovery walks `/sys/class/hidraw/*/device/uevent` looking for a
//! matching `HID_ID`, and the live session is the opened `/dev/hidrawN`.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nix::fcntl::OFlag;
use tracing::{debug, info, instrument};

use super::traits::{ConnectOutcome, ControllerDriver, DriverError, ScanOutcome};
use crate::protocol::ControlState;
use crate::protocol::constants::BUS_BLUETOOTH;

const SYSFS_HIDRAW: &str = "/sys/class/hidraw";
const DEV_ROOT: &str = "/dev";
const READ_BUF_LEN: usize = 128;

/// Parsed `HID_ID=bbbb:vvvvvvvv:pppppppp` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HidId {
    bus: u16,
    vendor: u16,
    product: u16,
}

fn parse_hid_id(uevent: &str) -> Option<HidId> {
    let value = uevent
        .lines()
        .find_map(|line| line.strip_prefix("HID_ID="))?;
    let mut parts = value.trim().split(':');
    let bus = u32::from_str_radix(parts.next()?, 16).ok()?;
    let vendor = u32::from_str_radix(parts.next()?, 16).ok()?;
    let product = u32::from_str_radix(parts.next()?, 16).ok()?;
    Some(HidId {
        bus: u16::try_from(bus).ok()?,
        vendor: u16::try_from(vendor).ok()?,
        product: u16::try_from(product).ok()?,
    })
}

pub struct HidrawDriver {
    vid: u16,
    pids: Vec<u16>,
    sysfs_root: PathBuf,
    dev_root: PathBuf,
    candidate: Option<String>,
    file: Option<File>,
    controls: ControlState,
}

impl HidrawDriver {
    pub fn new(vid: u16, pids: &[u16]) -> Self {
        Self::with_roots(vid, pids, SYSFS_HIDRAW, DEV_ROOT)
    }

    /// Use alternative sysfs and device directories.
    pub fn with_roots(
        vid: u16,
        pids: &[u16],
        sysfs_root: impl AsRef<Path>,
        dev_root: impl AsRef<Path>,
    ) -> Self {
        Self {
            vid,
            pids: pids.to_vec(),
            sysfs_root: sysfs_root.as_ref().to_path_buf(),
            dev_root: dev_root.as_ref().to_path_buf(),
            candidate: None,
            file: None,
            controls: ControlState::default(),
        }
    }

    fn matches(&self, id: &HidId) -> bool {
        id.bus == BUS_BLUETOOTH && id.vendor == self.vid && self.pids.contains(&id.product)
    }

    fn matching_nodes(&self) -> Result<Vec<String>, DriverError> {
        let mut nodes = Vec::new();
        for entry in fs::read_dir(&self.sysfs_root)? {
            let entry = entry?;
            let uevent = match fs::read_to_string(entry.path().join("device").join("uevent")) {
                Ok(s) => s,
                // Node vanished mid-scan.
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if parse_hid_id(&uevent).is_some_and(|id| self.matches(&id)) {
                nodes.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        nodes.sort();
        Ok(nodes)
    }
}

impl ControllerDriver for HidrawDriver {
    fn scan(&mut self) -> Result<ScanOutcome, DriverError> {
        let nodes = self.matching_nodes()?;
        self.candidate = nodes.first().cloned();
        if nodes.is_empty() {
            Ok(ScanOutcome::NotFound)
        } else {
            debug!(nodes = ?nodes, "Found hidraw controller nodes");
            Ok(ScanOutcome::Found(nodes.len()))
        }
    }

    #[instrument(level = "info", skip(self), fields(node = ?self.candidate))]
    fn connect(&mut self) -> Result<ConnectOutcome, DriverError> {
        if self.file.is_some() {
            return Ok(ConnectOutcome::Established);
        }
        let Some(node) = self.candidate.clone() else {
            return Ok(ConnectOutcome::Lost);
        };

        let path = self.dev_root.join(&node);
        let file = match OpenOptions::new()
            .read(true)
            .custom_flags(OFlag::O_NONBLOCK.bits())
            .open(&path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ConnectOutcome::Lost),
            Err(e) => return Err(e.into()),
        };

        info!(path = %path.display(), "Opened controller node");
        self.file = Some(file);
        self.controls = ControlState::default();
        Ok(ConnectOutcome::Established)
    }

    fn transport_handle(&self) -> Result<BorrowedFd<'_>, DriverError> {
        self.file
            .as_ref()
            .map(|f| f.as_fd())
            .ok_or(DriverError::NotConnected)
    }

    fn read_report(&mut self) -> Result<(), DriverError> {
        let file = self.file.as_mut().ok_or(DriverError::NotConnected)?;
        let mut buf = [0u8; READ_BUF_LEN];
        match file.read(&mut buf) {
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
        if self.file.take().is_some() {
            debug!("Closed controller node");
        }
        self.candidate = None;
    }

    fn current_controls(&self) -> &ControlState {
        &self.controls
    }
}
