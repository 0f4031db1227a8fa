//! nusb-based access to a USB-attached controller.

use std::time::Duration;

use nusb::transfer::{ControlIn, ControlOut, ControlType, Recipient};
use nusb::{Device, DeviceInfo, Interface, MaybeFuture, list_devices};
use tracing::{debug, info, instrument, warn};

use super::traits::{ClaimedChannel, FeatureReportChannel, PairingError};
use crate::protocol::constants::{
    CONTROL_TRANSFER_TIMEOUT_MS, HID_GET_REPORT, HID_SET_REPORT, USB_CLASS_HID,
    feature_report_value,
};

/// List attached devices matching `vid` and any of `pids`.
///
/// Enumeration failures are logged and reported as "nothing found".
#[instrument(level = "debug", fields(vid = format!("{:04X}", vid)))]
pub fn discover(vid: u16, pids: &[u16]) -> Vec<DeviceInfo> {
    let devices = match list_devices().wait() {
        Ok(devices) => devices,
        Err(e) => {
            warn!(error = %e, "USB enumeration failed");
            return Vec::new();
        }
    };

    let found: Vec<DeviceInfo> = devices
        .filter(|d| d.vendor_id() == vid && pids.contains(&d.product_id()))
        .collect();
    debug!(count = found.len(), "USB discovery complete");
    found
}

/// A controller whose HID interface is claimed by this process.
///
/// The interface is released and the kernel driver re-attached exactly
/// once, either through [`ClaimedChannel::release`] or on drop.
pub struct ClaimedController {
    device: Device,
    interface: Option<Interface>,
    interface_number: u8,
    detached: bool,
}

impl ClaimedController {
    /// Open `info`, detach the kernel HID driver and claim the interface.
    #[instrument(level = "info", skip(info), fields(
        vid = format!("{:04X}", info.vendor_id()),
        pid = format!("{:04X}", info.product_id())
    ))]
    pub fn claim(info: &DeviceInfo) -> Result<Self, PairingError> {
        let device = info
            .open()
            .wait()
            .map_err(|e| PairingError::DeviceBusyOrUnavailable(format!("open: {}", e)))?;

        let interface_number = find_hid_interface(&device).unwrap_or(0);
        let detached = detach_kernel_driver(&device, interface_number);

        let interface = match device.claim_interface(interface_number).wait() {
            Ok(interface) => interface,
            Err(e) => {
                if detached {
                    reattach_kernel_driver(&device, interface_number);
                }
                // `device` drops here, closing the handle.
                return Err(PairingError::DeviceBusyOrUnavailable(format!(
                    "claim interface {}: {}",
                    interface_number, e
                )));
            }
        };

        info!(interface = interface_number, "Controller interface claimed");
        Ok(Self {
            device,
            interface: Some(interface),
            interface_number,
            detached,
        })
    }

    fn release_inner(&mut self) {
        // Dropping the interface releases the claim.
        if self.interface.take().is_none() {
            return;
        }
        if self.detached {
            reattach_kernel_driver(&self.device, self.interface_number);
        }
        debug!(interface = self.interface_number, "Controller interface released");
    }

    fn interface(&self) -> Result<&Interface, PairingError> {
        self.interface
            .as_ref()
            .ok_or_else(|| PairingError::Usb("interface already released".into()))
    }
}

impl ClaimedChannel for ClaimedController {
    /// Release the interface and hand the device back to the kernel driver.
    fn release(mut self) {
        self.release_inner();
    }
}

impl Drop for ClaimedController {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl FeatureReportChannel for ClaimedController {
    #[instrument(level = "debug", skip(self))]
    fn get_feature_report(&self, report_id: u8, length: usize) -> Result<Vec<u8>, PairingError> {
        let length = u16::try_from(length)
            .map_err(|_| PairingError::Usb(format!("report length {} too large", length)))?;
        let data = self
            .interface()?
            .control_in(
                ControlIn {
                    control_type: ControlType::Class,
                    recipient: Recipient::Interface,
                    request: HID_GET_REPORT,
                    value: feature_report_value(report_id),
                    index: u16::from(self.interface_number),
                    length,
                },
                Duration::from_millis(CONTROL_TRANSFER_TIMEOUT_MS),
            )
            .wait()
            .map_err(|e| PairingError::Usb(e.to_string()))?;
        debug!(bytes_read = data.len(), "GET_REPORT complete");
        Ok(data)
    }

    #[instrument(level = "debug", skip(self, data), fields(len = data.len()))]
    fn set_feature_report(&self, report_id: u8, data: &[u8]) -> Result<usize, PairingError> {
        self.interface()?
            .control_out(
                ControlOut {
                    control_type: ControlType::Class,
                    recipient: Recipient::Interface,
                    request: HID_SET_REPORT,
                    value: feature_report_value(report_id),
                    index: u16::from(self.interface_number),
                    data,
                },
                Duration::from_millis(CONTROL_TRANSFER_TIMEOUT_MS),
            )
            .wait()
            .map_err(|e| PairingError::Usb(e.to_string()))?;
        // A completed control OUT transfer has sent its whole data stage.
        debug!(bytes_written = data.len(), "SET_REPORT complete");
        Ok(data.len())
    }
}

fn find_hid_interface(device: &Device) -> Option<u8> {
    for config in device.configurations() {
        for iface in config.interfaces() {
            for alt in iface.alt_settings() {
                if alt.class() == USB_CLASS_HID {
                    return Some(iface.interface_number());
                }
            }
        }
    }
    None
}

#[cfg(target_os = "linux")]
fn detach_kernel_driver(device: &Device, interface: u8) -> bool {
    match device.detach_kernel_driver(interface) {
        Ok(()) => true,
        Err(e) => {
            // Usually means no driver was bound.
            debug!(interface, error = %e, "Kernel driver not detached");
            false
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn detach_kernel_driver(_device: &Device, _interface: u8) -> bool {
    false
}

#[cfg(target_os = "linux")]
fn reattach_kernel_driver(device: &Device, interface: u8) {
    if let Err(e) = device.attach_kernel_driver(interface) {
        warn!(interface, error = %e, "Failed to re-attach kernel driver");
    }
}

#[cfg(not(target_os = "linux"))]
fn reattach_kernel_driver(_device: &Device, _interface: u8) {}
