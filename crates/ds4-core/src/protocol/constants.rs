pub const SONY_VENDOR_ID: u16 = 0x054C;
pub const DS4_PRODUCT_ID: u16 = 0x05C4;
pub const DS4_V2_PRODUCT_ID: u16 = 0x09CC;

/// Product ids accepted by default.
pub const SUPPORTED_PIDS: &[u16] = &[DS4_PRODUCT_ID, DS4_V2_PRODUCT_ID];

// HID class requests
pub const HID_GET_REPORT: u8 = 0x01;
pub const HID_SET_REPORT: u8 = 0x09;
pub const HID_REPORT_TYPE_FEATURE: u16 = 0x03;
pub const USB_CLASS_HID: u8 = 0x03;

// Pairing feature reports
pub const REPORT_ID_GET_PAIRING: u8 = 0x12;
pub const REPORT_ID_SET_PAIRING: u8 = 0x13;
pub const GET_PAIRING_REPORT_LEN: usize = 16;
pub const SET_PAIRING_REPORT_LEN: usize = 23;

pub const BD_ADDR_LEN: usize = 6;
pub const LINK_KEY_LEN: usize = 16;

pub const CONTROL_TRANSFER_TIMEOUT_MS: u64 = 5000;

/// Bus type reported by the HID core for Bluetooth devices.
pub const BUS_BLUETOOTH: u16 = 0x0005;

/// Largest input report relayed to IPC clients (Bluetooth full report).
pub const INPUT_REPORT_LEN: usize = 78;

/// `wValue` for a feature-report control transfer.
pub const fn feature_report_value(report_id: u8) -> u16 {
    (HID_REPORT_TYPE_FEATURE << 8) | report_id as u16
}
