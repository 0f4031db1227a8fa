//! Pairing feature report codec.
//!
//! The controller exposes its pairing state through two vendor feature
//! reports. Addresses and keys travel least-significant octet first, so
//! every field is byte-reversed relative to its display order.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::constants::{
    BD_ADDR_LEN, GET_PAIRING_REPORT_LEN, LINK_KEY_LEN, REPORT_ID_SET_PAIRING,
    SET_PAIRING_REPORT_LEN,
};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("Invalid length for {what}: expected {expected}, got {actual}")]
    InvalidLength {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Malformed Bluetooth address: {0:?}")]
    MalformedAddress(String),

    #[error("Malformed link key: {0:?}")]
    MalformedLinkKey(String),

    #[error("Unexpected report id: expected 0x{expected:02X}, got 0x{actual:02X}")]
    UnexpectedReportId { expected: u8, actual: u8 },
}

/// Bluetooth device address in display order (most-significant octet first).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BdAddr(pub [u8; BD_ADDR_LEN]);

impl BdAddr {
    pub const fn new(octets: [u8; BD_ADDR_LEN]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> &[u8; BD_ADDR_LEN] {
        &self.0
    }

    /// Build from wire order (least-significant octet first).
    pub fn from_wire(wire: &[u8]) -> Result<Self, CodecError> {
        let mut octets: [u8; BD_ADDR_LEN] =
            wire.try_into().map_err(|_| CodecError::InvalidLength {
                what: "Bluetooth address",
                expected: BD_ADDR_LEN,
                actual: wire.len(),
            })?;
        octets.reverse();
        Ok(Self(octets))
    }

    /// Octets in wire order.
    pub fn to_wire(&self) -> [u8; BD_ADDR_LEN] {
        let mut wire = self.0;
        wire.reverse();
        wire
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            a, b, c, d, e, g
        )
    }
}

impl fmt::Debug for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BdAddr({})", self)
    }
}

impl FromStr for BdAddr {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || CodecError::MalformedAddress(s.to_string());
        let mut octets = [0u8; BD_ADDR_LEN];
        let mut parts = s.trim().split(':');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(malformed)?;
            let is_hex = part.bytes().all(|b| b.is_ascii_hexdigit());
            if part.is_empty() || part.len() > 2 || !is_hex {
                return Err(malformed());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| malformed())?;
        }
        if parts.next().is_some() {
            return Err(malformed());
        }
        Ok(Self(octets))
    }
}

impl TryFrom<String> for BdAddr {
    type Error = CodecError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BdAddr> for String {
    fn from(addr: BdAddr) -> Self {
        addr.to_string()
    }
}

/// 128-bit link key shared between host and controller.
#[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LinkKey(pub [u8; LINK_KEY_LEN]);

impl LinkKey {
    pub const fn new(bytes: [u8; LINK_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; LINK_KEY_LEN] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CodecError> {
        let key = bytes.try_into().map_err(|_| CodecError::InvalidLength {
            what: "link key",
            expected: LINK_KEY_LEN,
            actual: bytes.len(),
        })?;
        Ok(Self(key))
    }
}

impl fmt::Display for LinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

// Keep the secret out of logs.
impl fmt::Debug for LinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LinkKey(..)")
    }
}

impl FromStr for LinkKey {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || CodecError::MalformedLinkKey(format!("{} chars", s.len()));
        let hex: String = s.trim().chars().filter(|c| *c != ':').collect();
        if hex.len() != LINK_KEY_LEN * 2 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(malformed());
        }
        let mut key = [0u8; LINK_KEY_LEN];
        for (i, byte) in key.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).map_err(|_| malformed())?;
        }
        Ok(Self(key))
    }
}

impl TryFrom<String> for LinkKey {
    type Error = CodecError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LinkKey> for String {
    fn from(key: LinkKey) -> Self {
        key.to_string()
    }
}

/// Pairing state read back from the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingInfo {
    /// The controller's own Bluetooth address.
    pub device_addr: BdAddr,
    /// Host address the controller will reconnect to.
    pub stored_host_addr: BdAddr,
}

/// Host address plus shared secret written to the controller when pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostIdentity {
    pub address: BdAddr,
    pub link_key: LinkKey,
}

/// Build the 23-byte SET report (id 0x13) carrying a host address and link key.
pub fn encode_set_report(host_addr: &BdAddr, link_key: &LinkKey) -> [u8; SET_PAIRING_REPORT_LEN] {
    let mut msg = [0u8; SET_PAIRING_REPORT_LEN];
    msg[0] = REPORT_ID_SET_PAIRING;
    msg[1..7].copy_from_slice(&host_addr.to_wire());
    for (i, &b) in link_key.0.iter().enumerate() {
        msg[7 + (LINK_KEY_LEN - 1 - i)] = b;
    }
    msg
}

/// Inverse of [`encode_set_report`].
pub fn decode_set_report(raw: &[u8]) -> Result<(BdAddr, LinkKey), CodecError> {
    if raw.len() != SET_PAIRING_REPORT_LEN {
        return Err(CodecError::InvalidLength {
            what: "SET pairing report",
            expected: SET_PAIRING_REPORT_LEN,
            actual: raw.len(),
        });
    }
    if raw[0] != REPORT_ID_SET_PAIRING {
        return Err(CodecError::UnexpectedReportId {
            expected: REPORT_ID_SET_PAIRING,
            actual: raw[0],
        });
    }
    let addr = BdAddr::from_wire(&raw[1..7])?;
    let mut key = [0u8; LINK_KEY_LEN];
    key.copy_from_slice(&raw[7..SET_PAIRING_REPORT_LEN]);
    key.reverse();
    Ok((addr, LinkKey(key)))
}

/// Parse the 16-byte GET report (id 0x12).
///
/// Bytes 1..=6 hold the controller address and bytes 10..=15 the stored
/// host address, both in wire order. The report id byte is not checked;
/// some firmware revisions leave it zeroed.
pub fn decode_get_report(raw: &[u8]) -> Result<PairingInfo, CodecError> {
    if raw.len() != GET_PAIRING_REPORT_LEN {
        return Err(CodecError::InvalidLength {
            what: "GET pairing report",
            expected: GET_PAIRING_REPORT_LEN,
            actual: raw.len(),
        });
    }
    Ok(PairingInfo {
        device_addr: BdAddr::from_wire(&raw[1..7])?,
        stored_host_addr: BdAddr::from_wire(&raw[10..16])?,
    })
}
