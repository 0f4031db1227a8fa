//! Fixed-size IPC envelope shared by requests and responses.
//!
//! Layout (little-endian):
//!
//! | offset | size | field                          |
//! |--------|------|--------------------------------|
//! | 0      | 1    | command-present flag           |
//! | 1      | 7    | [`OutputCommand`]              |
//! | 8      | 4    | report sequence number         |
//! | 12     | 78   | latest raw input report        |

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

use super::constants::INPUT_REPORT_LEN;
use super::pairing::CodecError;

/// Outbound command a client may attach to a request (LED colour, rumble).
///
/// The daemon forwards it to the transport driver's output hook; the core
/// assigns no meaning to the individual fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputCommand {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub rumble_light: u8,
    pub rumble_heavy: u8,
    pub flash_on: u8,
    pub flash_off: u8,
}

impl OutputCommand {
    pub const SIZE: usize = 7;
}

/// Snapshot of the controller as last reported by the transport driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlState {
    /// Number of reports read since the session started.
    pub sequence: u32,
    /// Raw input report, zero-padded.
    pub report: [u8; INPUT_REPORT_LEN],
}

impl ControlState {
    pub const SIZE: usize = 4 + INPUT_REPORT_LEN;

    /// Copy in a freshly read report, truncating anything past the relay size.
    pub fn update(&mut self, report: &[u8]) {
        let n = report.len().min(INPUT_REPORT_LEN);
        self.report = [0; INPUT_REPORT_LEN];
        self.report[..n].copy_from_slice(&report[..n]);
        self.sequence = self.sequence.wrapping_add(1);
    }
}

impl Default for ControlState {
    fn default() -> Self {
        Self {
            sequence: 0,
            report: [0; INPUT_REPORT_LEN],
        }
    }
}

/// One request or response on the IPC socket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpcMessage {
    pub command: Option<OutputCommand>,
    pub controls: ControlState,
}

impl IpcMessage {
    pub const SIZE: usize = 1 + OutputCommand::SIZE + ControlState::SIZE;

    pub fn request(command: Option<OutputCommand>) -> Self {
        Self {
            command,
            controls: ControlState::default(),
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let mut cursor = Cursor::new(&mut buf[..]);
        // Writes into a fixed buffer of exactly SIZE bytes cannot fail.
        let _ = self.write_into(&mut cursor);
        buf
    }

    fn write_into<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        let cmd = self.command.unwrap_or_default();
        w.write_u8(u8::from(self.command.is_some()))?;
        w.write_all(&[
            cmd.red,
            cmd.green,
            cmd.blue,
            cmd.rumble_light,
            cmd.rumble_heavy,
            cmd.flash_on,
            cmd.flash_off,
        ])?;
        w.write_u32::<LittleEndian>(self.controls.sequence)?;
        w.write_all(&self.controls.report)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() != Self::SIZE {
            return Err(CodecError::InvalidLength {
                what: "IPC message",
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        let mut cursor = Cursor::new(data);
        Self::read_from(&mut cursor).map_err(|_| CodecError::InvalidLength {
            what: "IPC message",
            expected: Self::SIZE,
            actual: data.len(),
        })
    }

    fn read_from<R: Read>(r: &mut R) -> std::io::Result<Self> {
        let send_data = r.read_u8()? != 0;
        let mut cmd = [0u8; OutputCommand::SIZE];
        r.read_exact(&mut cmd)?;
        let sequence = r.read_u32::<LittleEndian>()?;
        let mut report = [0u8; INPUT_REPORT_LEN];
        r.read_exact(&mut report)?;

        let command = send_data.then_some(OutputCommand {
            red: cmd[0],
            green: cmd[1],
            blue: cmd[2],
            rumble_light: cmd[3],
            rumble_heavy: cmd[4],
            flash_on: cmd[5],
            flash_off: cmd[6],
        });
        Ok(Self {
            command,
            controls: ControlState { sequence, report },
        })
    }
}
