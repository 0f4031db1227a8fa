//! Protocol module - wire formats for pairing reports and IPC messages.

pub mod constants;
pub mod message;
pub mod pairing;

pub use constants::*;
pub use message::{ControlState, IpcMessage, OutputCommand};
pub use pairing::{
    BdAddr, CodecError, HostIdentity, LinkKey, PairingInfo, decode_get_report, decode_set_report,
    encode_set_report,
};
