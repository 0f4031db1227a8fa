//! Client side of the snapshot socket.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::bridge::IpcError;
use crate::protocol::{IpcMessage, OutputCommand};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct IpcClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl IpcClient {
    pub fn new<P: AsRef<Path>>(socket_path: P) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send one request and wait for the daemon's reply.
    pub fn query(&self, command: Option<OutputCommand>) -> Result<IpcMessage, IpcError> {
        let mut stream = UnixStream::connect(&self.socket_path)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        stream.write_all(&IpcMessage::request(command).to_bytes())?;
        let mut buf = [0u8; IpcMessage::SIZE];
        stream.read_exact(&mut buf)?;

        IpcMessage::from_bytes(&buf)
            .map_err(|e| IpcError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
    }
}
