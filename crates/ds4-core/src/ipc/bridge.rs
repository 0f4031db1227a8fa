//! Local socket bridge serving controller snapshots.
//!
//! One fixed-size request per connection, one fixed-size reply, then close.

use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::sys::socket::{
    AddressFamily, Backlog, SockFlag, SockType, UnixAddr, bind, listen, socket,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::IpcConfig;
use crate::protocol::{ControlState, IpcMessage, OutputCommand};

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("Failed to bind {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What happened to one client connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Served {
    /// Full request answered; carries the client's outbound command, if any.
    Replied { command: Option<OutputCommand> },
    /// Request was short; connection closed without a reply.
    Dropped { received: usize },
}

pub struct IpcBridge {
    listener: UnixListener,
    path: PathBuf,
    client_timeout: Duration,
}

impl IpcBridge {
    /// Bind the configured socket path, replacing any stale socket file.
    pub fn bind(config: &IpcConfig) -> Result<Self, IpcError> {
        let path = config.socket_path.clone();
        let bind_err = |source: std::io::Error| IpcError::Bind {
            path: path.clone(),
            source,
        };

        match std::fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "Removed stale socket"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(bind_err(e)),
        }

        let fd = socket(
            AddressFamily::Unix,
            SockType::Stream,
            SockFlag::SOCK_CLOEXEC | SockFlag::SOCK_NONBLOCK,
            None,
        )
        .map_err(|e| bind_err(e.into()))?;
        let addr = UnixAddr::new(&path).map_err(|e| bind_err(e.into()))?;
        bind(fd.as_raw_fd(), &addr).map_err(|e| bind_err(e.into()))?;
        let backlog = Backlog::new(config.backlog).map_err(|e| bind_err(e.into()))?;
        listen(&fd, backlog).map_err(|e| bind_err(e.into()))?;

        info!(path = %path.display(), backlog = config.backlog, "IPC socket listening");
        Ok(Self {
            listener: UnixListener::from(fd),
            path,
            client_timeout: config.client_timeout(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Listening descriptor for readiness polling.
    pub fn listen_handle(&self) -> BorrowedFd<'_> {
        self.listener.as_fd()
    }

    /// Accept one pending client; `None` if the client already went away.
    pub fn accept_one(&self) -> Result<Option<UnixStream>, IpcError> {
        match self.listener.accept() {
            Ok((stream, _)) => {
                stream.set_nonblocking(false)?;
                stream.set_read_timeout(Some(self.client_timeout))?;
                stream.set_write_timeout(Some(self.client_timeout))?;
                Ok(Some(stream))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Answer one request on `stream` with `controls`, then close it.
    ///
    /// A single read is issued; anything short of a full message drops the
    /// connection without waiting for the remainder.
    pub fn serve(&self, mut stream: UnixStream, controls: &ControlState) -> Result<Served, IpcError> {
        let mut buf = [0u8; IpcMessage::SIZE];
        let received = match stream.read(&mut buf) {
            Ok(n) => n,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => 0,
            Err(e) => return Err(e.into()),
        };
        if received != IpcMessage::SIZE {
            debug!(received, expected = IpcMessage::SIZE, "Short IPC request, dropping");
            return Ok(Served::Dropped { received });
        }

        let mut message = match IpcMessage::from_bytes(&buf) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Undecodable IPC request, dropping");
                return Ok(Served::Dropped { received });
            }
        };
        message.controls = controls.clone();
        stream.write_all(&message.to_bytes())?;
        stream.flush()?;
        Ok(Served::Replied {
            command: message.command,
        })
    }
}

impl Drop for IpcBridge {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove IPC socket");
            }
        }
    }
}
