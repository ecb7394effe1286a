//! Listening sockets shared by the worker pool.

use crate::audio::TimedRead;
use crate::error::{Result, VoxgateError};
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::os::fd::AsRawFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

const UNIX_PREFIX: &str = "unix:";

/// Longest wait for the peer to hang up after the response.
const LINGER_TIMEOUT: Duration = Duration::from_secs(1);
const LINGER_MAX_BYTES: usize = 1 << 20;

/// Where the server listens: `host:port` or `unix:/path/to.sock`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddress {
    Tcp(String),
    Unix(PathBuf),
}

impl ListenAddress {
    pub fn parse(address: &str) -> Self {
        match address.strip_prefix(UNIX_PREFIX) {
            Some(path) => ListenAddress::Unix(PathBuf::from(path)),
            None => ListenAddress::Tcp(address.to_string()),
        }
    }
}

impl fmt::Display for ListenAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenAddress::Tcp(address) => write!(f, "{}", address),
            ListenAddress::Unix(path) => write!(f, "{}{}", UNIX_PREFIX, path.display()),
        }
    }
}

/// A bound listening socket.
#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    Unix { listener: UnixListener, path: PathBuf },
}

impl Listener {
    /// Bind `address` and apply `backlog` to the socket.
    ///
    /// A stale Unix socket file at the same path is removed first.
    pub fn bind(address: &ListenAddress, backlog: i32) -> Result<Self> {
        let bind_error = |e: io::Error| VoxgateError::Bind {
            address: address.to_string(),
            message: e.to_string(),
        };

        let listener = match address {
            ListenAddress::Tcp(addr) => Listener::Tcp(TcpListener::bind(addr).map_err(bind_error)?),
            ListenAddress::Unix(path) => {
                if path.exists() {
                    debug!("Removing stale socket {}", path.display());
                    std::fs::remove_file(path).map_err(bind_error)?;
                }
                Listener::Unix {
                    listener: UnixListener::bind(path).map_err(bind_error)?,
                    path: path.clone(),
                }
            }
        };

        listener.set_backlog(backlog).map_err(bind_error)?;
        Ok(listener)
    }

    fn set_backlog(&self, backlog: i32) -> io::Result<()> {
        let fd = match self {
            Listener::Tcp(listener) => listener.as_raw_fd(),
            Listener::Unix { listener, .. } => listener.as_raw_fd(),
        };
        // Calling listen again on a listening socket only updates its backlog.
        let rc = unsafe { libc::listen(fd, backlog) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// The bound address, with the real port when binding to port 0.
    pub fn local_addr(&self) -> Result<ListenAddress> {
        match self {
            Listener::Tcp(listener) => Ok(ListenAddress::Tcp(listener.local_addr()?.to_string())),
            Listener::Unix { path, .. } => Ok(ListenAddress::Unix(path.clone())),
        }
    }

    /// Accept one connection. Safe to call from several threads at once.
    pub fn accept(&self) -> io::Result<Connection> {
        Ok(match self {
            Listener::Tcp(listener) => {
                let (stream, peer) = listener.accept()?;
                Connection::Tcp { stream, peer: peer.to_string() }
            }
            Listener::Unix { listener, .. } => {
                let (stream, _) = listener.accept()?;
                Connection::Unix(stream)
            }
        })
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Listener::Unix { path, .. } = self
            && let Err(e) = std::fs::remove_file(&*path)
        {
            warn!("Failed to remove socket {}: {}", path.display(), e);
        }
    }
}

/// One accepted client connection.
#[derive(Debug)]
pub enum Connection {
    Tcp { stream: TcpStream, peer: String },
    Unix(UnixStream),
}

impl Connection {
    /// Human-readable peer, for logs.
    pub fn peer(&self) -> &str {
        match self {
            Connection::Tcp { peer, .. } => peer,
            Connection::Unix(_) => "unix",
        }
    }

    /// Second handle to the same socket, used for the write side.
    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(match self {
            Connection::Tcp { stream, peer } => Connection::Tcp {
                stream: stream.try_clone()?,
                peer: peer.clone(),
            },
            Connection::Unix(stream) => Connection::Unix(stream.try_clone()?),
        })
    }

    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Connection::Tcp { stream, .. } => stream.set_write_timeout(timeout),
            Connection::Unix(stream) => stream.set_write_timeout(timeout),
        }
    }

    /// Half-close, then discard unread input until the peer hangs up.
    ///
    /// Closing with unread data makes the kernel send a reset, which can
    /// destroy a response the peer has not read yet.
    pub fn close(&mut self) {
        let result = match self {
            Connection::Tcp { stream, .. } => stream.shutdown(Shutdown::Write),
            Connection::Unix(stream) => stream.shutdown(Shutdown::Write),
        };
        if let Err(e) = result {
            if e.kind() != io::ErrorKind::NotConnected {
                debug!("Shutdown of {} failed: {}", self.peer(), e);
            }
            return;
        }

        if self.set_read_timeout(Some(LINGER_TIMEOUT)).is_err() {
            return;
        }
        let mut sink = [0u8; 4096];
        let mut drained = 0;
        while drained < LINGER_MAX_BYTES {
            match self.read(&mut sink) {
                Ok(0) | Err(_) => break,
                Ok(n) => drained += n,
            }
        }
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Connection::Tcp { stream, .. } => stream.read(buf),
            Connection::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Connection::Tcp { stream, .. } => stream.write(buf),
            Connection::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Connection::Tcp { stream, .. } => stream.flush(),
            Connection::Unix(stream) => stream.flush(),
        }
    }
}

impl TimedRead for Connection {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Connection::Tcp { stream, .. } => stream.set_read_timeout(timeout),
            Connection::Unix(stream) => stream.set_read_timeout(timeout),
        }
    }
}
