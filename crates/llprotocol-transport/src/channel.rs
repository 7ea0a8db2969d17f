use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use tracing::debug;

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};

/// A connected bidirectional byte channel implementing `Read + Write`.
///
/// Cloning with [`Channel::try_clone`] yields a second handle to the same
/// socket, which is how the read and write directions are driven from
/// different threads.
pub struct Channel {
    inner: ChannelInner,
    peer: String,
}

enum ChannelInner {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

impl Read for Channel {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            ChannelInner::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            ChannelInner::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for Channel {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            ChannelInner::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            ChannelInner::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            ChannelInner::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            ChannelInner::Unix(stream) => stream.flush(),
        }
    }
}

impl Channel {
    /// Wrap a connected TCP stream.
    pub fn from_tcp(stream: TcpStream) -> Self {
        let peer = stream
            .peer_addr()
            .map(|addr| format!("tcp://{addr}"))
            .unwrap_or_else(|_| "tcp://unknown".to_string());
        Self {
            inner: ChannelInner::Tcp(stream),
            peer,
        }
    }

    /// Wrap a connected Unix domain socket stream.
    #[cfg(unix)]
    pub fn from_unix(stream: std::os::unix::net::UnixStream, peer: impl Into<String>) -> Self {
        Self {
            inner: ChannelInner::Unix(stream),
            peer: peer.into(),
        }
    }

    /// Connect to a listening endpoint (blocking).
    pub fn connect(endpoint: &Endpoint) -> Result<Self> {
        match endpoint {
            Endpoint::Tcp(addr) => {
                let stream = TcpStream::connect(addr.as_str()).map_err(|source| {
                    TransportError::Connect {
                        endpoint: endpoint.to_string(),
                        source,
                    }
                })?;
                // Frames are written as whole blocks; don't let Nagle hold the tail back.
                stream.set_nodelay(true)?;
                debug!(%endpoint, "connected over tcp");
                Ok(Self::from_tcp(stream))
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => crate::uds::connect(path),
            #[cfg(not(unix))]
            Endpoint::Unix(_) => Err(TransportError::Unsupported(endpoint.to_string())),
        }
    }

    /// Create a connected in-process pair (Unix only).
    #[cfg(unix)]
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = std::os::unix::net::UnixStream::pair()?;
        Ok((
            Self::from_unix(left, "pair:left"),
            Self::from_unix(right, "pair:right"),
        ))
    }

    /// Human-readable description of the remote side.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            ChannelInner::Tcp(_) => "tcp",
            #[cfg(unix)]
            ChannelInner::Unix(_) => "unix-domain-socket",
        }
    }

    /// Set read timeout on the underlying socket.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            ChannelInner::Tcp(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            ChannelInner::Unix(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
        }
    }

    /// Set write timeout on the underlying socket.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            ChannelInner::Tcp(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            ChannelInner::Unix(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
        }
    }

    /// Try to clone this channel (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        let inner = match &self.inner {
            ChannelInner::Tcp(stream) => ChannelInner::Tcp(stream.try_clone()?),
            #[cfg(unix)]
            ChannelInner::Unix(stream) => ChannelInner::Unix(stream.try_clone()?),
        };
        Ok(Self {
            inner,
            peer: self.peer.clone(),
        })
    }

    /// Shut down both directions. Every clone of this channel observes EOF.
    ///
    /// Shutting down an already disconnected socket is not an error.
    pub fn shutdown(&self) -> Result<()> {
        let result = match &self.inner {
            ChannelInner::Tcp(stream) => stream.shutdown(Shutdown::Both),
            #[cfg(unix)]
            ChannelInner::Unix(stream) => stream.shutdown(Shutdown::Both),
        };
        match result {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(TransportError::Io(err)),
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("type", &self.transport_name())
            .field("peer", &self.peer)
            .finish()
    }
}
