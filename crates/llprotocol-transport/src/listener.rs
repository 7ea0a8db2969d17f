use std::net::TcpListener;

use tracing::{debug, info, warn};

use crate::channel::Channel;
use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};

/// Accepts incoming channels on a bound endpoint.
pub struct Listener {
    inner: ListenerInner,
}

enum ListenerInner {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(crate::uds::UnixSocketListener),
}

impl Listener {
    /// Bind to an endpoint. `tcp://host:0` picks a free port; see
    /// [`Listener::local_endpoint`].
    pub fn bind(endpoint: &Endpoint) -> Result<Self> {
        let inner = match endpoint {
            Endpoint::Tcp(addr) => {
                let listener =
                    TcpListener::bind(addr.as_str()).map_err(|source| TransportError::Bind {
                        endpoint: endpoint.to_string(),
                        source,
                    })?;
                info!(%endpoint, "listening on tcp");
                ListenerInner::Tcp(listener)
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => ListenerInner::Unix(crate::uds::UnixSocketListener::bind(path)?),
            #[cfg(not(unix))]
            Endpoint::Unix(_) => return Err(TransportError::Unsupported(endpoint.to_string())),
        };
        Ok(Self { inner })
    }

    /// Accept the next channel (blocking).
    pub fn accept(&self) -> Result<Channel> {
        match &self.inner {
            ListenerInner::Tcp(listener) => {
                let (stream, addr) = listener.accept().map_err(TransportError::Accept)?;
                if let Err(err) = stream.set_nodelay(true) {
                    warn!(%addr, %err, "could not disable nagle; keeping connection");
                }
                debug!(%addr, "accepted tcp connection");
                Ok(Channel::from_tcp(stream))
            }
            #[cfg(unix)]
            ListenerInner::Unix(listener) => listener.accept(),
        }
    }

    /// The endpoint clients should connect to.
    pub fn local_endpoint(&self) -> Result<Endpoint> {
        match &self.inner {
            ListenerInner::Tcp(listener) => Ok(Endpoint::Tcp(listener.local_addr()?.to_string())),
            #[cfg(unix)]
            ListenerInner::Unix(listener) => Ok(Endpoint::Unix(listener.path().to_path_buf())),
        }
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let endpoint = self
            .local_endpoint()
            .map(|endpoint| endpoint.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        f.debug_struct("Listener").field("endpoint", &endpoint).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    #[test]
    fn tcp_listener_reports_assigned_port() {
        let listener = Listener::bind(&"tcp://127.0.0.1:0".parse().unwrap()).unwrap();
        let endpoint = listener.local_endpoint().unwrap();
        match &endpoint {
            Endpoint::Tcp(addr) => assert!(!addr.ends_with(":0")),
            other => panic!("unexpected endpoint {other}"),
        }

        let client = std::thread::spawn(move || {
            let mut channel = Channel::connect(&endpoint).unwrap();
            channel.write_all(b"abc").unwrap();
        });

        let mut accepted = listener.accept().unwrap();
        let mut buf = [0u8; 3];
        accepted.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"abc");
        client.join().unwrap();
    }

    #[test]
    fn tcp_peer_that_already_left_is_still_accepted() {
        let listener = Listener::bind(&"tcp://127.0.0.1:0".parse().unwrap()).unwrap();
        let endpoint = listener.local_endpoint().unwrap();
        {
            let mut channel = Channel::connect(&endpoint).unwrap();
            channel.write_all(b"bye").unwrap();
        }

        // Socket options may fail on a connection the peer already closed;
        // the accepted channel must still deliver what was sent.
        let mut accepted = listener.accept().unwrap();
        let mut buf = Vec::new();
        accepted.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"bye");
    }

    #[cfg(unix)]
    #[test]
    fn unix_listener_accepts() {
        let dir = std::env::temp_dir().join(format!("llp-listener-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let endpoint = Endpoint::Unix(dir.join("l.sock"));

        let listener = Listener::bind(&endpoint).unwrap();
        assert_eq!(listener.local_endpoint().unwrap(), endpoint);

        let connect_to = endpoint.clone();
        let client = std::thread::spawn(move || {
            let mut channel = Channel::connect(&connect_to).unwrap();
            channel.write_all(b"x").unwrap();
        });
        let mut accepted = listener.accept().unwrap();
        let mut buf = [0u8; 1];
        accepted.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"x");
        client.join().unwrap();

        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
