//! Byte channel abstraction for llprotocol.
//!
//! A [`Channel`] is one bidirectional byte stream (TCP or Unix domain
//! socket). The protocol layers above never look at the transport again once
//! they hold a `Channel`; they only read chunks from it and write frame
//! blocks to it.
//!
//! Endpoints are written as `tcp://host:port`, `unix:///path/to.sock`, or a
//! bare filesystem path (Unix socket).

pub mod channel;
pub mod endpoint;
pub mod error;
pub mod listener;

#[cfg(unix)]
pub mod uds;

pub use channel::Channel;
pub use endpoint::Endpoint;
pub use error::{Result, TransportError};
pub use listener::Listener;
