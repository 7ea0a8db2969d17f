//! Many concurrent, streamed messages over one byte channel.
//!
//! Each message is a JSON header plus an arbitrary body, cut into frames
//! tagged with a random message id and found on the wire by scanning for a
//! delimiter. Frames of different messages interleave freely; the receiving
//! side reassembles them and routes each body by its header `type`.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP and Unix socket channels
//! - [`frame`]: buffer view, delimiter scanner, frame header codec
//! - [`message`]: reassembly, routing, outbound multiplexing, connections
//!
//! ```no_run
//! use llprotocol::message::{Connection, ConnectionConfig, Delivery, MessageHeader, Router};
//! use llprotocol::transport::Endpoint;
//!
//! let router = Router::new().on(
//!     "greeting",
//!     Delivery::buffered(|message| println!("{}", message.text().unwrap_or("<binary>"))),
//! );
//! let endpoint: Endpoint = "tcp://127.0.0.1:7000".parse()?;
//! let connection = Connection::connect(&endpoint, router, ConnectionConfig::default())?;
//! connection.send(&MessageHeader::new("greeting"), b"hello")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// Re-export transport types.
pub mod transport {
    pub use llprotocol_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use llprotocol_frame::*;
}

/// Re-export message types.
pub mod message {
    pub use llprotocol_message::*;
}
