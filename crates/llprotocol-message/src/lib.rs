//! Messages on top of llprotocol frames.
//!
//! A message is a JSON header, the header delimiter, then an opaque body,
//! cut into frames that share one random id. Many messages interleave on a
//! single channel in both directions. Inbound, the [`Reassembler`] puts each
//! id's frames back together and hands the body to whatever sink the
//! [`MessageRouter`] picked for it; outbound, a [`Sender`] cuts messages into
//! frames and writes them under one lock.

pub mod connection;
pub mod error;
pub mod header;
pub mod id;
pub mod outbound;
pub mod reassembly;
pub mod router;
pub mod sink;

pub use connection::{
    Connection, ConnectionConfig, DEFAULT_BACKPRESSURE_POLL_INTERVAL, DEFAULT_READ_CHUNK_SIZE,
};
pub use error::{MessageError, Result};
pub use header::{MessageHeader, EVENT_ALIAS, TYPE_FIELD};
pub use id::{AllocatedId, IdAllocator, MAX_ALLOCATION_ATTEMPTS};
pub use outbound::{OutboundMessage, OutgoingMessage, Sender};
pub use reassembly::{
    InboundEvent, Reassembler, ReassemblyConfig, DEFAULT_MAX_HEADER_LENGTH, DEFAULT_MAX_HELD_BYTES,
};
pub use router::{
    BufferedHandler, CompletedMessage, Delivery, IncomingMessage, MessageRouter, Router,
    StreamingHandler, DEFAULT_PIPE_CAPACITY,
};
pub use sink::{
    pipe, AbortReason, BodyReader, BufferedSink, DiscardSink, FanoutSink, MessageSink, PipeSink,
};
