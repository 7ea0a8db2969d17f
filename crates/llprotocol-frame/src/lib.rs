//! Delimiter-scanned framing for llprotocol channels.
//!
//! Every frame on the wire is:
//! - a 4-byte little-endian message id
//! - a 4-byte little-endian frame index (starting at 1 per message)
//! - a 1-byte end flag (170 = last frame, 120 = more follow)
//! - the payload
//! - the frame delimiter
//!
//! There is no length prefix. Frame boundaries are found by scanning the
//! stream for the delimiter, which may straddle any number of reads.

pub mod buffer;
pub mod codec;
pub mod config;
pub mod error;
pub mod reader;
pub mod scanner;
pub mod splitter;
#[cfg(feature = "async")]
pub mod tokio_codec;
pub mod writer;

pub use buffer::BufferView;
pub use codec::{decode_frame, encode_frame, Frame, FrameHeader, END_MARKER, HEADER_SIZE, MORE_MARKER};
pub use config::{
    FrameConfig, DEFAULT_FRAME_DELIMITER, DEFAULT_HEADER_DELIMITER, DEFAULT_MAX_FRAME_LENGTH,
    MIN_DELIMITER_LEN,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use scanner::{DelimiterMatch, DelimiterScanner, ScanMode};
pub use splitter::FrameSplitter;
#[cfg(feature = "async")]
pub use tokio_codec::LlpCodec;
pub use writer::FrameWriter;
