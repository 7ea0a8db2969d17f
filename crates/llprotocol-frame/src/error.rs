use crate::codec::HEADER_SIZE;

/// Errors that can occur while scanning, encoding or decoding frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Fewer than [`HEADER_SIZE`] bytes preceded a frame delimiter.
    #[error("truncated frame header ({len} bytes, need {})", HEADER_SIZE)]
    TruncatedHeader { len: usize },

    /// The end-flag byte is neither of the two sentinel values.
    #[error("invalid end marker byte {0:#04x}")]
    InvalidEndMarker(u8),

    /// A frame for an id that is not open, and whose payload cannot open a message.
    #[error("frame {index} for unknown message id {id:#010x} does not start a message")]
    UnknownFrameId { id: u32, index: u32 },

    /// A frame index skipped or repeated within one message.
    #[error("frame index out of sequence for message {id:#010x}: expected {expected}, got {got}")]
    OutOfSequence { id: u32, expected: u32, got: u32 },

    /// The frame payload exceeds the configured maximum frame length.
    #[error("frame payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The delimiter set cannot be scanned unambiguously.
    #[error("invalid delimiter configuration: {0}")]
    InvalidDelimiters(String),

    /// A configuration value is out of range.
    #[error("invalid frame configuration: {0}")]
    InvalidConfig(String),

    /// A logical buffer range reaches outside the retained bytes.
    #[error("range {start}..{end} outside buffered bytes {available_start}..{available_end}")]
    OutOfRange {
        start: usize,
        end: usize,
        available_start: usize,
        available_end: usize,
    },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The channel was closed (possibly in the middle of a frame).
    #[error("connection closed")]
    ConnectionClosed,
}

impl FrameError {
    /// True for errors that mean the byte stream lost synchronization.
    ///
    /// The channel cannot be recovered after one of these; every in-flight
    /// message must be aborted and the channel closed.
    pub fn is_desync(&self) -> bool {
        matches!(
            self,
            FrameError::TruncatedHeader { .. }
                | FrameError::InvalidEndMarker(_)
                | FrameError::UnknownFrameId { .. }
                | FrameError::OutOfSequence { .. }
                | FrameError::PayloadTooLarge { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;

pub(crate) fn transport_to_frame_error(err: llprotocol_transport::TransportError) -> FrameError {
    use llprotocol_transport::TransportError;
    match err {
        TransportError::Io(io) | TransportError::Accept(io) => FrameError::Io(io),
        TransportError::Bind { source, .. } | TransportError::Connect { source, .. } => {
            FrameError::Io(source)
        }
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
