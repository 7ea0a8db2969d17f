use crate::sink::AbortReason;

/// Errors that can occur while sending or receiving messages.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] llprotocol_transport::TransportError),

    /// Frame-level error. Desynchronizing frame errors close the channel.
    #[error("frame error: {0}")]
    Frame(#[from] llprotocol_frame::FrameError),

    /// One message's header could not be decoded. Other messages are unaffected.
    #[error("header of message {id:#010x} rejected: {reason}")]
    HeaderParse { id: u32, reason: String },

    /// A header without the required `type` field.
    #[error("message header has no `type` field")]
    MissingType,

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// No free message id was found.
    #[error("no free message id after {attempts} attempts")]
    IdSpaceExhausted { attempts: usize },

    /// The message was cut off before its end frame.
    #[error("message aborted: {0}")]
    Aborted(AbortReason),

    /// No frame cut keeps the frame delimiter out of this message's frames.
    #[error("frames of message {id:#010x} would contain the frame delimiter")]
    DelimiterCollision { id: u32 },

    /// Data pushed after the end frame was produced.
    #[error("message already finished")]
    AlreadyFinished,

    /// Peer disconnected.
    #[error("peer disconnected: {0}")]
    Disconnected(String),
}

pub type Result<T> = std::result::Result<T, MessageError>;

impl From<MessageError> for std::io::Error {
    fn from(err: MessageError) -> Self {
        use std::io::ErrorKind;
        match err {
            MessageError::Frame(llprotocol_frame::FrameError::Io(io)) => io,
            MessageError::Aborted(_) => std::io::Error::new(ErrorKind::ConnectionAborted, err),
            MessageError::Disconnected(_) => std::io::Error::new(ErrorKind::NotConnected, err),
            other => std::io::Error::other(other),
        }
    }
}
