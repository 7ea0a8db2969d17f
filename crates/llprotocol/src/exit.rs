use std::fmt;
use std::io;

use llprotocol_frame::FrameError;
use llprotocol_message::MessageError;
use llprotocol_transport::TransportError;

// sysexits-style process exit codes.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const PROTOCOL_ERROR: i32 = 76;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        TransportError::InvalidEndpoint(_) => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::PayloadTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::InvalidConfig(_) | FrameError::InvalidDelimiters(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        FrameError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        other if other.is_desync() => {
            CliError::new(PROTOCOL_ERROR, format!("{context}: {other}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn message_error(context: &str, err: MessageError) -> CliError {
    match err {
        MessageError::Transport(err) => transport_error(context, err),
        MessageError::Frame(err) => frame_error(context, err),
        MessageError::HeaderParse { .. } => {
            CliError::new(PROTOCOL_ERROR, format!("{context}: {err}"))
        }
        MessageError::MissingType
        | MessageError::Json(_)
        | MessageError::DelimiterCollision { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        MessageError::Aborted(_) | MessageError::Disconnected(_) => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use llprotocol_message::AbortReason;

    use super::*;

    #[test]
    fn refused_connection_is_a_plain_failure() {
        let err = message_error(
            "connect failed",
            MessageError::Transport(TransportError::Connect {
                endpoint: "tcp://127.0.0.1:1".to_string(),
                source: io::Error::from(io::ErrorKind::ConnectionRefused),
            }),
        );
        assert_eq!(err.code, FAILURE);
        assert!(err.message.starts_with("connect failed: "));
    }

    #[test]
    fn desync_maps_to_protocol_error() {
        let err = message_error(
            "receive failed",
            MessageError::Frame(FrameError::OutOfSequence {
                id: 1,
                expected: 2,
                got: 5,
            }),
        );
        assert_eq!(err.code, PROTOCOL_ERROR);
    }

    #[test]
    fn timeouts_and_aborts() {
        assert_eq!(
            frame_error("read", FrameError::Io(io::ErrorKind::TimedOut.into())).code,
            TIMEOUT
        );
        assert_eq!(
            message_error("send", MessageError::Aborted(AbortReason::ChannelClosed)).code,
            FAILURE
        );
        assert_eq!(
            transport_error("bind", TransportError::InvalidEndpoint("x://".into())).code,
            USAGE
        );
    }
}
