use std::time::Duration;

use bytes::Bytes;

use crate::error::{FrameError, Result};
use crate::scanner::{validate_delimiters, ScanMode};

/// Default maximum payload bytes carried by one frame.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 64_000;

/// Default sequence terminating every frame.
pub const DEFAULT_FRAME_DELIMITER: [u8; 12] = [1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];

/// Default sequence terminating the JSON header inside a message body.
pub const DEFAULT_HEADER_DELIMITER: [u8; 12] = [0, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 0];

/// Shortest delimiter accepted as protocol configuration.
pub const MIN_DELIMITER_LEN: usize = 4;

/// Configuration shared by both ends of a channel.
///
/// Both peers must agree on the two delimiters. `max_frame_length` only
/// bounds what this side emits and accepts.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload bytes per frame. Default: 64 000.
    pub max_frame_length: usize,
    /// Sequence ending every frame on the wire.
    pub frame_delimiter: Bytes,
    /// Sequence ending the JSON header of a message.
    pub header_delimiter: Bytes,
    /// Scanning strategy for both delimiter scanners.
    pub scan_mode: ScanMode,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            frame_delimiter: Bytes::from_static(&DEFAULT_FRAME_DELIMITER),
            header_delimiter: Bytes::from_static(&DEFAULT_HEADER_DELIMITER),
            scan_mode: ScanMode::EveryByte,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

impl FrameConfig {
    pub fn with_max_frame_length(mut self, max_frame_length: usize) -> Self {
        self.max_frame_length = max_frame_length;
        self
    }

    pub fn with_delimiters(
        mut self,
        frame_delimiter: impl Into<Bytes>,
        header_delimiter: impl Into<Bytes>,
    ) -> Self {
        self.frame_delimiter = frame_delimiter.into();
        self.header_delimiter = header_delimiter.into();
        self
    }

    pub fn with_scan_mode(mut self, scan_mode: ScanMode) -> Self {
        self.scan_mode = scan_mode;
        self
    }

    /// Check the configuration before it is used on a channel.
    pub fn validate(&self) -> Result<()> {
        if self.max_frame_length == 0 {
            return Err(FrameError::InvalidConfig(
                "max_frame_length must be greater than zero".to_string(),
            ));
        }
        for (name, delimiter) in [
            ("frame", &self.frame_delimiter),
            ("header", &self.header_delimiter),
        ] {
            if delimiter.len() < MIN_DELIMITER_LEN {
                return Err(FrameError::InvalidDelimiters(format!(
                    "{name} delimiter is {} bytes, need at least {MIN_DELIMITER_LEN}",
                    delimiter.len()
                )));
            }
        }
        validate_delimiters(&[
            self.frame_delimiter.as_ref(),
            self.header_delimiter.as_ref(),
        ])
    }
}
