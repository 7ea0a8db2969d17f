use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use llprotocol_transport::Channel;

use crate::codec::{encode_frame, FrameHeader};
use crate::config::FrameConfig;
use crate::error::{transport_to_frame_error, FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete frames to any `Write` stream.
///
/// Each frame block goes out in a single write loop followed by a flush, so
/// callers that share a writer behind a lock never tear a frame.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Result<Self> {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        })
    }

    /// Encode and send one frame.
    pub fn write_frame(&mut self, header: &FrameHeader, payload: &[u8]) -> Result<()> {
        if payload.len() > self.config.max_frame_length {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_frame_length,
            });
        }

        let mut buf = std::mem::take(&mut self.buf);
        buf.clear();
        encode_frame(header, payload, &self.config.frame_delimiter, &mut buf);
        let result = self.write_block(&buf);
        self.buf = buf;
        result
    }

    /// Send an already encoded frame block as is.
    pub fn write_block(&mut self, block: &[u8]) -> Result<()> {
        let mut offset = 0usize;
        while offset < block.len() {
            match self.inner.write(&block[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameWriter<Channel> {
    /// Create a frame writer for a `Channel` and apply write timeout from config.
    pub fn with_config_channel(inner: Channel, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Self::with_config(inner, config)
    }
}
