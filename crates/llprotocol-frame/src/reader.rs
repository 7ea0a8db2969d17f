use std::collections::VecDeque;
use std::io::{ErrorKind, Read};

use bytes::{Bytes, BytesMut};
use llprotocol_transport::Channel;
use tracing::debug;

use crate::codec::Frame;
use crate::config::FrameConfig;
use crate::error::{transport_to_frame_error, FrameError, Result};
use crate::splitter::FrameSplitter;

/// Default number of bytes requested from the stream per read.
pub const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete frames from any `Read` stream.
///
/// Handles partial reads internally; callers always get complete frames.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    splitter: FrameSplitter,
    ready: VecDeque<Frame>,
    chunk_size: usize,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Result<Self> {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Result<Self> {
        Ok(Self {
            inner,
            buf: BytesMut::new(),
            splitter: FrameSplitter::new(&config)?,
            ready: VecDeque::new(),
            chunk_size: READ_CHUNK_SIZE,
            config,
        })
    }

    /// Bytes requested per read. Clamped to at least one.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return Ok(frame);
            }
            let chunk = self.read_chunk()?;
            self.ready.extend(self.splitter.push(chunk)?);
        }
    }

    /// Frames already decoded but not yet returned by `read_frame`.
    pub fn buffered_frames(&self) -> usize {
        self.ready.len()
    }

    fn read_chunk(&mut self) -> Result<Bytes> {
        loop {
            self.buf.resize(self.chunk_size, 0);
            let read = match self.inner.read(&mut self.buf[..]) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                if self.splitter.has_partial() {
                    debug!(
                        buffered = self.splitter.buffered(),
                        "stream closed inside a frame"
                    );
                }
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.truncate(read);
            return Ok(self.buf.split().freeze());
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

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameReader<Channel> {
    /// Create a frame reader for a `Channel` and apply read timeout from config.
    pub fn with_config_channel(inner: Channel, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Self::with_config(inner, config)
    }
}
