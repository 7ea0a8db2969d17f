//! Outbound multiplexing: messages cut into frames and interleaved on one
//! channel.

use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, Mutex, OnceLock};

use bytes::{Bytes, BytesMut};
use llprotocol_frame::{
    encode_frame, DelimiterScanner, FrameConfig, FrameError, FrameHeader, FrameWriter, HEADER_SIZE,
};
use llprotocol_transport::Channel;
use tracing::{debug, warn};

use crate::error::{MessageError, Result};
use crate::header::MessageHeader;
use crate::id::{AllocatedId, IdAllocator};
use crate::sink::AbortReason;

/// Frame production for one outbound message, without any I/O.
///
/// The serialized header and the header delimiter are the first logical
/// body bytes. Each `push` returns encoded frame blocks ready for the wire.
///
/// Frame cuts are placed so that every encoded block contains the frame
/// delimiter exactly once, at its end. Bodies may hold any bytes, including
/// the delimiter itself; such messages just take more frames.
#[derive(Debug)]
pub struct OutboundMessage {
    id: u32,
    next_index: u32,
    pending: BytesMut,
    finished: bool,
    max_frame_length: usize,
    frame_delimiter: Bytes,
    scanner: DelimiterScanner,
}

impl OutboundMessage {
    pub fn new(header: &MessageHeader, id: u32, config: &FrameConfig) -> Result<Self> {
        if header.message_type().is_empty() {
            return Err(MessageError::MissingType);
        }
        let mut pending = BytesMut::from(header.to_vec()?.as_slice());
        pending.extend_from_slice(&config.header_delimiter);
        Ok(Self {
            id,
            next_index: 1,
            pending,
            finished: false,
            max_frame_length: config.max_frame_length,
            frame_delimiter: config.frame_delimiter.clone(),
            scanner: DelimiterScanner::new([&config.frame_delimiter])?,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Cut `chunk` into frames. With `last`, the final frame carries the end marker.
    ///
    /// On `Err` nothing from this call may be written and the message is
    /// unusable.
    pub fn push(&mut self, chunk: &[u8], last: bool) -> Result<Vec<Bytes>> {
        if self.finished {
            return Err(MessageError::AlreadyFinished);
        }

        let staged;
        let payload: &[u8] = if self.pending.is_empty() {
            chunk
        } else {
            self.pending.extend_from_slice(chunk);
            staged = self.pending.split().freeze();
            &staged
        };

        let mut blocks = Vec::with_capacity(payload.len().div_ceil(self.max_frame_length).max(1));
        let mut rest = payload;
        while !rest.is_empty() || (last && blocks.is_empty()) {
            match self.next_block(rest, last) {
                Ok((block, used)) => {
                    blocks.push(block);
                    rest = &rest[used..];
                }
                Err(err) => {
                    self.finished = true;
                    return Err(err);
                }
            }
        }
        self.finished = last;
        Ok(blocks)
    }

    /// Same as `push(&[], true)`.
    pub fn finish(&mut self) -> Result<Vec<Bytes>> {
        self.push(&[], true)
    }

    // Encode the longest front slice of `rest` whose block ends at its first
    // frame delimiter. Returns the block and how many bytes of `rest` it took.
    fn next_block(&mut self, rest: &[u8], last: bool) -> Result<(Bytes, usize)> {
        let mut len = rest.len().min(self.max_frame_length);
        loop {
            let end = last && len == rest.len();
            let mut out = BytesMut::new();
            let header = FrameHeader::new(self.id, self.next_index, end);
            encode_frame(&header, &rest[..len], &self.frame_delimiter, &mut out);

            let Some(start) = self.stray_delimiter(&out) else {
                self.next_index = self.next_index.wrapping_add(1);
                return Ok((out.freeze(), len));
            };
            // A match inside the payload is broken by cutting after its first
            // byte; one that runs into the trailing delimiter by cutting before it.
            let shorter = match start.checked_sub(HEADER_SIZE) {
                Some(offset) if offset + self.frame_delimiter.len() <= len => offset + 1,
                Some(offset) if offset > 0 => offset,
                Some(_) => len.saturating_sub(1),
                None => 0,
            };
            if shorter == 0 || shorter >= len {
                return Err(MessageError::DelimiterCollision { id: self.id });
            }
            debug!(id = self.id, len, shorter, "frame cut moved off a delimiter match");
            len = shorter;
        }
    }

    // Start of the first delimiter match that is not the trailing delimiter.
    fn stray_delimiter(&self, block: &[u8]) -> Option<usize> {
        let trailing = block.len() - self.frame_delimiter.len();
        let mut scanner = self.scanner.clone();
        scanner
            .feed(block)
            .first()
            .map(|found| found.start)
            .filter(|start| *start != trailing)
    }
}

struct Shared<W> {
    writer: Mutex<FrameWriter<W>>,
    ids: IdAllocator,
    closed: OnceLock<AbortReason>,
    config: FrameConfig,
}

/// Sending half of a connection.
///
/// Clones share one writer and one id allocator. Every frame block is written
/// under the writer lock, so messages sent from different threads interleave
/// frame by frame and never tear a frame.
pub struct Sender<W = Channel> {
    shared: Arc<Shared<W>>,
}

impl<W> Clone for Sender<W> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<W: Write + Send> Sender<W> {
    pub fn new(writer: FrameWriter<W>) -> Self {
        let config = writer.config().clone();
        Self {
            shared: Arc::new(Shared {
                writer: Mutex::new(writer),
                ids: IdAllocator::new(),
                closed: OnceLock::new(),
                config,
            }),
        }
    }

    /// Start a message whose body is written incrementally.
    pub fn open(&self, header: &MessageHeader) -> Result<OutgoingMessage<W>> {
        if let Some(reason) = self.shared.closed.get() {
            return Err(MessageError::Aborted(reason.clone()));
        }
        let id = self.shared.ids.allocate()?;
        let state = OutboundMessage::new(header, id.id(), &self.shared.config)?;
        debug!(id = id.id(), message_type = header.message_type(), "outbound message opened");
        Ok(OutgoingMessage {
            sender: self.clone(),
            id,
            state,
        })
    }

    /// Send a complete message; returns its id.
    pub fn send(&self, header: &MessageHeader, body: &[u8]) -> Result<u32> {
        let mut message = self.open(header)?;
        let blocks = message.state.push(body, true)?;
        self.write_blocks(&blocks)?;
        Ok(message.id())
    }

    /// Stream a message body from `reader` until EOF; returns its id.
    pub fn send_reader(&self, header: &MessageHeader, mut reader: impl Read) -> Result<u32> {
        let mut message = self.open(header)?;
        let mut buf = vec![0u8; self.shared.config.max_frame_length];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => message.write(&buf[..n])?,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err).into()),
            }
        }
        message.finish()
    }

    /// Stop sending. Open messages fail with `Aborted` on their next write;
    /// no end frame is sent for them.
    pub fn close(&self) {
        self.close_with(AbortReason::LocalClose);
    }

    /// Stop sending, recording why. The first reason wins.
    pub fn close_with(&self, reason: AbortReason) {
        if self.shared.closed.set(reason.clone()).is_ok() {
            debug!(%reason, in_flight = self.shared.ids.in_flight(), "sender closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.get().is_some()
    }

    pub fn config(&self) -> &FrameConfig {
        &self.shared.config
    }

    /// Ids of outbound messages not yet finished.
    pub fn ids(&self) -> &IdAllocator {
        &self.shared.ids
    }

    fn write_blocks(&self, blocks: &[Bytes]) -> Result<()> {
        for block in blocks {
            let mut writer = self
                .shared
                .writer
                .lock()
                .map_err(|_| MessageError::Disconnected("frame writer lock poisoned".to_string()))?;
            if let Some(reason) = self.shared.closed.get() {
                return Err(MessageError::Aborted(reason.clone()));
            }
            if let Err(err) = writer.write_block(block) {
                drop(writer);
                warn!(%err, "frame write failed; closing sender");
                self.close_with(match &err {
                    FrameError::ConnectionClosed => AbortReason::ChannelClosed,
                    other => AbortReason::Io(other.to_string()),
                });
                return Err(err.into());
            }
        }
        Ok(())
    }
}

/// An outbound message being written.
///
/// Dropping it before [`OutgoingMessage::finish`] sends nothing further; the
/// peer never sees an end frame for it.
pub struct OutgoingMessage<W: Write + Send = Channel> {
    sender: Sender<W>,
    id: AllocatedId,
    state: OutboundMessage,
}

impl<W: Write + Send> OutgoingMessage<W> {
    pub fn id(&self) -> u32 {
        self.id.id()
    }

    /// Send the next part of the body.
    pub fn write(&mut self, chunk: &[u8]) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        let blocks = self.state.push(chunk, false)?;
        self.sender.write_blocks(&blocks)
    }

    /// Send the end frame and release the id.
    pub fn finish(mut self) -> Result<u32> {
        let blocks = self.state.finish()?;
        self.sender.write_blocks(&blocks)?;
        debug!(id = self.id(), "outbound message finished");
        Ok(self.id())
    }
}

impl<W: Write + Send> Write for OutgoingMessage<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        OutgoingMessage::write(self, buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<W: Write + Send> Drop for OutgoingMessage<W> {
    fn drop(&mut self) {
        if !self.state.is_finished() {
            debug!(id = self.id(), "outbound message dropped before its end frame");
        }
    }
}
