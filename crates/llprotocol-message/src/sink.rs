//! Consumers of message bodies.
//!
//! The reassembly engine forwards body chunks to exactly one
//! [`MessageSink`] per message and finishes it with either `end` or `abort`,
//! never both.

use std::collections::VecDeque;
use std::fmt;
use std::io::{ErrorKind, Read};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use bytes::{Buf, Bytes};
use llprotocol_frame::BufferView;
use tracing::debug;

/// Why a message was cut off before its end frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// The peer closed the channel.
    ChannelClosed,
    /// This side closed the connection.
    LocalClose,
    /// The inbound byte stream lost frame synchronization.
    Framing(String),
    /// Transport I/O failure.
    Io(String),
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::ChannelClosed => f.write_str("channel closed by peer"),
            AbortReason::LocalClose => f.write_str("connection closed locally"),
            AbortReason::Framing(detail) => write!(f, "framing error: {detail}"),
            AbortReason::Io(detail) => write!(f, "i/o error: {detail}"),
        }
    }
}

/// Receives the body of one message.
pub trait MessageSink: Send {
    /// Take the next body chunk.
    ///
    /// Returning `false` asks the caller to hold further chunks until
    /// [`MessageSink::has_capacity`] turns true. The chunk passed in is
    /// taken either way.
    fn write(&mut self, chunk: Bytes) -> bool;

    /// Whether the sink is ready for more chunks after a `false` write.
    fn has_capacity(&mut self) -> bool {
        true
    }

    /// The body is complete.
    fn end(&mut self);

    /// The body will never complete.
    fn abort(&mut self, reason: AbortReason);
}

/// Drains and drops a body nobody subscribed to.
#[derive(Debug)]
pub struct DiscardSink {
    id: u32,
    discarded: u64,
}

impl DiscardSink {
    pub fn new(id: u32) -> Self {
        Self { id, discarded: 0 }
    }

    pub fn discarded(&self) -> u64 {
        self.discarded
    }
}

impl MessageSink for DiscardSink {
    fn write(&mut self, chunk: Bytes) -> bool {
        self.discarded += chunk.len() as u64;
        true
    }

    fn end(&mut self) {
        debug!(id = self.id, bytes = self.discarded, "discarded unrouted message");
    }

    fn abort(&mut self, reason: AbortReason) {
        debug!(id = self.id, bytes = self.discarded, %reason, "unrouted message aborted");
    }
}

/// Collects a whole body and hands it over on `end`.
pub struct BufferedSink {
    parts: BufferView,
    on_complete: Option<Box<dyn FnOnce(Bytes) + Send>>,
}

impl BufferedSink {
    pub fn new(on_complete: impl FnOnce(Bytes) + Send + 'static) -> Self {
        Self {
            parts: BufferView::new(),
            on_complete: Some(Box::new(on_complete)),
        }
    }
}

impl MessageSink for BufferedSink {
    fn write(&mut self, chunk: Bytes) -> bool {
        self.parts.push(chunk);
        true
    }

    fn end(&mut self) {
        if let Some(on_complete) = self.on_complete.take() {
            on_complete(std::mem::take(&mut self.parts).materialize());
        }
    }

    fn abort(&mut self, reason: AbortReason) {
        debug!(bytes = self.parts.len(), %reason, "dropping partial buffered body");
        self.on_complete = None;
        self.parts = BufferView::new();
    }
}

/// Copies every chunk to several sinks.
pub struct FanoutSink {
    sinks: Vec<Box<dyn MessageSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Box<dyn MessageSink>>) -> Self {
        Self { sinks }
    }
}

impl MessageSink for FanoutSink {
    fn write(&mut self, chunk: Bytes) -> bool {
        let mut ready = true;
        for sink in &mut self.sinks {
            ready &= sink.write(chunk.clone());
        }
        ready
    }

    fn has_capacity(&mut self) -> bool {
        let mut ready = true;
        for sink in &mut self.sinks {
            ready &= sink.has_capacity();
        }
        ready
    }

    fn end(&mut self) {
        for sink in &mut self.sinks {
            sink.end();
        }
    }

    fn abort(&mut self, reason: AbortReason) {
        for sink in &mut self.sinks {
            sink.abort(reason.clone());
        }
    }
}

enum Finish {
    End,
    Abort(AbortReason),
}

struct PipeState {
    chunks: VecDeque<Bytes>,
    finish: Option<Finish>,
    reader_gone: bool,
}

struct Pipe {
    state: Mutex<PipeState>,
    readable: Condvar,
    capacity: usize,
}

impl Pipe {
    fn lock(&self) -> MutexGuard<'_, PipeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Create a bounded pipe holding at most `capacity` queued chunks before
/// the writing side reports backpressure.
pub fn pipe(capacity: usize) -> (PipeSink, BodyReader) {
    let pipe = Arc::new(Pipe {
        state: Mutex::new(PipeState {
            chunks: VecDeque::new(),
            finish: None,
            reader_gone: false,
        }),
        readable: Condvar::new(),
        capacity: capacity.max(1),
    });
    (
        PipeSink {
            pipe: Arc::clone(&pipe),
        },
        BodyReader {
            pipe,
            current: Bytes::new(),
        },
    )
}

/// Writing end of a [`pipe`].
pub struct PipeSink {
    pipe: Arc<Pipe>,
}

impl PipeSink {
    fn finish(&mut self, finish: Finish) {
        let mut state = self.pipe.lock();
        if state.finish.is_none() {
            state.finish = Some(finish);
        }
        drop(state);
        self.pipe.readable.notify_all();
    }
}

impl MessageSink for PipeSink {
    fn write(&mut self, chunk: Bytes) -> bool {
        let mut state = self.pipe.lock();
        if state.reader_gone {
            return true;
        }
        state.chunks.push_back(chunk);
        let ready = state.chunks.len() < self.pipe.capacity;
        drop(state);
        self.pipe.readable.notify_all();
        ready
    }

    fn has_capacity(&mut self) -> bool {
        let state = self.pipe.lock();
        state.reader_gone || state.chunks.len() < self.pipe.capacity
    }

    fn end(&mut self) {
        self.finish(Finish::End);
    }

    fn abort(&mut self, reason: AbortReason) {
        self.finish(Finish::Abort(reason));
    }
}

impl Drop for PipeSink {
    fn drop(&mut self) {
        // A sink dropped without end or abort never completed.
        self.finish(Finish::Abort(AbortReason::LocalClose));
    }
}

/// Reading end of a [`pipe`]: a streaming message body.
///
/// Reads block until body bytes arrive. EOF means the message completed;
/// an aborted message yields `ErrorKind::ConnectionAborted` once the queued
/// bytes are consumed.
pub struct BodyReader {
    pipe: Arc<Pipe>,
    current: Bytes,
}

impl BodyReader {
    /// Next body chunk without copying, or `None` at the end of the body.
    pub fn next_chunk(&mut self) -> std::io::Result<Option<Bytes>> {
        if !self.current.is_empty() {
            return Ok(Some(std::mem::take(&mut self.current)));
        }
        let mut state = self.pipe.lock();
        loop {
            if let Some(chunk) = state.chunks.pop_front() {
                return Ok(Some(chunk));
            }
            match &state.finish {
                Some(Finish::End) => return Ok(None),
                Some(Finish::Abort(reason)) => {
                    return Err(std::io::Error::new(
                        ErrorKind::ConnectionAborted,
                        reason.to_string(),
                    ))
                }
                None => {
                    state = self
                        .pipe
                        .readable
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }
}

impl Read for BodyReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.current.is_empty() {
            match self.next_chunk()? {
                Some(chunk) => self.current = chunk,
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.current.len());
        buf[..n].copy_from_slice(&self.current[..n]);
        self.current.advance(n);
        Ok(n)
    }
}

impl Drop for BodyReader {
    fn drop(&mut self) {
        let mut state = self.pipe.lock();
        state.reader_gone = true;
        state.chunks.clear();
    }
}

impl fmt::Debug for BodyReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyReader")
            .field("buffered", &self.current.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    #[test]
    fn pipe_delivers_chunks_then_eof() {
        let (mut sink, mut reader) = pipe(4);
        assert!(sink.write(Bytes::from_static(b"hello ")));
        assert!(sink.write(Bytes::from_static(b"world")));
        sink.end();

        let mut body = String::new();
        reader.read_to_string(&mut body).unwrap();
        assert_eq!(body, "hello world");
    }

    #[test]
    fn pipe_reports_backpressure_at_capacity() {
        let (mut sink, mut reader) = pipe(2);
        assert!(sink.write(Bytes::from_static(b"a")));
        assert!(!sink.write(Bytes::from_static(b"b")));
        assert!(!sink.has_capacity());

        assert_eq!(reader.next_chunk().unwrap().unwrap().as_ref(), b"a");
        assert!(sink.has_capacity());
    }

    #[test]
    fn pipe_abort_surfaces_after_queued_bytes() {
        let (mut sink, mut reader) = pipe(4);
        sink.write(Bytes::from_static(b"partial"));
        sink.abort(AbortReason::ChannelClosed);

        let mut buf = [0u8; 16];
        assert_eq!(reader.read(&mut buf).unwrap(), 7);
        let err = reader.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionAborted);
    }

    #[test]
    fn dropped_sink_aborts_reader() {
        let (sink, mut reader) = pipe(4);
        drop(sink);
        let err = reader.next_chunk().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionAborted);
    }

    #[test]
    fn end_then_drop_is_still_eof() {
        let (mut sink, mut reader) = pipe(4);
        sink.end();
        drop(sink);
        assert!(reader.next_chunk().unwrap().is_none());
    }

    #[test]
    fn dropped_reader_turns_sink_into_drain() {
        let (mut sink, reader) = pipe(1);
        drop(reader);
        for _ in 0..10 {
            assert!(sink.write(Bytes::from_static(b"x")));
        }
        assert!(sink.has_capacity());
    }

    #[test]
    fn reader_blocks_until_data_arrives() {
        let (mut sink, mut reader) = pipe(4);
        let consumer = std::thread::spawn(move || {
            let mut body = Vec::new();
            reader.read_to_end(&mut body).unwrap();
            body
        });
        std::thread::sleep(std::time::Duration::from_millis(10));
        sink.write(Bytes::from_static(b"late"));
        sink.end();
        assert_eq!(consumer.join().unwrap(), b"late");
    }

    #[test]
    fn buffered_sink_delivers_on_end_only() {
        let (tx, rx) = mpsc::channel();
        let mut sink = BufferedSink::new(move |body| tx.send(body).unwrap());
        sink.write(Bytes::from_static(b"ab"));
        sink.write(Bytes::from_static(b"cd"));
        assert!(rx.try_recv().is_err());
        sink.end();
        assert_eq!(rx.recv().unwrap().as_ref(), b"abcd");
    }

    #[test]
    fn buffered_sink_abort_never_delivers() {
        let (tx, rx) = mpsc::channel::<Bytes>();
        let mut sink = BufferedSink::new(move |body| tx.send(body).unwrap());
        sink.write(Bytes::from_static(b"ab"));
        sink.abort(AbortReason::ChannelClosed);
        sink.end();
        assert!(rx.recv().is_err());
    }

    #[test]
    fn fanout_copies_and_combines_capacity() {
        let (left, mut left_reader) = pipe(1);
        let (right, mut right_reader) = pipe(8);
        let mut fanout = FanoutSink::new(vec![Box::new(left), Box::new(right)]);

        assert!(!fanout.write(Bytes::from_static(b"x")));
        assert!(!fanout.has_capacity());
        assert_eq!(left_reader.next_chunk().unwrap().unwrap().as_ref(), b"x");
        assert!(fanout.has_capacity());
        fanout.end();

        assert_eq!(right_reader.next_chunk().unwrap().unwrap().as_ref(), b"x");
        assert!(right_reader.next_chunk().unwrap().is_none());
        assert!(left_reader.next_chunk().unwrap().is_none());
    }

    #[test]
    fn discard_sink_counts_bytes() {
        let mut sink = DiscardSink::new(1);
        assert!(sink.write(Bytes::from_static(b"12345")));
        assert!(sink.write(Bytes::from_static(b"678")));
        sink.end();
        assert_eq!(sink.discarded(), 8);
    }

    #[test]
    fn abort_reason_display() {
        assert_eq!(AbortReason::ChannelClosed.to_string(), "channel closed by peer");
        assert!(AbortReason::Framing("bad marker".into())
            .to_string()
            .contains("bad marker"));
    }
}
