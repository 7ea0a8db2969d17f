//! Inbound reassembly: frames in, routed message bodies out.
//!
//! Each message id moves through collecting-header, streaming-body and
//! retired. Frames of different ids may interleave freely; frames of one id
//! must arrive with consecutive indexes.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;
use llprotocol_frame::{
    BufferView, DelimiterScanner, Frame, FrameConfig, FrameError, FrameSplitter,
};
use tracing::{debug, warn};

use crate::error::{MessageError, Result};
use crate::header::MessageHeader;
use crate::router::MessageRouter;
use crate::sink::{AbortReason, MessageSink};

/// Default cap on buffered header bytes per message.
pub const DEFAULT_MAX_HEADER_LENGTH: usize = 64 * 1024;

/// Default cap on body bytes held for paused messages before reading stops.
pub const DEFAULT_MAX_HELD_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ReassemblyConfig {
    /// Header bytes collected without a header delimiter before the message is rejected.
    pub max_header_length: usize,
    /// Held bytes across all paused messages above which the engine reports backpressure.
    pub max_held_bytes: usize,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            max_header_length: DEFAULT_MAX_HEADER_LENGTH,
            max_held_bytes: DEFAULT_MAX_HELD_BYTES,
        }
    }
}

/// Observable state changes of inbound messages.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Header decoded and routed; body bytes follow.
    Opened { id: u32, header: MessageHeader },
    /// End frame delivered to the sink.
    Completed { id: u32, body_len: u64 },
    /// The header could not be decoded; the rest of the message is discarded.
    HeaderRejected { id: u32, reason: String },
    /// The sink stopped accepting; later chunks are held until it has
    /// capacity again. `held_bytes` is what was held when the pause began.
    BackpressureExceeded { id: u32, held_bytes: usize },
    /// Held chunks were flushed after the sink regained capacity.
    Resumed { id: u32 },
}

impl InboundEvent {
    pub fn id(&self) -> u32 {
        match self {
            InboundEvent::Opened { id, .. }
            | InboundEvent::Completed { id, .. }
            | InboundEvent::HeaderRejected { id, .. }
            | InboundEvent::BackpressureExceeded { id, .. }
            | InboundEvent::Resumed { id } => *id,
        }
    }

    /// The per-message error carried by a rejected header.
    pub fn to_error(&self) -> Option<MessageError> {
        match self {
            InboundEvent::HeaderRejected { id, reason } => Some(MessageError::HeaderParse {
                id: *id,
                reason: reason.clone(),
            }),
            _ => None,
        }
    }
}

struct Streaming {
    sink: Box<dyn MessageSink>,
    held: VecDeque<Bytes>,
    held_bytes: usize,
    paused: bool,
    reported: bool,
    body_len: u64,
}

impl Streaming {
    fn new(sink: Box<dyn MessageSink>) -> Self {
        Self {
            sink,
            held: VecDeque::new(),
            held_bytes: 0,
            paused: false,
            reported: false,
            body_len: 0,
        }
    }

    fn is_drained(&self) -> bool {
        !self.paused && self.held.is_empty()
    }

    fn forward(
        &mut self,
        id: u32,
        chunk: Bytes,
        held_total: &mut usize,
        events: &mut Vec<InboundEvent>,
    ) {
        if chunk.is_empty() {
            return;
        }
        self.body_len += chunk.len() as u64;
        if !self.is_drained() {
            self.held_bytes += chunk.len();
            *held_total += chunk.len();
            self.held.push_back(chunk);
            self.report_pause(id, events);
            return;
        }
        if !self.sink.write(chunk) {
            self.paused = true;
            self.report_pause(id, events);
        }
    }

    fn report_pause(&mut self, id: u32, events: &mut Vec<InboundEvent>) {
        if self.reported {
            return;
        }
        self.reported = true;
        warn!(id, held_bytes = self.held_bytes, "message sink is full; pausing body");
        events.push(InboundEvent::BackpressureExceeded {
            id,
            held_bytes: self.held_bytes,
        });
    }

    fn try_resume(&mut self, id: u32, held_total: &mut usize, events: &mut Vec<InboundEvent>) {
        if !self.paused || !self.sink.has_capacity() {
            return;
        }
        self.paused = false;
        while let Some(chunk) = self.held.pop_front() {
            self.held_bytes -= chunk.len();
            *held_total -= chunk.len();
            if !self.sink.write(chunk) {
                self.paused = true;
                break;
            }
        }
        if self.is_drained() && self.reported {
            self.reported = false;
            debug!(id, "message sink resumed");
            events.push(InboundEvent::Resumed { id });
        }
    }

    fn complete(mut self, id: u32, events: &mut Vec<InboundEvent>) {
        self.sink.end();
        debug!(id, body_len = self.body_len, "message completed");
        events.push(InboundEvent::Completed {
            id,
            body_len: self.body_len,
        });
    }
}

enum EntryState {
    CollectingHeader {
        pending: BufferView,
        scanner: DelimiterScanner,
    },
    Streaming(Streaming),
    Discarding,
}

struct Entry {
    next_index: u32,
    state: EntryState,
}

/// Demultiplexes frames into routed messages.
///
/// Sans-io: feed raw chunks with [`Reassembler::push_chunk`] or decoded
/// frames with [`Reassembler::push_frame`]. Any `Err` is fatal for the
/// channel; every open message has already been aborted when it returns.
pub struct Reassembler<R> {
    router: R,
    splitter: FrameSplitter,
    header_scanner: DelimiterScanner,
    entries: HashMap<u32, Entry>,
    finishing: Vec<(u32, Streaming)>,
    held_total: usize,
    config: ReassemblyConfig,
}

impl<R: MessageRouter> Reassembler<R> {
    pub fn new(router: R, frame_config: &FrameConfig, config: ReassemblyConfig) -> Result<Self> {
        Ok(Self {
            router,
            splitter: FrameSplitter::new(frame_config)?,
            header_scanner: DelimiterScanner::with_mode(
                [&frame_config.header_delimiter],
                frame_config.scan_mode,
            )?,
            entries: HashMap::new(),
            finishing: Vec::new(),
            held_total: 0,
            config,
        })
    }

    /// Feed the next raw chunk read from the channel.
    pub fn push_chunk(&mut self, chunk: Bytes) -> Result<Vec<InboundEvent>> {
        let frames = match self.splitter.push(chunk) {
            Ok(frames) => frames,
            Err(err) => return Err(self.fail(err.into())),
        };
        let mut events = Vec::new();
        for frame in frames {
            if let Err(err) = self.accept(frame, &mut events) {
                return Err(self.fail(err));
            }
        }
        Ok(events)
    }

    /// Feed one already split frame.
    pub fn push_frame(&mut self, frame: Frame) -> Result<Vec<InboundEvent>> {
        let mut events = Vec::new();
        match self.accept(frame, &mut events) {
            Ok(()) => Ok(events),
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Retry paused sinks, flushing held chunks where capacity returned.
    pub fn poll_paused(&mut self) -> Vec<InboundEvent> {
        let mut events = Vec::new();
        for (id, entry) in self.entries.iter_mut() {
            if let EntryState::Streaming(streaming) = &mut entry.state {
                streaming.try_resume(*id, &mut self.held_total, &mut events);
            }
        }
        let mut waiting = Vec::new();
        for (id, mut streaming) in self.finishing.drain(..) {
            streaming.try_resume(id, &mut self.held_total, &mut events);
            if streaming.is_drained() {
                streaming.complete(id, &mut events);
            } else {
                waiting.push((id, streaming));
            }
        }
        self.finishing = waiting;
        events
    }

    /// True while held bytes exceed the configured cap; stop reading until it clears.
    pub fn is_backpressured(&self) -> bool {
        self.held_total > self.config.max_held_bytes
    }

    /// True while some message waits on a sink without capacity; call
    /// [`Reassembler::poll_paused`] until it clears.
    pub fn has_paused(&self) -> bool {
        !self.finishing.is_empty()
            || self.entries.values().any(|entry| {
                matches!(&entry.state, EntryState::Streaming(streaming) if streaming.paused)
            })
    }

    /// Body bytes currently held for paused messages.
    pub fn held_bytes(&self) -> usize {
        self.held_total
    }

    /// Messages opened but not yet retired.
    pub fn open_messages(&self) -> usize {
        self.entries.len() + self.finishing.len()
    }

    /// Retire every message. Live sinks are aborted, never ended.
    pub fn abort_all(&mut self, reason: AbortReason) {
        let mut aborted = 0usize;
        for (id, entry) in self.entries.drain() {
            if let EntryState::Streaming(mut streaming) = entry.state {
                debug!(id, %reason, "aborting inbound message");
                streaming.sink.abort(reason.clone());
                aborted += 1;
            }
        }
        for (id, mut streaming) in self.finishing.drain(..) {
            debug!(id, %reason, "aborting inbound message");
            streaming.sink.abort(reason.clone());
            aborted += 1;
        }
        self.held_total = 0;
        if aborted > 0 {
            debug!(aborted, %reason, "inbound messages aborted");
        }
    }

    pub fn router(&self) -> &R {
        &self.router
    }

    pub fn router_mut(&mut self) -> &mut R {
        &mut self.router
    }

    fn fail(&mut self, err: MessageError) -> MessageError {
        warn!(%err, "inbound stream failed");
        self.abort_all(AbortReason::Framing(err.to_string()));
        err
    }

    fn accept(&mut self, frame: Frame, events: &mut Vec<InboundEvent>) -> Result<()> {
        if self.held_total > 0 || !self.finishing.is_empty() {
            events.extend(self.poll_paused());
        }

        let Frame { header, payload } = frame;
        let mut entry = match self.entries.remove(&header.id) {
            Some(entry) => entry,
            None => self.open(header.id, header.index, &payload)?,
        };
        if header.index != entry.next_index {
            let expected = entry.next_index;
            self.entries.insert(header.id, entry);
            return Err(FrameError::OutOfSequence {
                id: header.id,
                expected,
                got: header.index,
            }
            .into());
        }
        entry.next_index = entry.next_index.wrapping_add(1);

        let id = header.id;
        let end = header.end;
        let state = match entry.state {
            EntryState::CollectingHeader {
                mut pending,
                mut scanner,
            } => {
                let found = scanner.feed(&payload).into_iter().next();
                pending.push(payload);
                match found {
                    Some(found) if found.start > self.config.max_header_length => {
                        self.reject(id, self.header_too_long(), end, events)
                    }
                    Some(found) => {
                        let header_bytes = pending.slice(0, found.start)?.materialize();
                        let body = pending.slice(found.end, pending.len())?;
                        match MessageHeader::from_slice(&header_bytes) {
                            Ok(header) => self.start_body(id, header, body, end, events),
                            Err(err) => self.reject(id, err.to_string(), end, events),
                        }
                    }
                    None if end => self.reject(
                        id,
                        "message ended before its header delimiter".to_string(),
                        true,
                        events,
                    ),
                    None if pending.len() > self.config.max_header_length => {
                        self.reject(id, self.header_too_long(), false, events)
                    }
                    None => Some(EntryState::CollectingHeader { pending, scanner }),
                }
            }
            EntryState::Streaming(mut streaming) => {
                streaming.try_resume(id, &mut self.held_total, events);
                streaming.forward(id, payload, &mut self.held_total, events);
                self.settle(id, streaming, end, events)
            }
            EntryState::Discarding => {
                if end {
                    debug!(id, "rejected message finished");
                    None
                } else {
                    Some(EntryState::Discarding)
                }
            }
        };

        if let Some(state) = state {
            entry.state = state;
            self.entries.insert(id, entry);
        }
        Ok(())
    }

    fn open(&mut self, id: u32, index: u32, payload: &[u8]) -> Result<Entry> {
        if index != 1 {
            let opens_header = payload
                .iter()
                .find(|byte| !byte.is_ascii_whitespace())
                .is_some_and(|byte| *byte == b'{');
            if !opens_header {
                return Err(FrameError::UnknownFrameId { id, index }.into());
            }
            warn!(id, index, "frame for unknown id starts a header; opening message");
        }
        debug!(id, "message opened");
        Ok(Entry {
            next_index: index,
            state: EntryState::CollectingHeader {
                pending: BufferView::new(),
                scanner: self.header_scanner.clone(),
            },
        })
    }

    fn start_body(
        &mut self,
        id: u32,
        header: MessageHeader,
        body: BufferView,
        end: bool,
        events: &mut Vec<InboundEvent>,
    ) -> Option<EntryState> {
        debug!(id, message_type = header.message_type(), "message header received");
        let sink = self.router.route(id, &header);
        events.push(InboundEvent::Opened { id, header });

        let mut streaming = Streaming::new(sink);
        for chunk in body.into_chunks() {
            streaming.forward(id, chunk, &mut self.held_total, events);
        }
        self.settle(id, streaming, end, events)
    }

    // Keep a streaming message open, or complete it on its end frame.
    fn settle(
        &mut self,
        id: u32,
        streaming: Streaming,
        end: bool,
        events: &mut Vec<InboundEvent>,
    ) -> Option<EntryState> {
        if !end {
            return Some(EntryState::Streaming(streaming));
        }
        if streaming.is_drained() {
            streaming.complete(id, events);
        } else {
            debug!(id, held = streaming.held_bytes, "end frame waiting on paused sink");
            self.finishing.push((id, streaming));
        }
        None
    }

    fn reject(
        &mut self,
        id: u32,
        reason: String,
        end: bool,
        events: &mut Vec<InboundEvent>,
    ) -> Option<EntryState> {
        warn!(id, %reason, "rejecting message header");
        events.push(InboundEvent::HeaderRejected { id, reason });
        if end {
            None
        } else {
            Some(EntryState::Discarding)
        }
    }

    fn header_too_long(&self) -> String {
        format!(
            "header exceeds {} bytes without a header delimiter",
            self.config.max_header_length
        )
    }
}
