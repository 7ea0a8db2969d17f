use std::io::ErrorKind;
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use llprotocol_frame::{FrameConfig, FrameError, FrameReader, FrameWriter};
use llprotocol_transport::{Channel, Endpoint, Listener, TransportError};
use tracing::{debug, info, warn};

use crate::error::{MessageError, Result};
use crate::header::MessageHeader;
use crate::outbound::{OutgoingMessage, Sender};
use crate::reassembly::{InboundEvent, Reassembler, ReassemblyConfig};
use crate::router::MessageRouter;
use crate::sink::AbortReason;

/// Default bytes requested from the channel per read.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 8 * 1024;

/// Default interval between sink capacity polls while a message is paused.
pub const DEFAULT_BACKPRESSURE_POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub frame: FrameConfig,
    pub reassembly: ReassemblyConfig,
    pub read_chunk_size: usize,
    /// How often paused sinks are retried. Also bounds how long a read
    /// blocks while any message is paused.
    pub backpressure_poll_interval: Duration,
    /// Receives every [`InboundEvent`] of the connection. Events are dropped
    /// once the receiver is gone.
    pub events: Option<mpsc::Sender<InboundEvent>>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            reassembly: ReassemblyConfig::default(),
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            backpressure_poll_interval: DEFAULT_BACKPRESSURE_POLL_INTERVAL,
            events: None,
        }
    }
}

impl ConnectionConfig {
    pub fn with_frame(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }

    pub fn with_reassembly(mut self, reassembly: ReassemblyConfig) -> Self {
        self.reassembly = reassembly;
        self
    }

    pub fn with_events(mut self, events: mpsc::Sender<InboundEvent>) -> Self {
        self.events = Some(events);
        self
    }
}

/// One channel with a reader thread feeding inbound frames to a router and
/// a [`Sender`] for outbound messages.
///
/// Closing (explicitly, on drop, or because the peer went away) aborts every
/// inbound and outbound message that has not finished.
pub struct Connection {
    sender: Sender,
    control: Channel,
    reader: Option<JoinHandle<Result<()>>>,
    peer: String,
}

impl Connection {
    /// Connect to `endpoint` and start reading.
    pub fn connect<R>(endpoint: &Endpoint, router: R, config: ConnectionConfig) -> Result<Self>
    where
        R: MessageRouter + 'static,
    {
        let channel = Channel::connect(endpoint)?;
        info!(%endpoint, "connected");
        Self::start(channel, router, config)
    }

    /// Accept the next peer on `listener` and start reading.
    pub fn accept<R>(listener: &Listener, router: R, config: ConnectionConfig) -> Result<Self>
    where
        R: MessageRouter + 'static,
    {
        let channel = listener.accept()?;
        info!(peer = channel.peer(), "accepted connection");
        Self::start(channel, router, config)
    }

    /// Run the protocol over an already connected channel.
    pub fn start<R>(channel: Channel, router: R, config: ConnectionConfig) -> Result<Self>
    where
        R: MessageRouter + 'static,
    {
        config.frame.validate()?;
        let peer = channel.peer().to_string();
        let control = channel.try_clone()?;
        let read_half = channel.try_clone()?;

        let writer = FrameWriter::with_config_channel(channel, config.frame.clone())?;
        let sender = Sender::new(writer);
        let reader = FrameReader::with_config_channel(read_half, config.frame.clone())?
            .with_chunk_size(config.read_chunk_size);
        let reassembler = Reassembler::new(router, &config.frame, config.reassembly.clone())?;

        let loop_sender = sender.clone();
        let handle = std::thread::Builder::new()
            .name("llp-reader".to_string())
            .spawn(move || read_loop(reader, reassembler, loop_sender, config))
            .map_err(TransportError::Io)?;

        debug!(%peer, "connection started");
        Ok(Self {
            sender,
            control,
            reader: Some(handle),
            peer,
        })
    }

    /// A cloneable handle for sending from other threads.
    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    pub fn send(&self, header: &MessageHeader, body: &[u8]) -> Result<u32> {
        self.sender.send(header, body)
    }

    pub fn open(&self, header: &MessageHeader) -> Result<OutgoingMessage> {
        self.sender.open(header)
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// True once either side closed the channel.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Close the channel and wait for the reader thread.
    pub fn close(mut self) -> Result<()> {
        self.shutdown();
        self.join()
    }

    /// Block until the peer closes the channel or reading fails.
    pub fn wait(mut self) -> Result<()> {
        self.join()
    }

    fn shutdown(&self) {
        self.sender.close();
        if let Err(err) = self.control.shutdown() {
            debug!(peer = %self.peer, %err, "channel shutdown failed");
        }
    }

    fn join(&mut self) -> Result<()> {
        match self.reader.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| MessageError::Disconnected("reader thread panicked".to_string()))?,
            None => Ok(()),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.reader.is_some() {
            self.shutdown();
            if let Err(err) = self.join() {
                debug!(peer = %self.peer, %err, "reader ended with error");
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn read_loop<R: MessageRouter>(
    mut reader: FrameReader<Channel>,
    mut reassembler: Reassembler<R>,
    sender: Sender,
    config: ConnectionConfig,
) -> Result<()> {
    let poll_interval = config.backpressure_poll_interval.max(Duration::from_millis(1));
    let report = |events: Vec<InboundEvent>| {
        if let Some(tx) = &config.events {
            for event in events {
                let _ = tx.send(event);
            }
        }
    };

    let mut polling = false;
    let result = loop {
        while reassembler.is_backpressured() && !sender.is_closed() {
            std::thread::sleep(poll_interval);
            report(reassembler.poll_paused());
        }

        // Paused sinks are retried on a short read timeout so they drain
        // even when the peer sends nothing more.
        let paused = reassembler.has_paused();
        if paused != polling {
            let timeout = if paused {
                Some(poll_interval)
            } else {
                config.frame.read_timeout
            };
            if let Err(err) = reader.get_ref().set_read_timeout(timeout) {
                break Err(err.into());
            }
            polling = paused;
        }

        match reader.read_frame() {
            Ok(frame) => match reassembler.push_frame(frame) {
                Ok(events) => report(events),
                Err(err) => break Err(err),
            },
            Err(FrameError::Io(err))
                if polling && matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                report(reassembler.poll_paused());
            }
            Err(err) => break Err(MessageError::from(err)),
        }
    };

    let reason = match &result {
        Err(MessageError::Frame(FrameError::ConnectionClosed)) if sender.is_closed() => {
            AbortReason::LocalClose
        }
        Err(MessageError::Frame(FrameError::ConnectionClosed)) => AbortReason::ChannelClosed,
        Err(MessageError::Frame(FrameError::Io(_))) if sender.is_closed() => AbortReason::LocalClose,
        Err(MessageError::Frame(FrameError::Io(err))) => AbortReason::Io(err.to_string()),
        Err(err) => AbortReason::Framing(err.to_string()),
        Ok(()) => AbortReason::ChannelClosed,
    };
    reassembler.abort_all(reason.clone());
    sender.close_with(reason.clone());

    match result {
        Err(MessageError::Frame(FrameError::ConnectionClosed)) => {
            debug!(peer = reader.get_ref().peer(), "channel closed");
            Ok(())
        }
        Err(_) if reason == AbortReason::LocalClose => Ok(()),
        Err(err) => {
            warn!(peer = reader.get_ref().peer(), %err, "closing channel after read failure");
            if let Err(shutdown) = reader.get_ref().shutdown() {
                debug!(%shutdown, "channel shutdown failed");
            }
            Err(err)
        }
        Ok(()) => Ok(()),
    }
}
