use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::Result;
use crate::header::MessageHeader;
use crate::sink::{pipe, BodyReader, BufferedSink, DiscardSink, FanoutSink, MessageSink};

/// Default number of chunks a streaming body may queue before backpressure.
pub const DEFAULT_PIPE_CAPACITY: usize = 64;

/// Picks the sink for each newly opened inbound message.
///
/// Called on the connection's reader thread as soon as a header is decoded.
pub trait MessageRouter: Send {
    fn route(&mut self, id: u32, header: &MessageHeader) -> Box<dyn MessageSink>;
}

impl<F> MessageRouter for F
where
    F: FnMut(u32, &MessageHeader) -> Box<dyn MessageSink> + Send,
{
    fn route(&mut self, id: u32, header: &MessageHeader) -> Box<dyn MessageSink> {
        self(id, header)
    }
}

/// A message whose body is still arriving.
#[derive(Debug)]
pub struct IncomingMessage {
    pub id: u32,
    pub header: MessageHeader,
    pub body: BodyReader,
}

/// A message received in full.
#[derive(Debug, Clone)]
pub struct CompletedMessage {
    pub id: u32,
    pub header: MessageHeader,
    pub body: Bytes,
}

impl CompletedMessage {
    /// Body as UTF-8 text.
    pub fn text(&self) -> std::result::Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.body)
    }

    /// Body decoded as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

pub type StreamingHandler = Arc<dyn Fn(IncomingMessage) + Send + Sync>;
pub type BufferedHandler = Arc<dyn Fn(CompletedMessage) + Send + Sync>;

/// How a subscriber wants to receive a message.
#[derive(Clone)]
pub enum Delivery {
    /// Called on a dedicated thread as soon as the header arrives; the
    /// handler reads the body as it streams in.
    Streaming(StreamingHandler),
    /// Called on the reader thread once the whole body has arrived. Never
    /// called for an aborted message.
    Buffered(BufferedHandler),
}

impl Delivery {
    pub fn streaming(handler: impl Fn(IncomingMessage) + Send + Sync + 'static) -> Self {
        Delivery::Streaming(Arc::new(handler))
    }

    pub fn buffered(handler: impl Fn(CompletedMessage) + Send + Sync + 'static) -> Self {
        Delivery::Buffered(Arc::new(handler))
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Delivery::Streaming(_) => f.write_str("Delivery::Streaming"),
            Delivery::Buffered(_) => f.write_str("Delivery::Buffered"),
        }
    }
}

/// Type-keyed subscriptions plus catch-all subscribers.
///
/// A message goes to every subscriber of its type and every catch-all
/// subscriber, each with its own copy of the body. Messages nobody
/// subscribed to are drained into a [`DiscardSink`].
#[derive(Debug, Clone)]
pub struct Router {
    by_type: HashMap<String, Vec<Delivery>>,
    catch_all: Vec<Delivery>,
    pipe_capacity: usize,
}

impl Default for Router {
    fn default() -> Self {
        Self {
            by_type: HashMap::new(),
            catch_all: Vec::new(),
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
        }
    }
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chunks a streaming subscriber may have queued before the message pauses.
    pub fn with_pipe_capacity(mut self, pipe_capacity: usize) -> Self {
        self.pipe_capacity = pipe_capacity.max(1);
        self
    }

    /// Subscribe to one message type.
    pub fn on(mut self, message_type: impl Into<String>, delivery: Delivery) -> Self {
        self.by_type
            .entry(message_type.into())
            .or_default()
            .push(delivery);
        self
    }

    /// Subscribe to every message regardless of type.
    pub fn on_any(mut self, delivery: Delivery) -> Self {
        self.catch_all.push(delivery);
        self
    }

    pub fn has_subscribers(&self, message_type: &str) -> bool {
        !self.catch_all.is_empty() || self.by_type.contains_key(message_type)
    }

    fn sink_for(&self, id: u32, header: &MessageHeader, delivery: &Delivery) -> Box<dyn MessageSink> {
        match delivery {
            Delivery::Streaming(handler) => {
                let (sink, body) = pipe(self.pipe_capacity);
                let message = IncomingMessage {
                    id,
                    header: header.clone(),
                    body,
                };
                let handler = Arc::clone(handler);
                let spawned = std::thread::Builder::new()
                    .name(format!("llp-msg-{id:08x}"))
                    .spawn(move || handler(message));
                if let Err(err) = spawned {
                    // The body reader went down with the closure; the pipe drains.
                    warn!(id, %err, "failed to spawn streaming handler");
                }
                Box::new(sink)
            }
            Delivery::Buffered(handler) => {
                let handler = Arc::clone(handler);
                let header = header.clone();
                Box::new(BufferedSink::new(move |body| {
                    handler(CompletedMessage { id, header, body })
                }))
            }
        }
    }
}

impl MessageRouter for Router {
    fn route(&mut self, id: u32, header: &MessageHeader) -> Box<dyn MessageSink> {
        let typed = self
            .by_type
            .get(header.message_type())
            .map(Vec::as_slice)
            .unwrap_or_default();
        let mut sinks: Vec<Box<dyn MessageSink>> = typed
            .iter()
            .chain(&self.catch_all)
            .map(|delivery| self.sink_for(id, header, delivery))
            .collect();

        match sinks.len() {
            0 => {
                debug!(id, message_type = header.message_type(), "no subscriber; discarding");
                Box::new(DiscardSink::new(id))
            }
            1 => sinks.remove(0),
            _ => Box::new(FanoutSink::new(sinks)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;

    fn feed(sink: &mut Box<dyn MessageSink>, parts: &[&'static [u8]]) {
        for part in parts {
            sink.write(Bytes::from_static(part));
        }
        sink.end();
    }

    #[test]
    fn buffered_subscriber_gets_whole_body() {
        let (tx, rx) = mpsc::channel();
        let mut router = Router::new().on(
            "someType",
            Delivery::buffered(move |message| tx.send(message).unwrap()),
        );
        let header = MessageHeader::new("someType");
        let mut sink = router.route(11, &header);
        feed(&mut sink, &[b"This is ", b"the content"]);

        let message = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(message.id, 11);
        assert_eq!(message.header.message_type(), "someType");
        assert_eq!(message.text().unwrap(), "This is the content");
    }

    #[test]
    fn streaming_subscriber_reads_on_own_thread() {
        let (tx, rx) = mpsc::channel();
        let mut router = Router::new().on(
            "upload",
            Delivery::streaming(move |mut message| {
                let mut body = Vec::new();
                message.body.read_to_end(&mut body).unwrap();
                tx.send((message.header.message_type().to_string(), body)).unwrap();
            }),
        );
        let mut sink = router.route(1, &MessageHeader::new("upload"));
        feed(&mut sink, &[b"abc", b"def"]);

        let (kind, body) = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(kind, "upload");
        assert_eq!(body, b"abcdef");
    }

    #[test]
    fn catch_all_and_typed_each_get_a_copy() {
        let (tx, rx) = mpsc::channel();
        let typed_tx = tx.clone();
        let mut router = Router::new()
            .on(
                "a",
                Delivery::buffered(move |m| typed_tx.send(("typed", m.body)).unwrap()),
            )
            .on_any(Delivery::buffered(move |m| tx.send(("any", m.body)).unwrap()));

        let mut sink = router.route(2, &MessageHeader::new("a"));
        feed(&mut sink, &[b"xy"]);

        let mut got: Vec<(&str, Bytes)> = (0..2)
            .map(|_| rx.recv_timeout(Duration::from_secs(1)).unwrap())
            .collect();
        got.sort_by_key(|(who, _)| *who);
        assert_eq!(got[0], ("any", Bytes::from_static(b"xy")));
        assert_eq!(got[1], ("typed", Bytes::from_static(b"xy")));
    }

    #[test]
    fn unsubscribed_type_is_discarded() {
        let (tx, rx) = mpsc::channel::<CompletedMessage>();
        let mut router = Router::new().on("a", Delivery::buffered(move |m| tx.send(m).unwrap()));
        assert!(router.has_subscribers("a"));
        assert!(!router.has_subscribers("b"));

        let mut sink = router.route(3, &MessageHeader::new("b"));
        feed(&mut sink, &[b"ignored"]);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn closure_router() {
        let mut routed = Vec::new();
        let mut router = |id: u32, header: &MessageHeader| -> Box<dyn MessageSink> {
            routed.push((id, header.message_type().to_string()));
            Box::new(DiscardSink::new(id))
        };
        let mut sink = MessageRouter::route(&mut router, 5, &MessageHeader::new("t"));
        sink.end();
        drop(router);
        assert_eq!(routed, vec![(5, "t".to_string())]);
    }

    #[test]
    fn json_body_helper() {
        let message = CompletedMessage {
            id: 1,
            header: MessageHeader::new("j"),
            body: Bytes::from_static(br#"{"n":3}"#),
        };
        let value: serde_json::Value = message.json().unwrap();
        assert_eq!(value["n"], 3);
        assert!(message.json::<Vec<u8>>().is_err());
    }
}
