use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use llprotocol_frame::FrameConfig;
use llprotocol_message::{
    CompletedMessage, Delivery, MessageError, MessageHeader, OutboundMessage, Reassembler,
    ReassemblyConfig, Router,
};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;

fn config() -> FrameConfig {
    FrameConfig::default().with_max_frame_length(8)
}

fn blocks(
    id: u32,
    message_type: &str,
    body: &[u8],
    config: &FrameConfig,
) -> Result<Vec<Bytes>, MessageError> {
    let mut message = OutboundMessage::new(&MessageHeader::new(message_type), id, config)?;
    message.push(body, true)
}

// Merge two block lists, keeping each list's own order.
fn interleave(a: Vec<Bytes>, b: Vec<Bytes>, picks: &[bool]) -> Vec<Bytes> {
    let mut a = a.into_iter().peekable();
    let mut b = b.into_iter().peekable();
    let mut picks = picks.iter().copied().cycle();
    let mut out = Vec::new();
    loop {
        let take_a = match (a.peek(), b.peek()) {
            (None, None) => break,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (Some(_), Some(_)) => picks.next().unwrap_or(true),
        };
        out.extend(if take_a { a.next() } else { b.next() });
    }
    out
}

// Feed the wire in `chunk`-sized reads and collect what the router delivers.
fn receive(wire: Vec<Bytes>, chunk: usize, config: &FrameConfig) -> Vec<CompletedMessage> {
    let received: Arc<Mutex<Vec<CompletedMessage>>> = Arc::default();
    let sink = Arc::clone(&received);
    let router = Router::new().on_any(Delivery::buffered(move |m| sink.lock().unwrap().push(m)));
    let mut engine = Reassembler::new(router, config, ReassemblyConfig::default()).unwrap();

    let mut joined = BytesMut::new();
    for block in wire {
        joined.extend_from_slice(&block);
    }
    let joined = joined.freeze();
    let mut offset = 0;
    while offset < joined.len() {
        let end = (offset + chunk).min(joined.len());
        engine.push_chunk(joined.slice(offset..end)).unwrap();
        offset = end;
    }
    assert_eq!(engine.open_messages(), 0);
    drop(engine);

    let received = received.lock().unwrap();
    received.clone()
}

fn check_pair(
    received: &[CompletedMessage],
    first: &[u8],
    second: &[u8],
) -> Result<(), TestCaseError> {
    prop_assert_eq!(received.len(), 2);
    for message in received {
        let expected = if message.id == 1 { first } else { second };
        let expected_type = if message.id == 1 { "first" } else { "second" };
        prop_assert_eq!(message.header.message_type(), expected_type);
        prop_assert_eq!(message.body.as_ref(), expected);
    }
    Ok(())
}

fn body() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(b'a'..=b'z', 0..80)
}

// Bodies drawn from the delimiter alphabet hit every near-miss of the
// default delimiters.
fn binary_body() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(0u8..=1, 0..200)
}

proptest! {
    #[test]
    fn interleaved_messages_decode_intact(
        first in body(),
        second in body(),
        picks in prop::collection::vec(any::<bool>(), 1..32),
        chunk in 1usize..64,
    ) {
        let config = config();
        let wire = interleave(
            blocks(1, "first", &first, &config).unwrap(),
            blocks(2, "second", &second, &config).unwrap(),
            &picks,
        );
        check_pair(&receive(wire, chunk, &config), &first, &second)?;
    }

    #[test]
    fn delimiter_alphabet_bodies_decode_intact_or_are_refused(
        first in binary_body(),
        second in binary_body(),
        picks in prop::collection::vec(any::<bool>(), 1..32),
        chunk in 1usize..64,
        max_frame_length in 1usize..40,
    ) {
        let config = FrameConfig::default().with_max_frame_length(max_frame_length);
        let encoded = blocks(1, "first", &first, &config)
            .and_then(|a| Ok((a, blocks(2, "second", &second, &config)?)));
        let (a, b) = match encoded {
            Ok(pair) => pair,
            Err(MessageError::DelimiterCollision { .. }) => return Ok(()),
            Err(err) => return Err(TestCaseError::fail(err.to_string())),
        };
        check_pair(&receive(interleave(a, b, &picks), chunk, &config), &first, &second)?;
    }
}
