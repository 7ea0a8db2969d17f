use bytes::{Bytes, BytesMut};
use llprotocol_frame::{
    encode_frame, BufferView, DelimiterMatch, DelimiterScanner, FrameConfig, FrameHeader,
    FrameSplitter, ScanMode, DEFAULT_FRAME_DELIMITER, DEFAULT_HEADER_DELIMITER,
};
use proptest::prelude::*;

fn scan(mode: ScanMode, delimiters: &[Vec<u8>], stream: &[u8], cuts: &[usize]) -> Vec<DelimiterMatch> {
    let mut scanner = DelimiterScanner::with_mode(delimiters, mode).unwrap();
    let mut found = Vec::new();
    let mut offset = 0;
    for &cut in cuts {
        let end = cut.clamp(offset, stream.len());
        found.extend(scanner.feed(&stream[offset..end]));
        offset = end;
    }
    found.extend(scanner.feed(&stream[offset..]));
    found
}

// Byte alphabet kept tiny so delimiters actually occur in random streams.
fn small_bytes(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(0u8..3, 0..max_len)
}

fn sorted_cuts(max: usize) -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(0..=max, 0..12).prop_map(|mut cuts| {
        cuts.sort_unstable();
        cuts
    })
}

fn protocol_delimiters() -> Vec<Vec<u8>> {
    vec![
        DEFAULT_FRAME_DELIMITER.to_vec(),
        DEFAULT_HEADER_DELIMITER.to_vec(),
    ]
}

proptest! {
    #[test]
    fn chunking_does_not_change_matches(
        stream in small_bytes(400),
        cuts in sorted_cuts(400),
    ) {
        let delimiters = vec![vec![0, 1, 1, 0], vec![2, 2, 2]];
        let whole = scan(ScanMode::EveryByte, &delimiters, &stream, &[]);
        let chunked = scan(ScanMode::EveryByte, &delimiters, &stream, &cuts);
        prop_assert_eq!(chunked, whole);
    }

    #[test]
    fn skip_mode_equals_every_byte(
        stream in small_bytes(400),
        cuts in sorted_cuts(400),
    ) {
        let delimiters = vec![vec![0, 1, 1, 0], vec![2, 2, 2], vec![1, 0, 2, 2, 1]];
        let every = scan(ScanMode::EveryByte, &delimiters, &stream, &cuts);
        let skip = scan(ScanMode::Skip, &delimiters, &stream, &cuts);
        prop_assert_eq!(skip, every);
    }

    #[test]
    fn skip_mode_equals_every_byte_on_protocol_delimiters(
        stream in prop::collection::vec(prop_oneof![Just(0u8), Just(1u8)], 0..600),
        cuts in sorted_cuts(600),
    ) {
        let delimiters = protocol_delimiters();
        let every = scan(ScanMode::EveryByte, &delimiters, &stream, &cuts);
        let skip = scan(ScanMode::Skip, &delimiters, &stream, &cuts);
        prop_assert_eq!(skip, every);
    }

    #[test]
    fn scanner_agrees_with_buffer_view_search(
        stream in small_bytes(300),
        cuts in sorted_cuts(300),
    ) {
        let delimiter = vec![0u8, 1, 1, 0];
        let starts: Vec<usize> = scan(ScanMode::EveryByte, &[delimiter.clone()], &stream, &cuts)
            .into_iter()
            .map(|m| m.start)
            .collect();

        let mut view = BufferView::new();
        let mut offset = 0;
        for &cut in &cuts {
            let end = cut.clamp(offset, stream.len());
            view.push(Bytes::copy_from_slice(&stream[offset..end]));
            offset = end;
        }
        view.push(Bytes::copy_from_slice(&stream[offset..]));
        prop_assert_eq!(view.indexes_of_sequence(&delimiter, 0), starts);
    }

    #[test]
    fn text_frames_split_identically_under_any_chunking(
        payloads in prop::collection::vec("[a-z {}\":,]{0,40}", 1..8),
        cuts in sorted_cuts(400),
        skip in any::<bool>(),
    ) {
        let mode = if skip { ScanMode::Skip } else { ScanMode::EveryByte };
        let config = FrameConfig::default().with_scan_mode(mode);
        let mut wire = BytesMut::new();
        for (i, payload) in payloads.iter().enumerate() {
            let header = FrameHeader::new(7, i as u32 + 1, i + 1 == payloads.len());
            encode_frame(&header, payload.as_bytes(), &config.frame_delimiter, &mut wire);
        }
        let wire = wire.freeze();

        let mut splitter = FrameSplitter::new(&config).unwrap();
        let mut frames = Vec::new();
        let mut offset = 0;
        for &cut in &cuts {
            let end = cut.clamp(offset, wire.len());
            frames.extend(splitter.push(wire.slice(offset..end)).unwrap());
            offset = end;
        }
        frames.extend(splitter.push(wire.slice(offset..)).unwrap());

        prop_assert_eq!(frames.len(), payloads.len());
        for (i, (frame, payload)) in frames.iter().zip(&payloads).enumerate() {
            prop_assert_eq!(frame.index(), i as u32 + 1);
            prop_assert_eq!(frame.payload.as_ref(), payload.as_bytes());
        }
        prop_assert!(!splitter.has_partial());
    }
}
