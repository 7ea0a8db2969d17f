use bytes::Bytes;
use tracing::trace;

use crate::buffer::BufferView;
use crate::codec::{decode_frame, Frame, HEADER_SIZE};
use crate::config::FrameConfig;
use crate::error::{FrameError, Result};
use crate::scanner::DelimiterScanner;

/// Sans-io frame splitter: raw chunks in, decoded frames out.
///
/// Bytes of an unfinished frame are held as zero-copy chunk references until
/// the closing frame delimiter arrives.
#[derive(Debug, Clone)]
pub struct FrameSplitter {
    scanner: DelimiterScanner,
    pending: BufferView,
    frame_start: usize,
    max_frame_length: usize,
    delimiter_len: usize,
}

impl FrameSplitter {
    pub fn new(config: &FrameConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            scanner: DelimiterScanner::with_mode([&config.frame_delimiter], config.scan_mode)?,
            pending: BufferView::new(),
            frame_start: 0,
            max_frame_length: config.max_frame_length,
            delimiter_len: config.frame_delimiter.len(),
        })
    }

    /// Feed the next chunk of the byte stream.
    ///
    /// Returns every frame completed by this chunk, in order. Any error is
    /// fatal for the stream.
    pub fn push(&mut self, chunk: Bytes) -> Result<Vec<Frame>> {
        if chunk.is_empty() {
            return Ok(Vec::new());
        }
        let matches = self.scanner.feed(&chunk);
        self.pending.push(chunk);

        let mut frames = Vec::with_capacity(matches.len());
        for found in matches {
            let raw = self.pending.slice(self.frame_start, found.start)?.materialize();
            self.frame_start = found.end;
            self.check_size(raw.len().saturating_sub(HEADER_SIZE))?;
            let frame = decode_frame(raw)?;
            trace!(
                id = frame.id(),
                index = frame.index(),
                end = frame.is_end(),
                len = frame.payload.len(),
                "frame"
            );
            frames.push(frame);
        }
        self.pending.drop_consumed(self.frame_start);

        // A partial frame may also hold a partial delimiter.
        let buffered = self.buffered();
        if buffered > HEADER_SIZE + self.max_frame_length + self.delimiter_len {
            return Err(FrameError::PayloadTooLarge {
                size: buffered - HEADER_SIZE,
                max: self.max_frame_length,
            });
        }
        Ok(frames)
    }

    /// Bytes of an incomplete frame currently held.
    pub fn buffered(&self) -> usize {
        self.pending.len() - self.frame_start
    }

    /// True if the stream stopped in the middle of a frame.
    pub fn has_partial(&self) -> bool {
        self.buffered() > 0
    }

    fn check_size(&self, size: usize) -> Result<()> {
        if size > self.max_frame_length {
            return Err(FrameError::PayloadTooLarge {
                size,
                max: self.max_frame_length,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;
    use crate::codec::{encode_frame, FrameHeader};
    use crate::scanner::ScanMode;

    fn wire(frames: &[(FrameHeader, &[u8])], config: &FrameConfig) -> Bytes {
        let mut out = BytesMut::new();
        for (header, payload) in frames {
            encode_frame(header, payload, &config.frame_delimiter, &mut out);
        }
        out.freeze()
    }

    #[test]
    fn splits_frames_in_one_chunk() {
        let config = FrameConfig::default();
        let bytes = wire(
            &[
                (FrameHeader::new(1, 1, false), &b"one"[..]),
                (FrameHeader::new(2, 1, true), &b"two"[..]),
            ],
            &config,
        );
        let mut splitter = FrameSplitter::new(&config).unwrap();
        let frames = splitter.push(bytes).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].payload.as_ref(), b"one");
        assert_eq!(frames[1].header, FrameHeader::new(2, 1, true));
        assert!(!splitter.has_partial());
    }

    #[test]
    fn frames_survive_arbitrary_chunking() {
        for mode in [ScanMode::EveryByte, ScanMode::Skip] {
            let config = FrameConfig::default().with_scan_mode(mode);
            let bytes = wire(
                &[
                    (FrameHeader::new(9, 1, false), &b"alpha"[..]),
                    (FrameHeader::new(9, 2, true), &b""[..]),
                    (FrameHeader::new(4, 1, true), &b"beta"[..]),
                ],
                &config,
            );
            for size in 1..bytes.len() {
                let mut splitter = FrameSplitter::new(&config).unwrap();
                let mut frames = Vec::new();
                let mut offset = 0;
                while offset < bytes.len() {
                    let end = (offset + size).min(bytes.len());
                    frames.extend(splitter.push(bytes.slice(offset..end)).unwrap());
                    offset = end;
                }
                let summary: Vec<(u32, u32, &[u8])> = frames
                    .iter()
                    .map(|f| (f.id(), f.index(), f.payload.as_ref()))
                    .collect();
                assert_eq!(
                    summary,
                    vec![(9, 1, &b"alpha"[..]), (9, 2, &b""[..]), (4, 1, &b"beta"[..])],
                    "{mode:?} chunk size {size}"
                );
            }
        }
    }

    #[test]
    fn single_chunk_payload_is_not_copied() {
        let config = FrameConfig::default();
        let bytes = wire(&[(FrameHeader::new(1, 1, true), &b"payload"[..])], &config);
        let mut splitter = FrameSplitter::new(&config).unwrap();
        let frames = splitter.push(bytes.clone()).unwrap();
        assert_eq!(frames[0].payload.as_ptr(), bytes[HEADER_SIZE..].as_ptr());
    }

    #[test]
    fn short_frame_is_truncated_header() {
        let config = FrameConfig::default();
        let mut chunk = BytesMut::from(&b"abc"[..]);
        chunk.extend_from_slice(&config.frame_delimiter);
        let mut splitter = FrameSplitter::new(&config).unwrap();
        let err = splitter.push(chunk.freeze()).unwrap_err();
        assert!(matches!(err, FrameError::TruncatedHeader { len: 3 }));
    }

    #[test]
    fn oversized_frame_rejected() {
        let config = FrameConfig::default().with_max_frame_length(8);
        let bytes = wire(&[(FrameHeader::new(1, 1, true), &b"123456789"[..])], &config);
        let mut splitter = FrameSplitter::new(&config).unwrap();
        let err = splitter.push(bytes).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 9, max: 8 }));
    }

    #[test]
    fn runaway_partial_frame_rejected() {
        let config = FrameConfig::default().with_max_frame_length(16);
        let mut splitter = FrameSplitter::new(&config).unwrap();
        assert!(splitter.push(Bytes::from(vec![b'x'; 20])).is_ok());
        assert!(splitter.has_partial());
        let err = splitter.push(Bytes::from(vec![b'x'; 30])).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
    }

    #[test]
    fn invalid_config_rejected() {
        let config = FrameConfig::default().with_max_frame_length(0);
        assert!(FrameSplitter::new(&config).is_err());
    }
}
