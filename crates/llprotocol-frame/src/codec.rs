use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Frame header: id (4) + index (4) + end flag (1) = 9 bytes.
pub const HEADER_SIZE: usize = 9;

/// End-flag value marking the last frame of a message.
pub const END_MARKER: u8 = 170;

/// End-flag value marking a frame with more to follow.
pub const MORE_MARKER: u8 = 120;

/// Per-frame routing header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameHeader {
    /// Message id shared by every frame of one message.
    pub id: u32,
    /// Position of this frame within its message, starting at 1.
    pub index: u32,
    /// Set on the last frame of a message.
    pub end: bool,
}

impl FrameHeader {
    pub fn new(id: u32, index: u32, end: bool) -> Self {
        Self { id, index, end }
    }

    /// The 9-byte wire form.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.id.to_le_bytes());
        out[4..8].copy_from_slice(&self.index.to_le_bytes());
        out[8] = if self.end { END_MARKER } else { MORE_MARKER };
        out
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_slice(&self.to_bytes());
    }

    /// Decode the leading 9 bytes of `src`.
    pub fn decode(src: &[u8]) -> Result<Self> {
        let Some(raw) = src.get(..HEADER_SIZE) else {
            return Err(FrameError::TruncatedHeader { len: src.len() });
        };
        let end = match raw[8] {
            END_MARKER => true,
            MORE_MARKER => false,
            other => return Err(FrameError::InvalidEndMarker(other)),
        };
        Ok(Self {
            id: u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            index: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
            end,
        })
    }
}

/// One decoded frame: header plus its payload slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(header: FrameHeader, payload: impl Into<Bytes>) -> Self {
        Self {
            header,
            payload: payload.into(),
        }
    }

    pub fn id(&self) -> u32 {
        self.header.id
    }

    pub fn index(&self) -> u32 {
        self.header.index
    }

    pub fn is_end(&self) -> bool {
        self.header.end
    }

    /// Bytes this frame occupies on the wire with the given delimiter.
    pub fn wire_size(&self, delimiter_len: usize) -> usize {
        HEADER_SIZE + self.payload.len() + delimiter_len
    }
}

/// Encode a complete frame block.
///
/// Wire format:
/// ```text
/// ┌───────────┬────────────┬──────────┬──────────────┬─────────────────┐
/// │ Id (4B LE)│ Index      │ End flag │ Payload      │ Frame delimiter │
/// │           │ (4B LE)    │ 170/120  │              │                 │
/// └───────────┴────────────┴──────────┴──────────────┴─────────────────┘
/// ```
///
/// The payload must not contain the delimiter; nothing on the wire escapes it.
pub fn encode_frame(header: &FrameHeader, payload: &[u8], delimiter: &[u8], dst: &mut BytesMut) {
    dst.reserve(HEADER_SIZE + payload.len() + delimiter.len());
    header.encode(dst);
    dst.put_slice(payload);
    dst.put_slice(delimiter);
}

/// Split a delimiter-stripped frame into header and payload.
pub fn decode_frame(mut raw: Bytes) -> Result<Frame> {
    let header = FrameHeader::decode(&raw)?;
    let payload = raw.split_off(HEADER_SIZE);
    Ok(Frame { header, payload })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_FRAME_DELIMITER;

    #[test]
    fn header_layout_is_little_endian() {
        let bytes = FrameHeader::new(0x0403_0201, 0x0807_0605, true).to_bytes();
        assert_eq!(bytes, [1, 2, 3, 4, 5, 6, 7, 8, END_MARKER]);
        let bytes = FrameHeader::new(1, 1, false).to_bytes();
        assert_eq!(bytes, [1, 0, 0, 0, 1, 0, 0, 0, MORE_MARKER]);
    }

    #[test]
    fn header_roundtrip_edges() {
        for id in [0, 1, u32::MAX] {
            for index in [0, 1, u32::MAX] {
                for end in [true, false] {
                    let header = FrameHeader::new(id, index, end);
                    assert_eq!(FrameHeader::decode(&header.to_bytes()).unwrap(), header);
                }
            }
        }
    }

    #[test]
    fn truncated_header_rejected() {
        let err = FrameHeader::decode(&[1, 0, 0, 0, 1, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, FrameError::TruncatedHeader { len: 8 }));
        assert!(err.is_desync());
    }

    #[test]
    fn unknown_end_marker_rejected() {
        let err = FrameHeader::decode(&[1, 0, 0, 0, 1, 0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, FrameError::InvalidEndMarker(0)));
    }

    #[test]
    fn frame_block_layout() {
        let mut wire = BytesMut::new();
        let header = FrameHeader::new(7, 1, true);
        encode_frame(&header, b"hi", &DEFAULT_FRAME_DELIMITER, &mut wire);

        assert_eq!(wire.len(), HEADER_SIZE + 2 + DEFAULT_FRAME_DELIMITER.len());
        assert_eq!(&wire[9..11], b"hi");
        assert_eq!(&wire[11..], &DEFAULT_FRAME_DELIMITER);

        let stripped = wire.freeze().slice(..HEADER_SIZE + 2);
        let frame = decode_frame(stripped).unwrap();
        assert_eq!(frame.header, header);
        assert_eq!(frame.payload.as_ref(), b"hi");
        assert_eq!(frame.wire_size(DEFAULT_FRAME_DELIMITER.len()), 23);
    }

    #[test]
    fn empty_payload_frame() {
        let frame = decode_frame(Bytes::from(FrameHeader::new(3, 2, true).to_bytes().to_vec())).unwrap();
        assert!(frame.is_end());
        assert_eq!((frame.id(), frame.index()), (3, 2));
        assert!(frame.payload.is_empty());
    }
}
