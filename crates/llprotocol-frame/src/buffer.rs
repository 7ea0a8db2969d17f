//! Logical view over a sequence of received chunks.
//!
//! Indexes are logical offsets into the concatenation of every chunk ever
//! pushed. They stay valid across chunk boundaries and across
//! [`BufferView::drop_consumed`], so a scanner can remember a position while
//! the bytes in front of it are released.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

use crate::error::{FrameError, Result};

#[derive(Debug, Clone)]
struct Chunk {
    start: usize,
    bytes: Bytes,
}

impl Chunk {
    fn end(&self) -> usize {
        self.start + self.bytes.len()
    }
}

/// Chunks held in arrival order, addressed by logical offset.
#[derive(Debug, Clone, Default)]
pub struct BufferView {
    chunks: VecDeque<Chunk>,
    released: usize,
    len: usize,
}

impl BufferView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk. Empty chunks are ignored.
    pub fn push(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        let start = self.len;
        self.len += chunk.len();
        self.chunks.push_back(Chunk {
            start,
            bytes: chunk,
        });
    }

    /// Logical length: every byte ever pushed, released or not.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes still held (not yet released by `drop_consumed`).
    pub fn retained(&self) -> usize {
        self.len - self.released
    }

    /// First logical index still readable.
    pub fn released(&self) -> usize {
        self.released
    }

    /// Byte at a logical index, or `None` if released or past the end.
    pub fn byte_at(&self, index: usize) -> Option<u8> {
        let (chunk, offset) = self.locate(index)?;
        Some(self.chunks[chunk].bytes[offset])
    }

    /// Every logical index at or after `from` holding `byte`.
    pub fn indexes_of(&self, byte: u8, from: usize) -> Vec<usize> {
        self.bytes_from(from)
            .filter(|(_, b)| *b == byte)
            .map(|(index, _)| index)
            .collect()
    }

    /// Start indexes of non-overlapping occurrences of `seq`, leftmost first.
    pub fn indexes_of_sequence(&self, seq: &[u8], from: usize) -> Vec<usize> {
        let Some(&first) = seq.first() else {
            return Vec::new();
        };
        let mut found = Vec::new();
        let mut next_free = from;
        for start in self.indexes_of(first, from) {
            if start < next_free {
                continue;
            }
            if self.matches_at(start, seq) {
                found.push(start);
                next_free = start + seq.len();
            }
        }
        found
    }

    /// A view over `[start, end)` sharing the same chunk storage.
    ///
    /// The returned view is re-based: its logical index 0 is `start`.
    pub fn slice(&self, start: usize, end: usize) -> Result<BufferView> {
        if start > end || start < self.released || end > self.len {
            return Err(FrameError::OutOfRange {
                start,
                end,
                available_start: self.released,
                available_end: self.len,
            });
        }
        let mut view = BufferView::new();
        for chunk in &self.chunks {
            if chunk.end() <= start {
                continue;
            }
            if chunk.start >= end {
                break;
            }
            let from = start.max(chunk.start) - chunk.start;
            let to = end.min(chunk.end()) - chunk.start;
            view.push(chunk.bytes.slice(from..to));
        }
        Ok(view)
    }

    /// The retained bytes as one contiguous block.
    ///
    /// Zero-copy when a single chunk is held.
    pub fn materialize(&self) -> Bytes {
        match self.chunks.len() {
            0 => Bytes::new(),
            1 => self.chunks[0].bytes.clone(),
            _ => {
                let mut out = BytesMut::with_capacity(self.retained());
                for chunk in &self.chunks {
                    out.extend_from_slice(&chunk.bytes);
                }
                out.freeze()
            }
        }
    }

    /// Release every byte before logical index `up_to`.
    pub fn drop_consumed(&mut self, up_to: usize) {
        let up_to = up_to.min(self.len);
        if up_to <= self.released {
            return;
        }
        while let Some(front) = self.chunks.front_mut() {
            if front.end() <= up_to {
                self.chunks.pop_front();
                continue;
            }
            if front.start < up_to {
                front.bytes = front.bytes.slice(up_to - front.start..);
                front.start = up_to;
            }
            break;
        }
        self.released = up_to;
    }

    /// Retained chunks in order.
    pub fn chunks(&self) -> impl Iterator<Item = &Bytes> + '_ {
        self.chunks.iter().map(|chunk| &chunk.bytes)
    }

    /// Consume the view, yielding its retained chunks.
    pub fn into_chunks(self) -> impl Iterator<Item = Bytes> {
        self.chunks.into_iter().map(|chunk| chunk.bytes)
    }

    fn locate(&self, index: usize) -> Option<(usize, usize)> {
        if index < self.released || index >= self.len {
            return None;
        }
        let pos = self.chunks.partition_point(|chunk| chunk.end() <= index);
        let chunk = self.chunks.get(pos)?;
        Some((pos, index - chunk.start))
    }

    fn bytes_from(&self, from: usize) -> impl Iterator<Item = (usize, u8)> + '_ {
        let from = from.max(self.released);
        self.chunks.iter().flat_map(move |chunk| {
            let skip = from.saturating_sub(chunk.start);
            chunk
                .bytes
                .iter()
                .enumerate()
                .skip(skip)
                .map(move |(offset, byte)| (chunk.start + offset, *byte))
        })
    }

    fn matches_at(&self, start: usize, seq: &[u8]) -> bool {
        if start < self.released || start + seq.len() > self.len {
            return false;
        }
        self.bytes_from(start)
            .zip(seq)
            .all(|((_, byte), expected)| byte == *expected)
    }
}

impl From<Bytes> for BufferView {
    fn from(chunk: Bytes) -> Self {
        let mut view = BufferView::new();
        view.push(chunk);
        view
    }
}
