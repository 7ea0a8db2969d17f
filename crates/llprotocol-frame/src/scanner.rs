//! Incremental multi-sequence delimiter search over a chunked stream.
//!
//! The scanner keeps only small per-candidate state between
//! [`DelimiterScanner::feed`] calls, so a delimiter may straddle any number
//! of chunk boundaries. Matches never overlap: once a sequence completes,
//! every other partial candidate is discarded and scanning resumes after it.

use crate::error::{FrameError, Result};

/// How candidate starts are discovered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScanMode {
    /// Every byte is compared against the first byte of each sequence.
    #[default]
    EveryByte,
    /// Only every `shortest`-th byte is probed, then verified backwards.
    ///
    /// Reports exactly the same matches as [`ScanMode::EveryByte`].
    Skip,
}

/// One completed occurrence of a configured sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelimiterMatch {
    /// Position of the sequence in the configured list.
    pub delimiter: usize,
    /// Logical offset of the first byte.
    pub start: usize,
    /// Logical offset one past the last byte.
    pub end: usize,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    delimiter: usize,
    start: usize,
    matched: usize,
}

/// Finds every configured delimiter sequence in a stream fed chunk by chunk.
#[derive(Debug, Clone)]
pub struct DelimiterScanner {
    delimiters: Vec<Vec<u8>>,
    mode: ScanMode,
    shortest: usize,
    // byte value -> (delimiter, position) pairs where that byte occurs
    positions: Vec<Vec<(usize, usize)>>,
    candidates: Vec<Candidate>,
    offset: usize,
    last_match_end: usize,
    lookback: Vec<u8>,
    lookback_cap: usize,
}

impl DelimiterScanner {
    /// Scanner in [`ScanMode::EveryByte`].
    pub fn new<I, D>(delimiters: I) -> Result<Self>
    where
        I: IntoIterator<Item = D>,
        D: AsRef<[u8]>,
    {
        Self::with_mode(delimiters, ScanMode::EveryByte)
    }

    pub fn with_mode<I, D>(delimiters: I, mode: ScanMode) -> Result<Self>
    where
        I: IntoIterator<Item = D>,
        D: AsRef<[u8]>,
    {
        let delimiters: Vec<Vec<u8>> = delimiters
            .into_iter()
            .map(|d| d.as_ref().to_vec())
            .collect();
        let borrowed: Vec<&[u8]> = delimiters.iter().map(Vec::as_slice).collect();
        validate_delimiters(&borrowed)?;

        let mut positions = vec![Vec::new(); 256];
        for (delimiter, seq) in delimiters.iter().enumerate() {
            for (k, byte) in seq.iter().enumerate() {
                positions[usize::from(*byte)].push((delimiter, k));
            }
        }
        let shortest = delimiters.iter().map(Vec::len).min().unwrap_or(1);
        let longest = delimiters.iter().map(Vec::len).max().unwrap_or(1);

        Ok(Self {
            delimiters,
            mode,
            shortest,
            positions,
            candidates: Vec::new(),
            offset: 0,
            last_match_end: 0,
            lookback: Vec::new(),
            lookback_cap: longest - 1,
        })
    }

    pub fn delimiters(&self) -> &[Vec<u8>] {
        &self.delimiters
    }

    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    /// Logical offset of the next byte to be fed.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// True while a partial match is pending at the end of the fed bytes.
    pub fn has_pending(&self) -> bool {
        !self.candidates.is_empty()
    }

    /// Scan the next chunk of the stream, returning matches completed in it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<DelimiterMatch> {
        let mut matches = Vec::new();
        match self.mode {
            ScanMode::EveryByte => self.feed_every_byte(chunk, &mut matches),
            ScanMode::Skip => {
                self.feed_skip(chunk, &mut matches);
                self.remember_tail(chunk);
            }
        }
        self.offset += chunk.len();
        matches
    }

    /// Forget all partial matches and restart offsets at zero.
    pub fn reset(&mut self) {
        self.candidates.clear();
        self.lookback.clear();
        self.offset = 0;
        self.last_match_end = 0;
    }

    fn feed_every_byte(&mut self, chunk: &[u8], matches: &mut Vec<DelimiterMatch>) {
        let base = self.offset;
        for (pos, &byte) in chunk.iter().enumerate() {
            let i = base + pos;
            if !self.candidates.is_empty() {
                if let Some(found) = self.advance(byte, i) {
                    matches.push(found);
                    continue;
                }
            }
            for k in 0..self.positions[usize::from(byte)].len() {
                let (delimiter, position) = self.positions[usize::from(byte)][k];
                if position != 0 {
                    continue;
                }
                if let Some(found) = self.seed(delimiter, i, 1, i) {
                    matches.push(found);
                    break;
                }
            }
        }
    }

    fn feed_skip(&mut self, chunk: &[u8], matches: &mut Vec<DelimiterMatch>) {
        let base = self.offset;
        let mut pos = 0;
        while pos < chunk.len() {
            let i = base + pos;
            let byte = chunk[pos];
            if !self.candidates.is_empty() {
                if let Some(found) = self.advance(byte, i) {
                    matches.push(found);
                    pos = self.next_position(i, base);
                    continue;
                }
            }
            if i % self.shortest == 0 {
                if let Some(found) = self.probe(chunk, base, i) {
                    matches.push(found);
                }
            }
            pos = self.next_position(i, base);
        }
    }

    // Next chunk position to look at after logical offset `i`.
    fn next_position(&self, i: usize, base: usize) -> usize {
        if self.candidates.is_empty() {
            let next = i + 1;
            next.div_ceil(self.shortest) * self.shortest - base
        } else {
            i + 1 - base
        }
    }

    // Probe byte `i` against every position it could occupy in a sequence,
    // back-verifying the bytes before it.
    fn probe(&mut self, chunk: &[u8], base: usize, i: usize) -> Option<DelimiterMatch> {
        let byte = chunk[i - base];
        for p in 0..self.positions[usize::from(byte)].len() {
            let (delimiter, k) = self.positions[usize::from(byte)][p];
            if k > i {
                continue;
            }
            let start = i - k;
            if start < self.last_match_end {
                continue;
            }
            if self
                .candidates
                .iter()
                .any(|c| c.delimiter == delimiter && c.start == start)
            {
                continue;
            }
            let seq = &self.delimiters[delimiter];
            let verified = (start..i).all(|j| self.byte_before(chunk, base, j) == Some(seq[j - start]));
            if !verified {
                continue;
            }
            if let Some(found) = self.seed(delimiter, start, k + 1, i) {
                return Some(found);
            }
        }
        None
    }

    fn byte_before(&self, chunk: &[u8], base: usize, j: usize) -> Option<u8> {
        if j >= base {
            return chunk.get(j - base).copied();
        }
        let back = base - j;
        if back > self.lookback.len() {
            return None;
        }
        self.lookback.get(self.lookback.len() - back).copied()
    }

    // Register a candidate with `matched` bytes verified up to offset `i`.
    fn seed(
        &mut self,
        delimiter: usize,
        start: usize,
        matched: usize,
        i: usize,
    ) -> Option<DelimiterMatch> {
        if matched == self.delimiters[delimiter].len() {
            return Some(self.complete(delimiter, start, i));
        }
        self.candidates.push(Candidate {
            delimiter,
            start,
            matched,
        });
        None
    }

    fn advance(&mut self, byte: u8, i: usize) -> Option<DelimiterMatch> {
        let mut completed: Option<Candidate> = None;
        let delimiters = &self.delimiters;
        self.candidates.retain_mut(|candidate| {
            let seq = &delimiters[candidate.delimiter];
            if seq[candidate.matched] != byte {
                return false;
            }
            candidate.matched += 1;
            if candidate.matched == seq.len()
                && completed.map_or(true, |c| candidate.start < c.start)
            {
                completed = Some(*candidate);
            }
            true
        });
        let found = completed?;
        Some(self.complete(found.delimiter, found.start, i))
    }

    fn complete(&mut self, delimiter: usize, start: usize, i: usize) -> DelimiterMatch {
        self.candidates.clear();
        self.last_match_end = i + 1;
        DelimiterMatch {
            delimiter,
            start,
            end: i + 1,
        }
    }

    fn remember_tail(&mut self, chunk: &[u8]) {
        let cap = self.lookback_cap;
        if chunk.len() >= cap {
            self.lookback.clear();
            self.lookback.extend_from_slice(&chunk[chunk.len() - cap..]);
        } else {
            self.lookback.extend_from_slice(chunk);
            let excess = self.lookback.len().saturating_sub(cap);
            self.lookback.drain(..excess);
        }
    }
}

/// Reject delimiter sets that cannot be scanned unambiguously.
pub fn validate_delimiters(delimiters: &[&[u8]]) -> Result<()> {
    if delimiters.is_empty() {
        return Err(FrameError::InvalidDelimiters(
            "at least one delimiter is required".to_string(),
        ));
    }
    if let Some(index) = delimiters.iter().position(|d| d.is_empty()) {
        return Err(FrameError::InvalidDelimiters(format!(
            "delimiter {index} is empty"
        )));
    }
    for (i, inner) in delimiters.iter().enumerate() {
        for (j, outer) in delimiters.iter().enumerate() {
            if i == j || inner.len() > outer.len() {
                continue;
            }
            if outer.windows(inner.len()).any(|window| window == *inner) {
                return Err(FrameError::InvalidDelimiters(format!(
                    "delimiter {i} occurs inside delimiter {j}"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELIM: &[u8] = b"<|>";

    fn scan_all(scanner: &mut DelimiterScanner, chunks: &[&[u8]]) -> Vec<DelimiterMatch> {
        chunks.iter().flat_map(|chunk| scanner.feed(chunk)).collect()
    }

    fn starts(matches: &[DelimiterMatch]) -> Vec<usize> {
        matches.iter().map(|m| m.start).collect()
    }

    #[test]
    fn finds_delimiter_in_single_chunk() {
        let mut scanner = DelimiterScanner::new([DELIM]).unwrap();
        let found = scanner.feed(b"ab<|>cd<|>");
        assert_eq!(
            found,
            vec![
                DelimiterMatch { delimiter: 0, start: 2, end: 5 },
                DelimiterMatch { delimiter: 0, start: 7, end: 10 },
            ]
        );
        assert!(!scanner.has_pending());
        assert_eq!(scanner.offset(), 10);
    }

    #[test]
    fn finds_delimiter_split_at_every_boundary() {
        let stream = b"payload<|>rest";
        for split in 0..=stream.len() {
            let mut scanner = DelimiterScanner::new([DELIM]).unwrap();
            let (left, right) = stream.split_at(split);
            let found = scan_all(&mut scanner, &[left, right]);
            assert_eq!(starts(&found), vec![7], "split at {split}");
            assert_eq!(found[0].end, 10);
        }
    }

    #[test]
    fn byte_by_byte_feed() {
        let mut scanner = DelimiterScanner::new([DELIM]).unwrap();
        let stream = b"x<|>y<|>";
        let chunks: Vec<&[u8]> = stream.chunks(1).collect();
        assert_eq!(starts(&scan_all(&mut scanner, &chunks)), vec![1, 5]);
    }

    #[test]
    fn halves_that_do_not_join_are_not_a_match() {
        let mut scanner = DelimiterScanner::new([DELIM]).unwrap();
        assert!(scanner.feed(b"abc<|").is_empty());
        assert!(scanner.has_pending());
        assert!(scanner.feed(b"x>").is_empty());
        assert!(!scanner.has_pending());
    }

    #[test]
    fn partial_prefix_restarts_inside_candidate() {
        let mut scanner = DelimiterScanner::new([b"abac"]).unwrap();
        let found = scanner.feed(b"ababac");
        assert_eq!(found, vec![DelimiterMatch { delimiter: 0, start: 2, end: 6 }]);
    }

    #[test]
    fn matches_never_overlap() {
        let mut scanner = DelimiterScanner::new([b"aa"]).unwrap();
        assert_eq!(starts(&scanner.feed(b"aaaaa")), vec![0, 2]);
    }

    #[test]
    fn multiple_sequences_reported_in_stream_order() {
        let mut scanner = DelimiterScanner::new([b"#END#".as_ref(), b"@HDR@".as_ref()]).unwrap();
        let found = scan_all(&mut scanner, &[b"{}@HD", b"R@body#EN", b"D#"]);
        assert_eq!(
            found,
            vec![
                DelimiterMatch { delimiter: 1, start: 2, end: 7 },
                DelimiterMatch { delimiter: 0, start: 11, end: 16 },
            ]
        );
    }

    #[test]
    fn single_byte_sequence_completes_immediately() {
        let mut scanner = DelimiterScanner::new([b"\n"]).unwrap();
        assert_eq!(starts(&scanner.feed(b"a\nb\n\n")), vec![1, 3, 4]);
    }

    #[test]
    fn rejects_invalid_delimiter_sets() {
        let none: [&[u8]; 0] = [];
        assert!(matches!(
            DelimiterScanner::new(none),
            Err(FrameError::InvalidDelimiters(_))
        ));
        assert!(DelimiterScanner::new([b"".as_ref()]).is_err());
        assert!(DelimiterScanner::new([b"abcd".as_ref(), b"bc".as_ref()]).is_err());
        assert!(DelimiterScanner::new([b"abcd".as_ref(), b"abcd".as_ref()]).is_err());
        assert!(DelimiterScanner::new([b"abcd".as_ref(), b"dcba".as_ref()]).is_ok());
    }

    #[test]
    fn skip_mode_matches_every_byte_mode() {
        let delimiters: [&[u8]; 2] = [b"\x01\x00\x00\x01", b"\x00\x01\x01\x00"];
        let stream: Vec<u8> = b"\x00\x00\x01\x00\x00\x01\x01\x00\x01\x01\x00\x00\x01\x00\x00\x01\x00"
            .iter()
            .copied()
            .cycle()
            .take(170)
            .collect();
        for chunk_len in [1, 2, 3, 5, 7, 64, 170] {
            let mut every = DelimiterScanner::with_mode(delimiters, ScanMode::EveryByte).unwrap();
            let mut skip = DelimiterScanner::with_mode(delimiters, ScanMode::Skip).unwrap();
            let expected: Vec<_> = stream.chunks(chunk_len).flat_map(|c| every.feed(c)).collect();
            let actual: Vec<_> = stream.chunks(chunk_len).flat_map(|c| skip.feed(c)).collect();
            assert!(!expected.is_empty());
            assert_eq!(actual, expected, "chunk length {chunk_len}");
        }
    }

    #[test]
    fn reset_restarts_offsets() {
        let mut scanner = DelimiterScanner::new([DELIM]).unwrap();
        scanner.feed(b"xx<|");
        scanner.reset();
        assert!(!scanner.has_pending());
        assert_eq!(starts(&scanner.feed(b"<|>")), vec![0]);
    }
}
