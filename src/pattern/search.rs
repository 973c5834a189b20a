//! Boyer-Moore-Horspool skip search over a [`ByteReader`].
//!
//! The searcher is built once per anchor during signature preparation and is
//! then shared read-only across identification workers. Shift tables are
//! computed from whatever each matcher position can accept, so classes and
//! ranges in the anchor simply reduce the achievable skip rather than
//! disabling it. A length-1 anchor degenerates into a plain byte scan.

use std::io;

use crate::reader::ByteReader;

use super::SequenceMatcher;

/// Skip searcher for an anchor sequence, in both directions.
#[derive(Clone, Debug)]
pub struct AnchorSearcher {
    matcher: SequenceMatcher,
    forward_shifts: Box<[u32; 256]>,
    backward_shifts: Box<[u32; 256]>,
}

impl AnchorSearcher {
    pub fn new(matcher: SequenceMatcher) -> Self {
        let len = matcher.len() as u32;
        let mut forward = Box::new([len.max(1); 256]);
        let mut backward = Box::new([len.max(1); 256]);

        // Forward: shift so the last window byte aligns with the nearest
        // earlier position that can match it.
        for (index, position) in matcher.matchers().iter().enumerate().take(matcher.len().saturating_sub(1)) {
            let shift = len - 1 - index as u32;
            for value in 0..=255u8 {
                if position.matches(value) {
                    forward[value as usize] = shift;
                }
            }
        }

        // Backward: mirror image, keyed on the first window byte.
        for index in (1..matcher.len()).rev() {
            let position = &matcher.matchers()[index];
            for value in 0..=255u8 {
                if position.matches(value) {
                    backward[value as usize] = index as u32;
                }
            }
        }

        Self { matcher, forward_shifts: forward, backward_shifts: backward }
    }

    pub fn matcher(&self) -> &SequenceMatcher {
        &self.matcher
    }

    pub fn len(&self) -> usize {
        self.matcher.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matcher.is_empty()
    }

    /// Search for the anchor with start positions in `from..=to`, ascending.
    /// Returns the start position of the first match.
    pub fn search_forward<R: ByteReader + ?Sized>(
        &self,
        reader: &R,
        from: i64,
        to: i64,
    ) -> io::Result<Option<i64>> {
        let len = self.matcher.len() as i64;
        if len == 0 {
            return Ok(None);
        }
        if len == 1 {
            return self.scan_forward(reader, from, to);
        }
        let mut position = from.max(0);
        while position <= to {
            if self.matcher.matches_at(reader, position)? {
                return Ok(Some(position));
            }
            let probe = position + len - 1;
            let byte = match reader.byte_at(probe as u64) {
                Ok(byte) => byte,
                // Window ran off the end: nothing further can match.
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
                Err(e) => return Err(e),
            };
            position += i64::from(self.forward_shifts[byte as usize]);
        }
        Ok(None)
    }

    /// Search for the anchor with start positions from `from` down to `to`.
    /// Returns the start position of the first (highest) match.
    pub fn search_backward<R: ByteReader + ?Sized>(
        &self,
        reader: &R,
        from: i64,
        to: i64,
    ) -> io::Result<Option<i64>> {
        let len = self.matcher.len() as i64;
        if len == 0 {
            return Ok(None);
        }
        let to = to.max(0);
        // Clamp the start so the first probed window fits inside the file.
        let last_fit = reader.num_bytes() as i64 - len;
        let mut position = from.min(last_fit);
        if len == 1 {
            return self.scan_backward(reader, position, to);
        }
        while position >= to {
            if self.matcher.matches_at(reader, position)? {
                return Ok(Some(position));
            }
            let byte = match reader.byte_at(position as u64) {
                Ok(byte) => byte,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
                Err(e) => return Err(e),
            };
            position -= i64::from(self.backward_shifts[byte as usize]);
        }
        Ok(None)
    }

    // Simple byte-matcher scans used when the anchor is a single position.
    fn scan_forward<R: ByteReader + ?Sized>(&self, reader: &R, from: i64, to: i64) -> io::Result<Option<i64>> {
        let mut position = from.max(0);
        while position <= to {
            if self.matcher.matches_at(reader, position)? {
                return Ok(Some(position));
            }
            position += 1;
        }
        Ok(None)
    }

    fn scan_backward<R: ByteReader + ?Sized>(&self, reader: &R, from: i64, to: i64) -> io::Result<Option<i64>> {
        let mut position = from;
        while position >= to {
            if self.matcher.matches_at(reader, position)? {
                return Ok(Some(position));
            }
            position -= 1;
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{ByteMatcher, SequenceMatcher};
    use proptest::prelude::*;

    fn searcher(bytes: &[u8]) -> AnchorSearcher {
        AnchorSearcher::new(SequenceMatcher::from_bytes(bytes))
    }

    #[test]
    fn forward_finds_first_occurrence() {
        let s = searcher(b"CD");
        let data: &[u8] = b"xxCDxxCDxx";
        assert_eq!(s.search_forward(&data, 0, 8).unwrap(), Some(2));
        assert_eq!(s.search_forward(&data, 3, 8).unwrap(), Some(6));
        assert_eq!(s.search_forward(&data, 7, 8).unwrap(), None);
    }

    #[test]
    fn backward_finds_highest_occurrence() {
        let s = searcher(b"CD");
        let data: &[u8] = b"xxCDxxCDxx";
        assert_eq!(s.search_backward(&data, 8, 0).unwrap(), Some(6));
        assert_eq!(s.search_backward(&data, 5, 0).unwrap(), Some(2));
        assert_eq!(s.search_backward(&data, 1, 0).unwrap(), None);
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let s = searcher(b"AB");
        let data: &[u8] = b"AB";
        assert_eq!(s.search_forward(&data, 0, 0).unwrap(), Some(0));
        assert_eq!(s.search_backward(&data, 0, 0).unwrap(), Some(0));
    }

    #[test]
    fn single_byte_anchor_scans() {
        let s = searcher(b"Z");
        let data: &[u8] = b"aaZaa";
        assert_eq!(s.search_forward(&data, 0, 4).unwrap(), Some(2));
        assert_eq!(s.search_backward(&data, 4, 0).unwrap(), Some(2));
    }

    #[test]
    fn class_positions_still_skip_correctly() {
        let s = AnchorSearcher::new(SequenceMatcher::new(vec![
            ByteMatcher::Literal(b'%'),
            ByteMatcher::Range(b'0', b'9'),
            ByteMatcher::Literal(b'!'),
        ]));
        let data: &[u8] = b"..%7!..%x!..";
        assert_eq!(s.search_forward(&data, 0, 9).unwrap(), Some(2));
        assert_eq!(s.search_forward(&data, 3, 9).unwrap(), None);
    }

    #[test]
    fn empty_window_finds_nothing() {
        let s = searcher(b"AB");
        let data: &[u8] = b"xxxxxx";
        assert_eq!(s.search_forward(&data, 4, 2).unwrap(), None);
        assert_eq!(s.search_backward(&data, 2, 4).unwrap(), None);
    }

    fn naive_forward(data: &[u8], pattern: &[u8], from: i64, to: i64) -> Option<i64> {
        let mut pos = from.max(0);
        while pos <= to {
            let p = pos as usize;
            if p + pattern.len() <= data.len() && &data[p..p + pattern.len()] == pattern {
                return Some(pos);
            }
            pos += 1;
        }
        None
    }

    proptest! {
        #[test]
        fn horspool_agrees_with_naive_scan(
            data in proptest::collection::vec(0u8..4, 0..64),
            pattern in proptest::collection::vec(0u8..4, 1..5),
        ) {
            let s = searcher(&pattern);
            let to = data.len() as i64 - 1;
            let expected = naive_forward(&data, &pattern, 0, to);
            let found = s.search_forward(&data.as_slice(), 0, to).unwrap();
            prop_assert_eq!(found, expected);
        }
    }
}
