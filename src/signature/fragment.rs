//! Side fragments: the parts of a subsequence that cannot be skip-searched.
//!
//! A fragment is a small fixed-length compiled matcher plus a min/max offset
//! window measured from its neighbour (the anchor, or the previous fragment
//! position on the same side). Several fragments can share one position:
//! that is how alternatives are represented.

use std::fmt;
use std::io;

use crate::pattern::SequenceMatcher;
use crate::reader::ByteReader;

/// One alternative of a gap-adjacent fragment.
#[derive(Debug, Clone)]
pub struct SideFragment {
    position: usize,
    min_offset: i64,
    max_offset: i64,
    matcher: SequenceMatcher,
}

impl SideFragment {
    /// Builds a fragment. A `max_offset` below `min_offset` collapses the
    /// window to the maximum, matching the later-set-bound rule of the
    /// offset setters.
    pub fn new(matcher: SequenceMatcher, min_offset: i64, max_offset: i64, position: usize) -> Self {
        let mut fragment = Self { position, min_offset: 0, max_offset: 0, matcher };
        fragment.set_min_offset(min_offset);
        fragment.set_max_offset(max_offset);
        fragment
    }

    /// 1-based position among the fragment positions on this side.
    pub fn position(&self) -> usize {
        self.position
    }

    pub(crate) fn set_position(&mut self, position: usize) {
        self.position = position;
    }

    /// Bytes to skip before looking for this fragment.
    pub fn min_offset(&self) -> i64 {
        self.min_offset
    }

    /// Largest distance at which to look for this fragment.
    pub fn max_offset(&self) -> i64 {
        self.max_offset
    }

    /// Sets the minimum offset, dragging the maximum up with it so the
    /// window never inverts.
    pub fn set_min_offset(&mut self, min_offset: i64) {
        self.min_offset = min_offset;
        if self.max_offset < self.min_offset {
            self.max_offset = min_offset;
        }
    }

    /// Sets the maximum offset, dragging the minimum down with it so the
    /// window never inverts.
    pub fn set_max_offset(&mut self, max_offset: i64) {
        self.max_offset = max_offset;
        if self.min_offset > self.max_offset {
            self.min_offset = max_offset;
        }
    }

    /// Fixed length of the compiled pattern. Fragment variability comes from
    /// the offset window, never from the pattern.
    pub fn num_bytes(&self) -> usize {
        self.matcher.len()
    }

    pub fn matcher(&self) -> &SequenceMatcher {
        &self.matcher
    }

    /// Whether the offset window spans more than one placement.
    pub fn has_variable_offset(&self) -> bool {
        self.min_offset != self.max_offset
    }

    /// Byte-exact match of the compiled pattern starting at `position`.
    /// Offsets are applied by the caller, not here.
    pub fn matches<R: ByteReader + ?Sized>(&self, reader: &R, position: i64) -> io::Result<bool> {
        self.matcher.matches_at(reader, position)
    }

    /// Signature-syntax rendering of the fragment pattern, minus offsets
    /// (those are rendered by the owning subsequence).
    pub fn to_expression(&self) -> String {
        self.matcher.to_expression()
    }
}

impl fmt::Display for SideFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_expression())
    }
}
