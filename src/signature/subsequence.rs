//! Subsequences: one anchor run plus its side fragments, and the search
//! algorithm that finds them in a file.
//!
//! A subsequence must contain at least one unambiguous run of bytes or byte
//! classes — the anchor — which can be skip-searched with a
//! Boyer-Moore-Horspool searcher. Parts of the pattern that cannot be
//! skip-searched (alternatives, bounded gaps) hang off the anchor as left
//! and right fragments and are verified outward from each candidate anchor
//! position.
//!
//! Matching spends almost all of its time here, so the search windows are
//! computed tightly: the anchor can only start where the minimum fragment
//! lengths on either side still fit inside the file, and a subsequence with
//! a bounded offset only scans that window instead of the whole file.
//!
//! When a fragment chain fails, or the outermost fragment lands outside the
//! sequence's declared offset window, the search does not give up: it
//! re-searches for further occurrences of previously matched fragments,
//! narrowing their offset windows each time, until a valid placement is
//! found or the windows close. The retry state lives entirely on the stack
//! of the running search; the compiled model is never touched, which is what
//! makes it safe to share across identification workers.

use std::fmt;
use std::io;

use crate::pattern::{AnchorSearcher, ByteClass, ByteMatcher, SequenceMatcher};
use crate::reader::ByteReader;

use super::fragment::SideFragment;
use super::{Side, SignatureError};

/// Unprepared subsequence: anchor plus position-ordered fragment lists.
///
/// Fragment lists are indexed by position minus one; each inner list holds
/// the alternatives for that position.
#[derive(Debug, Clone)]
pub struct SubSequenceBuilder {
    anchor: SequenceMatcher,
    left_fragments: Vec<Vec<SideFragment>>,
    right_fragments: Vec<Vec<SideFragment>>,
    min_seq_offset: i64,
    max_seq_offset: i64,
}

impl SubSequenceBuilder {
    pub fn new(
        anchor: SequenceMatcher,
        left_fragments: Vec<Vec<SideFragment>>,
        right_fragments: Vec<Vec<SideFragment>>,
        min_seq_offset: i64,
        max_seq_offset: i64,
    ) -> Self {
        Self { anchor, left_fragments, right_fragments, min_seq_offset, max_seq_offset }
    }

    pub fn anchor(&self) -> &SequenceMatcher {
        &self.anchor
    }

    pub fn left_fragments(&self) -> &[Vec<SideFragment>] {
        &self.left_fragments
    }

    pub fn right_fragments(&self) -> &[Vec<SideFragment>] {
        &self.right_fragments
    }

    pub fn min_seq_offset(&self) -> i64 {
        self.min_seq_offset
    }

    pub fn max_seq_offset(&self) -> i64 {
        self.max_seq_offset
    }

    /// Sets the minimum offset, dragging the maximum up with it.
    pub fn set_min_seq_offset(&mut self, offset: i64) {
        self.min_seq_offset = offset;
        if self.max_seq_offset < self.min_seq_offset {
            self.max_seq_offset = offset;
        }
    }

    /// Sets the maximum offset, dragging the minimum down with it.
    pub fn set_max_seq_offset(&mut self, offset: i64) {
        self.max_seq_offset = offset;
        if self.min_seq_offset > self.max_seq_offset {
            self.min_seq_offset = offset;
        }
    }

    /// One-time compilation into an immutable, searchable subsequence.
    ///
    /// * merges same-position single-byte alternatives into byte classes;
    /// * captures fragments adjacent to the anchor back into the anchor
    ///   text, lengthening it for better skip performance;
    /// * computes the min/max byte lengths the fragments can occupy on each
    ///   side, which bound the anchor search window;
    /// * builds the final anchor searcher.
    ///
    /// `reverse_order` is true when the owning byte sequence scans backwards
    /// from EOF; `full_file_scan` when this subsequence follows an unbounded
    /// gap and may match anywhere rather than within its own offset window.
    pub fn prepare(mut self, reverse_order: bool, full_file_scan: bool) -> Result<SubSequence, SignatureError> {
        validate_positions(&self.left_fragments)?;
        validate_positions(&self.right_fragments)?;

        merge_single_byte_alternatives(&mut self.left_fragments);
        merge_single_byte_alternatives(&mut self.right_fragments);

        let mut anchor = self.anchor.into_matchers();
        capture_fragments(&mut anchor, &mut self.left_fragments, Side::Left, reverse_order);
        capture_fragments(&mut anchor, &mut self.right_fragments, Side::Right, reverse_order);
        if anchor.is_empty() {
            return Err(SignatureError::EmptyAnchor);
        }

        let (min_left_length, max_left_length) = fragment_length_bounds(&self.left_fragments);
        let (min_right_length, max_right_length) = fragment_length_bounds(&self.right_fragments);

        Ok(SubSequence {
            searcher: AnchorSearcher::new(SequenceMatcher::new(anchor)),
            left_fragments: self.left_fragments,
            right_fragments: self.right_fragments,
            min_seq_offset: self.min_seq_offset,
            max_seq_offset: self.max_seq_offset,
            min_left_length,
            max_left_length,
            min_right_length,
            max_right_length,
            backwards_search: reverse_order,
            full_file_scan,
        })
    }
}

/// Prepared, immutable subsequence. Safe to share across threads.
#[derive(Debug)]
pub struct SubSequence {
    searcher: AnchorSearcher,
    left_fragments: Vec<Vec<SideFragment>>,
    right_fragments: Vec<Vec<SideFragment>>,
    min_seq_offset: i64,
    max_seq_offset: i64,
    min_left_length: i64,
    max_left_length: i64,
    min_right_length: i64,
    max_right_length: i64,
    backwards_search: bool,
    full_file_scan: bool,
}

impl SubSequence {
    /// Length of the anchoring sequence in bytes.
    pub fn num_bytes(&self) -> usize {
        self.searcher.len()
    }

    pub fn min_seq_offset(&self) -> i64 {
        self.min_seq_offset
    }

    pub fn max_seq_offset(&self) -> i64 {
        self.max_seq_offset
    }

    /// Searches for this subsequence starting from `position` (the marker
    /// left by the previous subsequence, or the sequence's starting offset).
    ///
    /// On success returns the new marker: one byte past the match in the
    /// scan direction, to be consumed by the next subsequence. On failure —
    /// including any I/O failure, which is logged and treated as "no match"
    /// rather than an error — returns `None`.
    ///
    /// `max_bytes_to_scan` bounds how far from the relevant end of the file
    /// the anchor may be looked for; zero or negative means unlimited.
    /// `bof_anchored`/`eof_anchored` indicate that this subsequence is the
    /// fixed-start subsequence of a BOF- or EOF-anchored byte sequence.
    pub fn find_from_position<R: ByteReader + ?Sized>(
        &self,
        reader: &R,
        position: i64,
        max_bytes_to_scan: i64,
        bof_anchored: bool,
        eof_anchored: bool,
    ) -> Option<i64> {
        let result = if self.backwards_search {
            self.find_backwards(reader, position, max_bytes_to_scan, eof_anchored)
        } else {
            self.find_forwards(reader, position, max_bytes_to_scan, bof_anchored, eof_anchored)
        };
        match result {
            Ok(marker) => marker,
            Err(error) => {
                tracing::warn!(%error, subsequence = %self.to_expression(), "i/o failure during subsequence search");
                None
            }
        }
    }

    fn find_forwards<R: ByteReader + ?Sized>(
        &self,
        reader: &R,
        position: i64,
        max_bytes_to_scan: i64,
        bof_anchored: bool,
        eof_anchored: bool,
    ) -> io::Result<Option<i64>> {
        let last_byte_in_file = reader.num_bytes() as i64 - 1;
        let match_length = self.searcher.len() as i64;

        // The smallest and greatest byte positions the anchor's final byte
        // could occupy, given the fragments that must fit around it.
        let first_possible = self.min_left_length;
        let last_possible = last_byte_in_file - self.min_right_length;

        let min_possible_start = position + self.min_left_length + match_length - 1;
        let start_window = min_possible_start + self.min_seq_offset;
        let left_fragment_window = self.max_left_length - self.min_left_length;
        let mut end_window = if self.full_file_scan {
            last_possible
        } else {
            min_possible_start + self.max_seq_offset + left_fragment_window
        };
        if max_bytes_to_scan > 0 && end_window > max_bytes_to_scan {
            end_window = max_bytes_to_scan;
        }
        if start_window < first_possible {
            return Ok(None);
        }
        if end_window > last_possible {
            end_window = last_possible;
        }

        // match_position tracks the anchor's final byte.
        let mut match_position = start_window;
        while match_position <= end_window {
            let from = match_position - match_length + 1;
            let to = end_window - match_length + 1;
            let found = if from == to {
                if self.searcher.matcher().matches_at(reader, from)? { Some(from) } else { None }
            } else {
                self.searcher.search_forward(reader, from, to)?
            };
            match_position = match found {
                Some(start) => start + match_length - 1,
                None => break,
            };

            let mut match_found = true;
            if !self.left_fragments.is_empty() {
                // Track where the outermost (nearest BOF) fragment lands, in
                // case it falls outside the sequence's own offset window and
                // further occurrences need checking.
                let outermost = &self.left_fragments[self.left_fragments.len() - 1..];
                let mut final_hits = FinalHits::new(outermost[0].len());
                let left_positions = fragment_positions(
                    reader,
                    Side::Left,
                    &self.left_fragments,
                    position,
                    match_position - match_length,
                    Some(&mut final_hits),
                )?;
                match_found = !left_positions.is_empty();
                let mut leftmost_invalid = true;
                if match_found {
                    let nearest_bof = left_positions[left_positions.len() - 1];
                    let furthest_bof = left_positions[0];
                    let min_from_bof = self.min_seq_offset + position;
                    let max_from_bof = self.max_seq_offset + position;
                    if nearest_bof >= min_from_bof {
                        leftmost_invalid = furthest_bof > max_from_bof
                            && self.left_window_has_no_valid_occurrence(
                                reader,
                                0,
                                nearest_bof,
                                max_from_bof,
                                min_from_bof,
                                outermost,
                                &mut final_hits,
                            )?;
                    }
                }
                if match_found && bof_anchored && leftmost_invalid {
                    match_found = false;
                }
            }
            if match_found && !self.right_fragments.is_empty() {
                let right_positions = fragment_positions(
                    reader,
                    Side::Right,
                    &self.right_fragments,
                    match_position + 1,
                    last_byte_in_file,
                    None,
                )?;
                match_found = !right_positions.is_empty();
                if match_found && eof_anchored && right_positions[0] > self.max_seq_offset {
                    match_found = false;
                }
                if match_found {
                    match_position = right_positions[0];
                }
            }
            if match_found {
                return Ok(Some(match_position + 1));
            }
            match_position += 1;
        }
        Ok(None)
    }

    fn find_backwards<R: ByteReader + ?Sized>(
        &self,
        reader: &R,
        position: i64,
        max_bytes_to_scan: i64,
        _eof_anchored: bool,
    ) -> io::Result<Option<i64>> {
        let last_byte_in_file = reader.num_bytes() as i64 - 1;
        let match_length = self.searcher.len() as i64;
        let first_possible = self.min_left_length;
        let last_possible = last_byte_in_file - self.min_right_length;

        let max_possible_start = position - self.min_right_length - (match_length - 1);
        let start_window = max_possible_start - self.min_seq_offset;
        let right_fragment_window = self.max_right_length - self.min_right_length;
        let mut end_window = if self.full_file_scan {
            0
        } else {
            max_possible_start - self.max_seq_offset - right_fragment_window
        };
        if max_bytes_to_scan > 0 && end_window < last_byte_in_file - max_bytes_to_scan {
            end_window = last_byte_in_file - max_bytes_to_scan;
        }
        if start_window > last_possible {
            return Ok(None);
        }
        if end_window < first_possible {
            end_window = first_possible;
        }

        // match_position tracks the anchor's first byte.
        let mut match_position = start_window;
        while match_position >= end_window {
            let found = if match_position == end_window {
                if self.searcher.matcher().matches_at(reader, match_position)? {
                    Some(match_position)
                } else {
                    None
                }
            } else {
                self.searcher.search_backward(reader, match_position, end_window)?
            };
            match_position = match found {
                Some(start) => start,
                None => break,
            };

            let mut match_found = true;
            if !self.right_fragments.is_empty() {
                let outermost = &self.right_fragments[self.right_fragments.len() - 1..];
                let mut final_hits = FinalHits::new(outermost[0].len());
                let right_positions = fragment_positions(
                    reader,
                    Side::Right,
                    &self.right_fragments,
                    match_position + match_length,
                    position,
                    Some(&mut final_hits),
                )?;
                // Assume the rightmost fragment violates the sequence's
                // window until shown otherwise.
                let mut rightmost_invalid = true;
                if !right_positions.is_empty() {
                    let nearest_eof = right_positions[right_positions.len() - 1];
                    let furthest_eof = right_positions[0];
                    if furthest_eof <= position - self.min_seq_offset {
                        rightmost_invalid = nearest_eof < position - self.max_seq_offset
                            && self.right_window_has_no_valid_occurrence(
                                reader,
                                nearest_eof + 1,
                                position,
                                self.max_seq_offset,
                                self.min_seq_offset,
                                outermost,
                                &mut final_hits,
                            )?;
                    }
                }
                match_found = !rightmost_invalid;
            }
            if match_found && !self.left_fragments.is_empty() {
                let left_positions = fragment_positions(
                    reader,
                    Side::Left,
                    &self.left_fragments,
                    0,
                    match_position - 1,
                    None,
                )?;
                match_found = !left_positions.is_empty();
                if match_found {
                    match_position = left_positions[0];
                }
            }
            if match_found {
                return Ok(Some(match_position - 1));
            }
            match_position -= 1;
        }
        Ok(None)
    }

    /// Called when the outermost left fragment was found beyond the
    /// sequence's maximum offset from BOF: looks for further occurrences
    /// between the minimum and maximum. True if no valid occurrence exists.
    fn left_window_has_no_valid_occurrence<R: ByteReader + ?Sized>(
        &self,
        reader: &R,
        left_position: i64,
        right_position: i64,
        max_offset: i64,
        min_offset: i64,
        outermost: &[Vec<SideFragment>],
        final_hits: &mut FinalHits,
    ) -> io::Result<bool> {
        let mut right_position = right_position;
        let mut positions: Vec<i64>;
        loop {
            positions = fragment_positions(
                reader,
                Side::Left,
                outermost,
                left_position,
                right_position,
                Some(final_hits),
            )?;
            if let Some(first) = positions.first() {
                right_position = first - 1;
            }
            if positions.last().map_or(true, |nearest| *nearest <= max_offset) {
                break;
            }
        }
        Ok(positions.is_empty() || positions[0] > max_offset || positions[0] < min_offset)
    }

    /// Mirror image for the outermost right fragment, offsets from EOF.
    fn right_window_has_no_valid_occurrence<R: ByteReader + ?Sized>(
        &self,
        reader: &R,
        left_position: i64,
        right_position: i64,
        max_offset: i64,
        min_offset: i64,
        outermost: &[Vec<SideFragment>],
        final_hits: &mut FinalHits,
    ) -> io::Result<bool> {
        let mut left_position = left_position;
        let mut positions: Vec<i64>;
        loop {
            positions = fragment_positions(
                reader,
                Side::Right,
                outermost,
                left_position,
                right_position,
                Some(final_hits),
            )?;
            if let Some(first) = positions.first() {
                left_position = first + 1;
            }
            if positions.is_empty() || positions[0] >= right_position - max_offset {
                break;
            }
        }
        Ok(positions.is_empty()
            || positions[0] < right_position - max_offset
            || positions[0] > right_position - min_offset)
    }

    /// Signature-syntax rendering of the whole subsequence.
    pub fn to_expression(&self) -> String {
        let mut out = String::new();
        for alternatives in self.left_fragments.iter().rev() {
            out.push_str(&fragment_expression(alternatives));
            out.push_str(&gap_expression(alternatives));
        }
        out.push_str(&self.searcher.matcher().to_expression());
        for alternatives in self.right_fragments.iter() {
            out.push_str(&gap_expression(alternatives));
            out.push_str(&fragment_expression(alternatives));
        }
        out
    }
}

impl fmt::Display for SubSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_expression())
    }
}

/// A successful fragment probe remembered for backtracking: where in the
/// file it matched, which alternative it was, and at what offset from its
/// neighbour it was found.
#[derive(Debug, Clone, Copy)]
struct FragmentHit {
    frag_pos: usize,
    alt_index: usize,
    position_in_file: i64,
    offset_found: i64,
}

/// Per-alternative record of where the outermost fragment position matched:
/// `(offset from its neighbour, end position in file)`.
struct FinalHits {
    slots: Vec<Option<(i64, i64)>>,
}

impl FinalHits {
    fn new(alternatives: usize) -> Self {
        Self { slots: vec![None; alternatives] }
    }

    fn any_found(&self) -> bool {
        self.slots.iter().any(Option::is_some)
    }

    fn get(&self, alt_index: usize) -> Option<(i64, i64)> {
        self.slots.get(alt_index).copied().flatten()
    }

    fn set(&mut self, alt_index: usize, offset_found: i64, file_position: i64) {
        if let Some(slot) = self.slots.get_mut(alt_index) {
            *slot = Some((offset_found, file_position));
        }
    }
}

/// Verifies one side's fragment chain within `[left_position, right_position]`.
///
/// Fragments are checked position by position, nearest the anchor first,
/// walking away from it (towards BOF for left fragments, towards EOF for
/// right ones). Every position must find at least one alternative within its
/// offset window from the previous position for the chain to succeed.
///
/// Returns the candidate boundary positions after the outermost fragment:
/// for right fragments the final byte of the outermost match (ascending
/// order), for left fragments its first byte (descending order). Empty when
/// the chain cannot be placed.
///
/// When `final_hits` already holds previous outermost placements, the
/// windows are tightened to look only for occurrences beyond them — the
/// re-check path used when a placement violated the whole sequence's offset
/// window.
fn fragment_positions<R: ByteReader + ?Sized>(
    reader: &R,
    side: Side,
    fragments: &[Vec<SideFragment>],
    left_position: i64,
    right_position: i64,
    mut final_hits: Option<&mut FinalHits>,
) -> io::Result<Vec<i64>> {
    let direction = side.direction();
    let num_frag_positions = fragments.len();
    let variable_offsets: Vec<bool> = fragments
        .iter()
        .map(|alternatives| alternatives.iter().any(SideFragment::has_variable_offset))
        .collect();
    let use_backtrack = variable_offsets.iter().any(|flag| *flag);
    let rechecking = final_hits.as_ref().map_or(false, |hits| hits.any_found());

    let start_position = match side {
        Side::Right => left_position,
        Side::Left => right_position,
    };
    let mut markers: Vec<i64> = vec![start_position];
    let mut hit_stack: Vec<FragmentHit> = Vec::new();
    let mut sequence_found = true;

    let mut frag_pos = 1usize;
    while frag_pos <= num_frag_positions {
        let alternatives = &fragments[frag_pos - 1];
        let num_alternatives = alternatives.len();
        let mut end_positions: Vec<i64> = Vec::new();

        'options: for option in 0..markers.len() {
            let marker = markers[option];
            let mut alt = 0usize;
            while alt < num_alternatives {
                let fragment = &alternatives[alt];
                let num_bytes = fragment.num_bytes() as i64;

                // When re-checking for a further occurrence of a previously
                // found fragment, narrow its window past that occurrence.
                let mut window = (fragment.min_offset(), fragment.max_offset());
                let mut window_closed = false;
                if rechecking {
                    if let Some((previous_offset, previous_position)) =
                        final_hits.as_ref().and_then(|hits| hits.get(alt))
                    {
                        let delta = match side {
                            Side::Right => {
                                previous_offset + (left_position - (previous_position - num_bytes + 1))
                            }
                            Side::Left => {
                                previous_offset + num_bytes + (previous_position - right_position) - 1
                            }
                        };
                        window = ((fragment.min_offset() - delta).max(0), fragment.max_offset() - delta);
                        window_closed = window.1 < 0;
                    }
                }

                if !window_closed {
                    let (window_left, window_right) = match side {
                        Side::Right => (marker, right_position),
                        Side::Left => (left_position, marker),
                    };
                    let found =
                        find_fragment(reader, window_left, window_right, side, window, fragment.matcher())?;
                    if let Some(fragment_end) = found {
                        end_positions.push(fragment_end + direction);
                        let offset_found = match side {
                            Side::Right => fragment_end - marker - num_bytes + 1,
                            Side::Left => marker - fragment_end - num_bytes + 1,
                        };
                        // Remember the hit if a neighbouring position has a
                        // variable offset; it may need revisiting.
                        if use_backtrack
                            && frag_pos < num_frag_positions
                            && (variable_offsets[frag_pos] || variable_offsets[frag_pos - 1])
                        {
                            hit_stack.push(FragmentHit {
                                frag_pos,
                                alt_index: alt,
                                position_in_file: fragment_end + direction,
                                offset_found,
                            });
                        }
                        if frag_pos == num_frag_positions {
                            if let Some(hits) = final_hits.as_deref_mut() {
                                hits.set(alt, offset_found, fragment_end);
                            }
                        }
                    } else if alt == num_alternatives - 1
                        && end_positions.is_empty()
                        && option == markers.len() - 1
                    {
                        // Nothing matched at this position. Unwind through
                        // earlier hits looking for further occurrences whose
                        // narrowed windows still allow a placement.
                        while let Some(last_good) = hit_stack.pop() {
                            let previous = &fragments[last_good.frag_pos - 1][last_good.alt_index];
                            let previous_bytes = previous.num_bytes() as i64;
                            let retry_min =
                                (previous.min_offset() - last_good.offset_found - previous_bytes).max(0);
                            let retry_max =
                                previous.max_offset() - last_good.offset_found - previous_bytes;
                            if retry_max < 0 {
                                break;
                            }
                            let (window_left, window_right) = match side {
                                Side::Right => (last_good.position_in_file, right_position),
                                Side::Left => (left_position, last_good.position_in_file),
                            };
                            let retry = find_fragment(
                                reader,
                                window_left,
                                window_right,
                                side,
                                (retry_min, retry_max),
                                previous.matcher(),
                            )?;
                            if let Some(fragment_end) = retry {
                                let new_end = fragment_end + direction;
                                let new_offset = match side {
                                    Side::Right => new_end - last_good.position_in_file + last_good.offset_found,
                                    Side::Left => {
                                        (last_good.position_in_file - fragment_end) + last_good.offset_found + 1
                                    }
                                };
                                end_positions.push(new_end);
                                hit_stack.push(FragmentHit {
                                    frag_pos: last_good.frag_pos,
                                    alt_index: last_good.alt_index,
                                    position_in_file: new_end,
                                    offset_found: new_offset,
                                });
                                // Resume checking from just past the
                                // revisited fragment position.
                                frag_pos = last_good.frag_pos;
                                break 'options;
                            }
                        }
                    }
                }
                alt += 1;
            }
        }

        if end_positions.is_empty() {
            sequence_found = false;
            break;
        }
        let mut deduped: Vec<i64> = Vec::with_capacity(end_positions.len());
        for end_position in end_positions {
            if !deduped.contains(&end_position) {
                deduped.push(end_position);
            }
        }
        markers = deduped;
        frag_pos += 1;
    }

    if !sequence_found {
        return Ok(Vec::new());
    }
    match side {
        Side::Right => markers.sort_unstable(),
        Side::Left => markers.sort_unstable_by(|a, b| b.cmp(a)),
    }
    for marker in &mut markers {
        *marker -= direction;
    }
    Ok(markers)
}

/// Scans for a single fragment within `[left_end, right_end]`, starting
/// `min_offset` from the near end and giving up past `max_offset`.
///
/// Returns the fragment's far-end byte position in the scan direction: the
/// final byte for a rightward search, the first byte for a leftward one.
fn find_fragment<R: ByteReader + ?Sized>(
    reader: &R,
    left_end: i64,
    right_end: i64,
    side: Side,
    (min_offset, max_offset): (i64, i64),
    matcher: &SequenceMatcher,
) -> io::Result<Option<i64>> {
    let direction = side.direction();
    let num_bytes = matcher.len() as i64;
    let byte_offset = if direction == 1 { 0 } else { num_bytes - 1 };

    let (start, last) = if direction == -1 {
        let start = right_end - min_offset;
        let limit_by_file = left_end + num_bytes - 1;
        let limit_by_offset = right_end - max_offset;
        (start, limit_by_file.max(limit_by_offset))
    } else {
        let start = left_end + min_offset;
        let limit_by_file = right_end - num_bytes + 1;
        let limit_by_offset = left_end + max_offset;
        (start, limit_by_file.min(limit_by_offset))
    };

    let mut position = start;
    while direction * (last - position) >= 0 {
        if matcher.matches_at(reader, position - byte_offset)? {
            return Ok(Some(position + num_bytes * direction - direction));
        }
        position += direction;
    }
    Ok(None)
}

fn validate_positions(fragments: &[Vec<SideFragment>]) -> Result<(), SignatureError> {
    for (index, alternatives) in fragments.iter().enumerate() {
        if alternatives.is_empty() {
            return Err(SignatureError::FragmentPositionGap { position: index + 1 });
        }
    }
    Ok(())
}

/// `(01|02|03)` is more efficiently matched as the byte class `[01 02 03]`:
/// same-position alternatives that are all a single byte long collapse into
/// one fragment over the union class.
fn merge_single_byte_alternatives(fragments: &mut [Vec<SideFragment>]) {
    for alternatives in fragments.iter_mut() {
        if alternatives.len() > 1 && alternatives.iter().all(|f| f.num_bytes() == 1) {
            let mut class = ByteClass::new();
            for fragment in alternatives.iter() {
                class.insert_matcher(&fragment.matcher().matchers()[0]);
            }
            let first = &alternatives[0];
            let merged = SideFragment::new(
                SequenceMatcher::new(vec![ByteMatcher::Class(class)]),
                first.min_offset(),
                first.max_offset(),
                first.position(),
            );
            *alternatives = vec![merged];
        }
    }
}

/// Folds fragments that sit hard against the anchor (or at a fixed distance
/// from it) back into the anchor itself, so the skip search covers them.
/// Fixed-distance fragments only fold on the side that cannot worsen the
/// average shift for the search direction in use.
fn capture_fragments(
    anchor: &mut Vec<ByteMatcher>,
    fragments: &mut Vec<Vec<SideFragment>>,
    side: Side,
    backwards_search: bool,
) {
    let mut captured = 0;
    for alternatives in fragments.iter() {
        if alternatives.len() != 1 {
            break;
        }
        let fragment = &alternatives[0];
        let (min, max) = (fragment.min_offset(), fragment.max_offset());
        let gap = if min == 0 && max == 0 {
            0
        } else if min == max && min > 0 {
            let foldable = match side {
                Side::Left => !backwards_search,
                Side::Right => backwards_search,
            };
            if !foldable {
                break;
            }
            min as usize
        } else {
            break;
        };

        match side {
            Side::Left => {
                let mut extended = fragment.matcher().matchers().to_vec();
                extended.extend(std::iter::repeat(ByteMatcher::Any).take(gap));
                extended.append(anchor);
                *anchor = extended;
            }
            Side::Right => {
                anchor.extend(std::iter::repeat(ByteMatcher::Any).take(gap));
                anchor.extend(fragment.matcher().matchers().iter().cloned());
            }
        }
        captured += 1;
    }
    fragments.drain(..captured);
    for (index, alternatives) in fragments.iter_mut().enumerate() {
        for fragment in alternatives {
            fragment.set_position(index + 1);
        }
    }
}

fn fragment_length_bounds(fragments: &[Vec<SideFragment>]) -> (i64, i64) {
    let mut min_total = 0i64;
    let mut max_total = 0i64;
    for alternatives in fragments {
        let mut min_here = i64::MAX;
        let mut max_here = 0i64;
        for fragment in alternatives {
            let bytes = fragment.num_bytes() as i64;
            min_here = min_here.min(bytes + fragment.min_offset());
            max_here = max_here.max(bytes + fragment.max_offset());
        }
        min_total += min_here;
        max_total += max_here;
    }
    (min_total, max_total)
}

fn fragment_expression(alternatives: &[SideFragment]) -> String {
    if alternatives.len() == 1 {
        alternatives[0].to_expression()
    } else {
        let options: Vec<String> = alternatives.iter().map(SideFragment::to_expression).collect();
        format!("({})", options.join("|"))
    }
}

fn gap_expression(alternatives: &[SideFragment]) -> String {
    let (min, max) = (alternatives[0].min_offset(), alternatives[0].max_offset());
    if min == 0 && max == 0 {
        String::new()
    } else if min == max {
        format!("{{{min}}}")
    } else {
        format!("{{{min}-{max}}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(bytes: &[u8], min: i64, max: i64, position: usize) -> SideFragment {
        SideFragment::new(SequenceMatcher::from_bytes(bytes), min, max, position)
    }

    fn builder(
        anchor: &[u8],
        left: Vec<Vec<SideFragment>>,
        right: Vec<Vec<SideFragment>>,
    ) -> SubSequenceBuilder {
        SubSequenceBuilder::new(SequenceMatcher::from_bytes(anchor), left, right, 0, 0)
    }

    // === Preparation ===

    #[test]
    fn seq_offsets_normalise_in_both_orders() {
        let mut b = builder(b"AB", vec![], vec![]);
        b.set_min_seq_offset(9);
        assert_eq!((b.min_seq_offset(), b.max_seq_offset()), (9, 9));
        b.set_max_seq_offset(4);
        assert_eq!((b.min_seq_offset(), b.max_seq_offset()), (4, 4));

        let mut b = builder(b"AB", vec![], vec![]);
        b.set_max_seq_offset(4);
        b.set_min_seq_offset(9);
        assert_eq!((b.min_seq_offset(), b.max_seq_offset()), (9, 9));
    }

    #[test]
    fn single_byte_alternatives_collapse_into_one_class_fragment() {
        let alternatives = vec![
            fragment(b"\x41", 1, 3, 1),
            fragment(b"\x42", 1, 3, 1),
            fragment(b"\x43", 1, 3, 1),
        ];
        let prepared = builder(b"ZZ", vec![], vec![alternatives]).prepare(false, false).unwrap();
        assert_eq!(prepared.right_fragments.len(), 1);
        assert_eq!(prepared.right_fragments[0].len(), 1);
        let merged = &prepared.right_fragments[0][0];
        for value in [0x41u8, 0x42, 0x43] {
            let one = [value];
            assert!(merged.matches(&one[..], 0).unwrap(), "{value:#x}");
        }
        let other = [0x44u8];
        assert!(!merged.matches(&other[..], 0).unwrap());
        assert_eq!((merged.min_offset(), merged.max_offset()), (1, 3));
    }

    #[test]
    fn zero_offset_fragments_fold_into_the_anchor() {
        let left = vec![vec![fragment(b"AB", 0, 0, 1)]];
        let right = vec![vec![fragment(b"EF", 0, 0, 1)]];
        let prepared = builder(b"CD", left, right).prepare(false, false).unwrap();
        assert_eq!(prepared.num_bytes(), 6);
        assert!(prepared.left_fragments.is_empty());
        assert!(prepared.right_fragments.is_empty());
        // The folded anchor now spans all three original pieces.
        let data: &[u8] = b"ABCDEF..";
        assert_eq!(prepared.find_from_position(&data, 0, -1, false, false), Some(6));
    }

    #[test]
    fn fixed_offset_fragments_fold_with_wildcard_padding_forwards_left_only() {
        let left = vec![vec![fragment(b"AB", 2, 2, 1)]];
        let right = vec![vec![fragment(b"EF", 2, 2, 1)]];
        let prepared = builder(b"CD", left, right).prepare(false, false).unwrap();
        // Left fragment folds (forward search), right one stays a fragment.
        assert!(prepared.left_fragments.is_empty());
        assert_eq!(prepared.right_fragments.len(), 1);
        assert_eq!(prepared.num_bytes(), 6);
        let data: &[u8] = b"ABxxCDxxEFxx";
        assert_eq!(prepared.find_from_position(&data, 0, -1, false, false), Some(10));
    }

    #[test]
    fn fixed_offset_fragments_fold_on_the_right_when_searching_backwards() {
        let left = vec![vec![fragment(b"AB", 2, 2, 1)]];
        let right = vec![vec![fragment(b"EF", 2, 2, 1)]];
        let prepared = builder(b"CD", left, right).prepare(true, false).unwrap();
        assert_eq!(prepared.left_fragments.len(), 1);
        assert!(prepared.right_fragments.is_empty());
        assert_eq!(prepared.num_bytes(), 6);
    }

    #[test]
    fn empty_fragment_position_is_rejected() {
        let right = vec![vec![], vec![fragment(b"EF", 0, 0, 2)]];
        let err = builder(b"CD", vec![], right).prepare(false, false).unwrap_err();
        assert!(matches!(err, SignatureError::FragmentPositionGap { position: 1 }));
    }

    // === Forward searching ===

    #[test]
    fn plain_anchor_matches_at_fixed_offset() {
        let prepared = builder(b"%PDF", vec![], vec![]).prepare(false, false).unwrap();
        let data: &[u8] = b"%PDF-1.7";
        assert_eq!(prepared.find_from_position(&data, 0, -1, true, false), Some(4));
        let corrupted: &[u8] = b"%PDG-1.7";
        assert_eq!(corrupted.len(), 8);
        assert_eq!(prepared.find_from_position(&corrupted, 0, -1, true, false), None);
    }

    #[test]
    fn bounded_offset_limits_the_search_window() {
        let mut b = builder(b"AB", vec![], vec![]);
        b.set_min_seq_offset(2);
        b.set_max_seq_offset(4);
        let prepared = b.prepare(false, false).unwrap();
        let inside: &[u8] = b"xxxAB...";
        assert_eq!(prepared.find_from_position(&inside, 0, -1, false, false), Some(5));
        let outside: &[u8] = b"xxxxxxAB";
        assert_eq!(prepared.find_from_position(&outside, 0, -1, false, false), None);
    }

    #[test]
    fn max_bytes_to_scan_clips_the_window() {
        let mut b = builder(b"AB", vec![], vec![]);
        b.set_min_seq_offset(0);
        b.set_max_seq_offset(1000);
        let prepared = b.prepare(false, false).unwrap();
        let mut data = vec![b'x'; 64];
        data[40] = b'A';
        data[41] = b'B';
        assert_eq!(prepared.find_from_position(&data.as_slice(), 0, -1, false, false), Some(42));
        assert_eq!(prepared.find_from_position(&data.as_slice(), 0, 20, false, false), None);
    }

    #[test]
    fn left_and_right_fragments_verify_around_the_anchor() {
        let left = vec![vec![fragment(b"LM", 1, 3, 1)]];
        let right = vec![vec![fragment(b"RS", 0, 2, 1)]];
        let prepared = builder(b"AB", left, right).prepare(false, false).unwrap();
        let hit: &[u8] = b"LMxAB.RS..";
        assert_eq!(prepared.find_from_position(&hit, 0, -1, false, false), Some(8));
        // Left fragment too far away: window {1-3} cannot reach it.
        let miss: &[u8] = b"LMxxxxAB.RS";
        assert_eq!(prepared.find_from_position(&miss, 0, -1, false, false), None);
    }

    #[test]
    fn fragment_alternatives_try_every_option() {
        let right = vec![vec![fragment(b"QQQ", 0, 1, 1), fragment(b"RS", 0, 1, 1)]];
        let prepared = builder(b"AB", vec![], right).prepare(false, false).unwrap();
        let data: &[u8] = b"ABxRS";
        assert_eq!(prepared.find_from_position(&data, 0, -1, false, false), Some(5));
    }

    #[test]
    fn inner_fragment_backtracks_to_a_further_occurrence() {
        // pos1 "CD" has a variable window; the nearest CD leaves "EF"
        // unplaceable, so the search must revisit CD further out.
        let right = vec![
            vec![fragment(b"CD", 0, 6, 1)],
            vec![fragment(b"EF", 0, 0, 2)],
        ];
        let prepared = builder(b"AB", vec![], right).prepare(false, false).unwrap();
        let data: &[u8] = b"ABCDxxCDEF";
        assert_eq!(prepared.find_from_position(&data, 0, -1, true, false), Some(10));
        // And when no further occurrence fits, the whole chain fails.
        let dead: &[u8] = b"ABCDxxxxEFxxxxxCDxx";
        assert_eq!(prepared.find_from_position(&dead, 0, -1, true, false), None);
    }

    // === Backward (EOF) searching ===

    #[test]
    fn backwards_anchor_matches_at_end_of_file() {
        let prepared = builder(b"%%EOF", vec![], vec![]).prepare(true, false).unwrap();
        let data: &[u8] = b"....%%EOF";
        let last = data.len() as i64 - 1;
        assert_eq!(prepared.find_from_position(&data, last, -1, false, true), Some(3));
        let shorter_than_anchor: &[u8] = b"EOF";
        assert_eq!(prepared.find_from_position(&shorter_than_anchor, 2, -1, false, true), None);
    }

    #[test]
    fn outermost_fragment_rechecks_against_the_sequence_window() {
        // The CD nearest the anchor sits outside the sequence's {0-5}
        // window from EOF; a further CD inside the window exists and must
        // be found by the re-search.
        let mut b = builder(b"AB", vec![], vec![vec![fragment(b"CD", 0, 20, 1)]]);
        b.set_min_seq_offset(0);
        b.set_max_seq_offset(5);
        let prepared = b.prepare(true, false).unwrap();

        let data: &[u8] = b"xxxxxxABxxCDxxxxxxCD";
        let last = data.len() as i64 - 1;
        assert_eq!(prepared.find_from_position(&data, last, -1, false, true), Some(5));

        // Without the further occurrence the nearest one is rejected.
        let only_near: &[u8] = b"xxxxxxABxxCDxxxxxxxx";
        assert_eq!(prepared.find_from_position(&only_near, last, -1, false, true), None);
    }

    #[test]
    fn backwards_search_with_left_fragments_moves_the_marker_past_them() {
        let left = vec![vec![fragment(b"LM", 0, 0, 1)]];
        let prepared = builder(b"YZ", left, vec![]).prepare(true, false).unwrap();
        let data: &[u8] = b"..LMYZ";
        assert_eq!(prepared.find_from_position(&data, 5, -1, false, true), Some(1));
    }

    // === Rendering ===

    #[test]
    fn expression_rendering_reads_left_to_right() {
        let left = vec![vec![fragment(b"L", 1, 2, 1)]];
        let right = vec![
            vec![fragment(b"R", 3, 3, 1)],
            vec![fragment(b"S", 0, 1, 2), fragment(b"T", 0, 1, 2)],
        ];
        let prepared = builder(b"AB", left, right).prepare(false, false).unwrap();
        assert_eq!(prepared.to_expression(), "4C{1-2}41 42{3}52{0-1}(53|54)");
    }
}
