//! Byte sequences: subsequences joined by unbounded gaps, with anchoring.
//!
//! A byte sequence is an ordered list of subsequences, conceptually joined
//! by `.*` operators. Its reference anchors it to the beginning of the file,
//! the end of the file, a variable position, or an indirect offset read out
//! of the file itself. Only pure EOF anchoring scans backwards; indirect EOF
//! sequences resolve their starting offset relative to EOF but still scan
//! forwards.

use std::fmt;
use std::io;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::reader::ByteReader;

use super::subsequence::{SubSequence, SubSequenceBuilder};
use super::SignatureError;

/// How a byte sequence is anchored within the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reference {
    /// Anchored at a fixed (windowed) offset from the beginning of file.
    #[serde(rename = "BOFoffset")]
    BofOffset,
    /// Anchored at a fixed (windowed) offset from the end of file.
    #[serde(rename = "EOFoffset")]
    EofOffset,
    /// May start anywhere; always scans from the beginning.
    #[serde(rename = "Variable", alias = "VariableOffset")]
    Variable,
    /// Starting offset is read from the file, relative to BOF.
    #[serde(rename = "IndirectBOFoffset")]
    IndirectBofOffset,
    /// Starting offset is read from the file, relative to EOF.
    #[serde(rename = "IndirectEOFoffset")]
    IndirectEofOffset,
}

impl Reference {
    pub fn anchored_to_bof(self) -> bool {
        matches!(self, Reference::BofOffset | Reference::IndirectBofOffset)
    }

    pub fn anchored_to_eof(self) -> bool {
        matches!(self, Reference::EofOffset | Reference::IndirectEofOffset)
    }

    pub fn has_indirect_offset(self) -> bool {
        matches!(self, Reference::IndirectBofOffset | Reference::IndirectEofOffset)
    }

    /// Only pure EOF anchoring searches backwards from the end. Indirect EOF
    /// sequences find their BOF offset relative to EOF and scan forwards.
    pub fn reverse_order(self) -> bool {
        self == Reference::EofOffset
    }

    /// Whether the first scanned subsequence starts exactly where the
    /// anchor dictates instead of floating.
    pub fn is_fixed_start(self) -> bool {
        self != Reference::Variable
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Reference::BofOffset => "BOFoffset",
            Reference::EofOffset => "EOFoffset",
            Reference::Variable => "Variable",
            Reference::IndirectBofOffset => "IndirectBOFoffset",
            Reference::IndirectEofOffset => "IndirectEOFoffset",
        }
    }
}

impl FromStr for Reference {
    type Err = SignatureError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text {
            "BOFoffset" => Ok(Reference::BofOffset),
            "EOFoffset" => Ok(Reference::EofOffset),
            "Variable" | "VariableOffset" => Ok(Reference::Variable),
            "IndirectBOFoffset" => Ok(Reference::IndirectBofOffset),
            "IndirectEOFoffset" => Ok(Reference::IndirectEofOffset),
            other => Err(SignatureError::Definition(format!("unknown reference [{other}]"))),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unprepared byte sequence.
#[derive(Debug, Clone)]
pub struct ByteSequenceBuilder {
    reference: Reference,
    big_endian: bool,
    indirect_offset_length: u32,
    indirect_offset_location: i64,
    expression: Option<String>,
    subsequences: Vec<SubSequenceBuilder>,
}

impl ByteSequenceBuilder {
    pub fn new(reference: Reference) -> Self {
        Self {
            reference,
            // Indirect offsets are big-endian unless told otherwise.
            big_endian: true,
            indirect_offset_length: 0,
            indirect_offset_location: 0,
            expression: None,
            subsequences: Vec::new(),
        }
    }

    /// Takes a whole signature expression to compile during preparation.
    /// Compilation is deferred so a malformed expression invalidates just
    /// its owning signature instead of aborting the load.
    pub fn from_expression(reference: Reference, expression: &str) -> Self {
        let mut builder = Self::new(reference);
        builder.expression = Some(expression.to_string());
        builder
    }

    pub fn add_subsequence(&mut self, subsequence: SubSequenceBuilder) -> &mut Self {
        self.subsequences.push(subsequence);
        self
    }

    pub fn set_big_endian(&mut self, big_endian: bool) -> &mut Self {
        self.big_endian = big_endian;
        self
    }

    pub fn set_indirect_offset(&mut self, length: u32, location: i64) -> &mut Self {
        self.indirect_offset_length = length;
        self.indirect_offset_location = location;
        self
    }

    pub fn reference(&self) -> Reference {
        self.reference
    }

    /// One-time compilation into an immutable, searchable byte sequence.
    ///
    /// Computes the sort order and prepares every subsequence in file-scan
    /// order. Any subsequence failing to compile invalidates the whole
    /// sequence (the error propagates and the owning signature is dropped).
    pub fn prepare(self) -> Result<ByteSequence, SignatureError> {
        let mut subsequences = self.subsequences;
        if let Some(expression) = &self.expression {
            subsequences.extend(crate::compiler::compile_expression(
                expression,
                self.reference.anchored_to_eof(),
            )?);
        }
        if subsequences.is_empty() {
            return Err(SignatureError::Definition(
                "byte sequence contains no subsequences".to_string(),
            ));
        }
        let count = subsequences.len();
        let sort_order = if self.reference.anchored_to_bof() {
            if count == 1 {
                1
            } else {
                2
            }
        } else if self.reference.anchored_to_eof() {
            if count == 1 {
                4
            } else {
                5
            }
        } else {
            3
        };

        let reverse_order = self.reference.reverse_order();
        let fixed_start = self.reference.is_fixed_start();
        // The first subsequence scanned is bounded by its own offset window
        // when the sequence has a fixed start; every other subsequence
        // follows an unbounded gap and scans until found.
        let first_scanned = if reverse_order { count - 1 } else { 0 };

        let mut prepared = Vec::with_capacity(count);
        for (index, subsequence) in subsequences.into_iter().enumerate() {
            let full_file_scan = !(index == first_scanned && fixed_start);
            prepared.push(subsequence.prepare(reverse_order, full_file_scan)?);
        }

        Ok(ByteSequence {
            reference: self.reference,
            big_endian: self.big_endian,
            indirect_offset_length: self.indirect_offset_length,
            indirect_offset_location: self.indirect_offset_location,
            sort_order,
            subsequences: prepared,
        })
    }
}

/// Prepared, immutable byte sequence. Safe to share across threads.
pub struct ByteSequence {
    reference: Reference,
    big_endian: bool,
    indirect_offset_length: u32,
    indirect_offset_location: i64,
    sort_order: u8,
    subsequences: Vec<SubSequence>,
}

impl ByteSequence {
    pub fn reference(&self) -> Reference {
        self.reference
    }

    pub fn anchored_to_bof(&self) -> bool {
        self.reference.anchored_to_bof()
    }

    pub fn anchored_to_eof(&self) -> bool {
        self.reference.anchored_to_eof()
    }

    /// Evaluation-cost class, 1..=5: BOF-single < BOF-multi < variable <
    /// EOF-single < EOF-multi. Cheaper, more selective sequences run first.
    pub fn sort_order(&self) -> u8 {
        self.sort_order
    }

    pub fn number_of_subsequences(&self) -> usize {
        self.subsequences.len()
    }

    /// Whether the file matches this byte sequence, scanning at most
    /// `max_bytes_to_scan` from the relevant end (unlimited when zero or
    /// negative).
    pub fn matches<R: ByteReader + ?Sized>(&self, reader: &R, max_bytes_to_scan: i64) -> bool {
        if self.reference.reverse_order() {
            let mut marker = reader.num_bytes() as i64 - 1;
            let mut fixed = self.reference.anchored_to_eof();
            for subsequence in self.subsequences.iter().rev() {
                match subsequence.find_from_position(reader, marker, max_bytes_to_scan, false, fixed) {
                    Some(next) => marker = next,
                    None => return false,
                }
                fixed = false;
            }
            true
        } else {
            let mut marker = match self.indirect_offset(reader) {
                Ok(offset) => offset,
                Err(error) => {
                    tracing::debug!(%error, reference = %self.reference, "could not resolve indirect offset");
                    return false;
                }
            };
            let mut fixed = self.reference.anchored_to_bof();
            for subsequence in &self.subsequences {
                match subsequence.find_from_position(reader, marker, max_bytes_to_scan, fixed, false) {
                    Some(next) => marker = next,
                    None => return false,
                }
                fixed = false;
            }
            true
        }
    }

    /// Resolves the starting offset for the first subsequence. Zero unless
    /// the sequence has an indirect offset, in which case
    /// `indirect_offset_length` bytes at `indirect_offset_location` (from
    /// BOF, or from EOF for EOF-relative references) are interpreted as an
    /// unsigned big- or little-endian integer.
    fn indirect_offset<R: ByteReader + ?Sized>(&self, reader: &R) -> io::Result<i64> {
        if !self.reference.has_indirect_offset() {
            return Ok(0);
        }
        let mut location = self.indirect_offset_location;
        if self.reference.anchored_to_eof() {
            location = reader.num_bytes() as i64 - location - 1;
        }
        if location < 0 {
            return Err(crate::reader::eof_error());
        }
        let length = self.indirect_offset_length as u64;
        let mut offset: u64 = 0;
        if self.big_endian {
            for index in 0..length {
                let byte = reader.byte_at(location as u64 + index)?;
                offset = (offset << 8) | u64::from(byte);
            }
        } else {
            for index in (0..length).rev() {
                let byte = reader.byte_at(location as u64 + index)?;
                offset = (offset << 8) | u64::from(byte);
            }
        }
        Ok(offset as i64)
    }

    /// Signature-syntax rendering of the whole sequence.
    pub fn to_expression(&self) -> String {
        let mut parts = Vec::with_capacity(self.subsequences.len());
        for (index, subsequence) in self.subsequences.iter().enumerate() {
            let mut text = String::new();
            let (min, max) = (subsequence.min_seq_offset(), subsequence.max_seq_offset());
            if min != 0 || max != 0 {
                if min == max {
                    text.push_str(&format!("{{{min}}}"));
                } else {
                    text.push_str(&format!("{{{min}-{max}}}"));
                }
            }
            text.push_str(&subsequence.to_expression());
            if index > 0 {
                parts.push("*".to_string());
            }
            parts.push(text);
        }
        parts.join("")
    }
}

impl fmt::Display for ByteSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_expression())
    }
}
