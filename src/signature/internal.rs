//! Internal signatures and the active signature collection.
//!
//! A signature is an AND-combination of byte sequences: all of them must
//! match for the signature to hit. After preparation the byte sequences are
//! reordered so the cheapest, most selective anchoring classes run first
//! and can short-circuit a non-match before any expensive scanning.
//!
//! The collection orders whole signatures the same way, using a bitmask
//! computed from the anchoring classes present in each signature. Ordering
//! is purely a performance device — it never affects which signatures
//! match.

use crate::reader::ByteReader;

use super::sequence::{ByteSequence, ByteSequenceBuilder};
use super::SignatureError;

// Anchoring-class presence bits, in evaluation-cost order.
const BOF_SINGLE: u32 = 1;
const BOF_MULTI: u32 = 2;
const VARIABLE: u32 = 4;
const EOF_SINGLE: u32 = 8;
const EOF_MULTI: u32 = 16;

/// Unprepared signature: an id plus its byte sequence builders.
#[derive(Debug, Clone)]
pub struct InternalSignatureBuilder {
    id: u32,
    sequences: Vec<ByteSequenceBuilder>,
}

impl InternalSignatureBuilder {
    pub fn new(id: u32) -> Self {
        Self { id, sequences: Vec::new() }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn add_byte_sequence(&mut self, sequence: ByteSequenceBuilder) -> &mut Self {
        self.sequences.push(sequence);
        self
    }

    /// One-time compilation into an immutable signature.
    ///
    /// Prepares every byte sequence (any failure invalidates the whole
    /// signature), warns once if the signature can never skip scanning,
    /// sorts the sequences by evaluation cost and computes the bitmask
    /// sort order.
    pub fn prepare(self) -> Result<InternalSignature, SignatureError> {
        if self.sequences.is_empty() {
            return Err(SignatureError::Definition(
                "signature contains no byte sequences".to_string(),
            ));
        }
        let mut prepared: Vec<ByteSequence> = Vec::with_capacity(self.sequences.len());
        let mut only_variable = true;
        for sequence in self.sequences {
            let sequence = sequence.prepare()?;
            if sequence.anchored_to_bof() || sequence.anchored_to_eof() {
                only_variable = false;
            }
            prepared.push(sequence);
        }
        if only_variable {
            tracing::warn!(
                signature_id = self.id,
                "signature has no BOF or EOF anchoring and will always scan up to the maximum bytes"
            );
        }
        prepared.sort_by_key(ByteSequence::sort_order);

        let mut sort_order = 0u32;
        for sequence in &prepared {
            sort_order |= if sequence.anchored_to_bof() {
                if sequence.number_of_subsequences() == 1 {
                    BOF_SINGLE
                } else {
                    BOF_MULTI
                }
            } else if sequence.anchored_to_eof() {
                if sequence.number_of_subsequences() == 1 {
                    EOF_SINGLE
                } else {
                    EOF_MULTI
                }
            } else {
                VARIABLE
            };
        }

        Ok(InternalSignature {
            id: self.id,
            sequences: prepared,
            sort_order,
            format_puids: Vec::new(),
        })
    }
}

/// Prepared signature. The format linkage is filled in by the owning
/// signature file before any matching starts; after that the signature is
/// read-only and shared across workers.
pub struct InternalSignature {
    id: u32,
    sequences: Vec<ByteSequence>,
    sort_order: u32,
    format_puids: Vec<String>,
}

impl InternalSignature {
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Bitmask of the anchoring classes present, used to order evaluation
    /// across the collection.
    pub fn sort_order(&self) -> u32 {
        self.sort_order
    }

    pub fn byte_sequences(&self) -> &[ByteSequence] {
        &self.sequences
    }

    /// PUIDs of the file formats this signature identifies.
    pub fn format_puids(&self) -> &[String] {
        &self.format_puids
    }

    pub(crate) fn add_format(&mut self, puid: &str) {
        self.format_puids.push(puid.to_string());
    }

    pub(crate) fn remove_format(&mut self, puid: &str) {
        self.format_puids.retain(|existing| existing != puid);
    }

    /// Whether every byte sequence matches the file (short-circuit AND).
    pub fn matches<R: ByteReader + ?Sized>(&self, reader: &R, max_bytes_to_scan: i64) -> bool {
        self.sequences.iter().all(|sequence| sequence.matches(reader, max_bytes_to_scan))
    }

    /// Signature-syntax rendering of each byte sequence with its anchoring.
    pub fn to_expressions(&self) -> Vec<(String, String)> {
        self.sequences
            .iter()
            .map(|sequence| (sequence.reference().to_string(), sequence.to_expression()))
            .collect()
    }
}

/// The full set of prepared signatures, in evaluation order.
#[derive(Default)]
pub struct SignatureCollection {
    signatures: Vec<InternalSignature>,
}

impl SignatureCollection {
    /// Prepares every builder, dropping (and warning about) signatures that
    /// fail to compile, then orders the survivors for evaluation.
    pub fn prepare(builders: Vec<InternalSignatureBuilder>) -> Self {
        let mut signatures = Vec::with_capacity(builders.len());
        for builder in builders {
            let id = builder.id();
            match builder.prepare() {
                Ok(signature) => signatures.push(signature),
                Err(error) => {
                    tracing::warn!(signature_id = id, %error, "removing invalid signature");
                }
            }
        }
        signatures.sort_by_key(InternalSignature::sort_order);
        Self { signatures }
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    pub fn signatures(&self) -> &[InternalSignature] {
        &self.signatures
    }

    pub fn signature(&self, id: u32) -> Option<&InternalSignature> {
        self.signatures.iter().find(|signature| signature.id() == id)
    }

    pub(crate) fn signature_mut(&mut self, id: u32) -> Option<&mut InternalSignature> {
        self.signatures.iter_mut().find(|signature| signature.id() == id)
    }

    pub(crate) fn remove(&mut self, id: u32) {
        self.signatures.retain(|signature| signature.id() != id);
    }

    /// Runs every signature against the file, in the precomputed order,
    /// returning all that match. A file may legitimately match several
    /// signatures; all of them are reported.
    pub fn matching_signatures<R: ByteReader + ?Sized>(
        &self,
        reader: &R,
        max_bytes_to_scan: i64,
    ) -> Vec<&InternalSignature> {
        if reader.num_bytes() == 0 {
            return Vec::new();
        }
        self.signatures
            .iter()
            .filter(|signature| signature.matches(reader, max_bytes_to_scan))
            .collect()
    }
}
