//! Signature definition documents.
//!
//! The on-disk database is a JSON document carrying, per signature, the
//! same fields the PRONOM-derived XML schema does: an id and a list of byte
//! sequences, each with a `reference` anchoring, optional endianness and
//! indirect-offset fields, and either a whole signature-syntax expression
//! or explicit subsequences (offset window, anchor text, left/right
//! fragment lists). Field names are the contract here, not tag syntax.
//!
//! Definition errors are contained: a signature whose expression or
//! fragments fail to compile is dropped from the collection with a warning,
//! never failing the whole load.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::compiler;

use super::file::SignatureFile;
use super::format::FileFormat;
use super::fragment::SideFragment;
use super::internal::InternalSignatureBuilder;
use super::sequence::{ByteSequenceBuilder, Reference};
use super::subsequence::SubSequenceBuilder;
use super::SignatureError;

/// Root of a signature definition document.
#[derive(Debug, Clone, Deserialize)]
pub struct SignatureFileDef {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub date_created: String,
    /// Default scan bound carried by the database; negative = unlimited.
    #[serde(default)]
    pub max_bytes_to_scan: Option<i64>,
    #[serde(default)]
    pub formats: Vec<FileFormat>,
    pub signatures: Vec<SignatureDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignatureDef {
    pub id: u32,
    pub byte_sequences: Vec<ByteSequenceDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ByteSequenceDef {
    pub reference: Reference,
    /// "Big-endian" (default) or "Little-endian"; only meaningful for
    /// indirect offsets.
    #[serde(default)]
    pub endianness: Option<String>,
    #[serde(default)]
    pub indirect_offset_length: u32,
    #[serde(default)]
    pub indirect_offset_location: i64,
    /// Whole signature-syntax expression. Used when no explicit
    /// subsequences are given.
    #[serde(default)]
    pub sequence: Option<String>,
    #[serde(default)]
    pub subsequences: Vec<SubSequenceDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubSequenceDef {
    #[serde(default)]
    pub min_offset: i64,
    #[serde(default)]
    pub max_offset: i64,
    /// Anchor text: a fixed-length run in signature syntax.
    pub sequence: String,
    #[serde(default)]
    pub left_fragments: Vec<FragmentDef>,
    #[serde(default)]
    pub right_fragments: Vec<FragmentDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FragmentDef {
    /// 1-based position; fragments sharing a position are alternatives.
    pub position: usize,
    #[serde(default)]
    pub min_offset: i64,
    #[serde(default)]
    pub max_offset: i64,
    /// Fragment text: a fixed-length run in signature syntax.
    pub fragment: String,
}

/// Loads and prepares a signature database from a JSON file.
pub fn load_signature_file(path: &Path) -> Result<SignatureFile, SignatureError> {
    let contents = fs::read_to_string(path)?;
    parse_signature_file(&contents)
}

/// Parses and prepares a signature database from JSON text.
pub fn parse_signature_file(json: &str) -> Result<SignatureFile, SignatureError> {
    let def: SignatureFileDef = serde_json::from_str(json)?;
    Ok(def.build())
}

impl SignatureFileDef {
    /// Builds the prepared database. Signatures with definition errors are
    /// dropped here with a warning; everything else proceeds.
    pub fn build(self) -> SignatureFile {
        let mut builders = Vec::with_capacity(self.signatures.len());
        for signature in self.signatures {
            let id = signature.id;
            match build_signature(signature) {
                Ok(builder) => builders.push(builder),
                Err(error) => {
                    tracing::warn!(signature_id = id, %error, "removing invalid signature");
                }
            }
        }
        let mut file = SignatureFile::new(self.version, self.date_created, self.formats, builders);
        if let Some(max_bytes) = self.max_bytes_to_scan {
            file.set_max_bytes_to_scan(max_bytes);
        }
        file
    }
}

fn build_signature(def: SignatureDef) -> Result<InternalSignatureBuilder, SignatureError> {
    let mut builder = InternalSignatureBuilder::new(def.id);
    for sequence in def.byte_sequences {
        builder.add_byte_sequence(build_byte_sequence(sequence)?);
    }
    Ok(builder)
}

fn build_byte_sequence(def: ByteSequenceDef) -> Result<ByteSequenceBuilder, SignatureError> {
    let mut builder = if def.subsequences.is_empty() {
        match &def.sequence {
            Some(expression) => ByteSequenceBuilder::from_expression(def.reference, expression),
            None => {
                return Err(SignatureError::Definition(
                    "byte sequence needs either a sequence expression or subsequences".to_string(),
                ))
            }
        }
    } else {
        let mut builder = ByteSequenceBuilder::new(def.reference);
        for subsequence in &def.subsequences {
            builder.add_subsequence(build_subsequence(subsequence)?);
        }
        builder
    };

    if let Some(endianness) = &def.endianness {
        builder.set_big_endian(endianness != "Little-endian");
    }
    if def.indirect_offset_length > 0 {
        builder.set_indirect_offset(def.indirect_offset_length, def.indirect_offset_location);
    }
    Ok(builder)
}

fn build_subsequence(def: &SubSequenceDef) -> Result<SubSequenceBuilder, SignatureError> {
    let anchor = compiler::compile_anchor(&def.sequence)?;
    let left = group_fragments(&def.left_fragments)?;
    let right = group_fragments(&def.right_fragments)?;
    let mut builder = SubSequenceBuilder::new(anchor, left, right, 0, 0);
    builder.set_min_seq_offset(def.min_offset);
    builder.set_max_seq_offset(def.max_offset);
    Ok(builder)
}

/// Groups flat fragment definitions into position-ordered alternative sets.
/// Positions must be contiguous from 1.
fn group_fragments(defs: &[FragmentDef]) -> Result<Vec<Vec<SideFragment>>, SignatureError> {
    let positions = defs.iter().map(|def| def.position).max().unwrap_or(0);
    let mut grouped: Vec<Vec<SideFragment>> = vec![Vec::new(); positions];
    for def in defs {
        if def.position == 0 {
            return Err(SignatureError::Definition("fragment positions are 1-based".to_string()));
        }
        let matcher = compiler::compile_fragment(&def.fragment)?;
        let mut fragment = SideFragment::new(matcher, 0, 0, def.position);
        // Attribute order from the definition: min first, then max, with
        // the later-set bound winning if they cross.
        fragment.set_min_offset(def.min_offset);
        fragment.set_max_offset(def.max_offset);
        grouped[def.position - 1].push(fragment);
    }
    if let Some(empty) = grouped.iter().position(|alternatives| alternatives.is_empty()) {
        return Err(SignatureError::FragmentPositionGap { position: empty + 1 });
    }
    Ok(grouped)
}
