//! The signature matching model.
//!
//! Built bottom-up: [`fragment::SideFragment`] (one alternative of a
//! gap-adjacent fragment), [`subsequence::SubSequence`] (an anchor plus its
//! fragments and the skip-search algorithm), [`sequence::ByteSequence`]
//! (subsequences joined by unbounded gaps, anchored to BOF/EOF/variable),
//! [`internal::InternalSignature`] (an AND of byte sequences) and
//! [`file::SignatureFile`] (the full database mapped to file formats).
//!
//! Preparation is a one-time, consuming transformation from builder types to
//! immutable compiled types. After preparation the model holds no interior
//! mutability and is shared read-only across identification workers.

pub mod file;
pub mod format;
pub mod fragment;
pub mod internal;
pub mod sequence;
pub mod store;
pub mod subsequence;

pub use file::{SignatureFile, SignatureHit};
pub use format::FileFormat;
pub use fragment::SideFragment;
pub use internal::{InternalSignature, InternalSignatureBuilder, SignatureCollection};
pub use sequence::{ByteSequence, ByteSequenceBuilder, Reference};
pub use subsequence::{SubSequence, SubSequenceBuilder};

use thiserror::Error;

use crate::compiler::CompileError;

/// Which side of the anchor a fragment sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    /// File-order scan direction when verifying this side's fragments:
    /// left fragments are probed walking away from the anchor towards BOF,
    /// right fragments towards EOF.
    pub(crate) fn direction(self) -> i64 {
        match self {
            Side::Left => -1,
            Side::Right => 1,
        }
    }
}

/// Why a signature definition could not be prepared for matching.
///
/// These are definition-time errors: the offending signature is logged and
/// excluded from the active collection, never aborting the rest of the set.
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("subsequence has an empty anchor sequence")]
    EmptyAnchor,

    #[error("fragment positions on one side are not contiguous: missing position {position}")]
    FragmentPositionGap { position: usize },

    #[error("invalid signature definition: {0}")]
    Definition(String),

    #[error("failed to read signature file")]
    Io(#[from] std::io::Error),

    #[error("signature file is not valid JSON")]
    Json(#[from] serde_json::Error),
}
