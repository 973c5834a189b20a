//! Signature expression compiler.
//!
//! Turns signature mini-language text into the compiled matching model:
//! each `*`-separated subsequence gets the longest contiguous literal run
//! selected as its search anchor, with everything around the anchor built
//! into left/right fragments carrying offset windows.

mod compile;
pub mod parser;

pub use compile::{compile_anchor, compile_expression, compile_fragment};
pub use parser::{parse_expression, Node};

use thiserror::Error;

/// Why a signature expression failed to compile.
///
/// Compilation failures never abort a whole signature set: the owning
/// signature is flagged invalid and dropped from the active collection with
/// a warning.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// The expression text does not follow the signature syntax.
    #[error("syntax error at byte {position} of [{expression}]: {message}")]
    Syntax {
        message: String,
        position: usize,
        expression: String,
    },

    /// No literal run exists outside of gaps and alternatives, so the
    /// subsequence cannot be searched for.
    #[error("no anchoring sequence could be found in [{expression}]")]
    NoAnchor { expression: String },
}
