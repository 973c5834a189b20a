//! Hallmark Library
//!
//! Fast binary file-format identification driven by PRONOM-style
//! byte-pattern signatures: a compiled signature model, a bidirectional
//! Boyer-Moore-Horspool search engine with fragment backtracking, and a
//! parallel identification driver.
//!
//! # Features
//!
//! - **Signature compiler**: the PRONOM/DROID signature mini-language
//!   (`4D5A`, `??`, `[41:5A]`, `{2-9}`, `(61|62)`, `'text'`, `*`) compiled
//!   into anchored skip-searchable patterns
//! - **Bidirectional search**: BOF-anchored sequences scan forwards,
//!   EOF-anchored ones backwards, each bounded to its own offset window
//! - **Fragment backtracking**: repeated-byte patterns are re-searched
//!   until a placement satisfies every offset constraint
//! - **Parallel identification**: rayon fans files out across workers over
//!   one shared, read-only compiled model
//! - **Read-only safe**: targets are memory-mapped and never modified
//!
//! # Example
//!
//! ```no_run
//! use hallmark::engine::{Identifier, IdentifyOptions};
//! use hallmark::signature::store;
//! use std::path::PathBuf;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let signatures = store::load_signature_file(&PathBuf::from("signatures.json"))?;
//!     let identifier = Identifier::new(
//!         signatures,
//!         IdentifyOptions { source: PathBuf::from("/data"), ..Default::default() },
//!     );
//!
//!     let (files, summary) = identifier.identify().await?;
//!     println!("{} of {} files identified", summary.files_identified, files.len());
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod pattern;
pub mod reader;
pub mod signature;

// Re-export commonly used types
pub use compiler::CompileError;
pub use config::Config;
pub use engine::{
    FileIdentification, FormatHit, IdentificationMethod, Identifier, IdentifyOptions,
    IdentifyProgress, IdentifyResult,
};
pub use pattern::{AnchorSearcher, ByteClass, ByteMatcher, SequenceMatcher};
pub use reader::{ByteReader, FileBytes};
pub use signature::{
    ByteSequence, ByteSequenceBuilder, FileFormat, InternalSignature, InternalSignatureBuilder,
    Reference, Side, SideFragment, SignatureCollection, SignatureError, SignatureFile,
    SignatureHit, SubSequence, SubSequenceBuilder,
};
