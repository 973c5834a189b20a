//! File format records from the signature database.

use serde::{Deserialize, Serialize};

/// A file format known to the signature database.
///
/// Formats are keyed by PUID (persistent unique identifier, e.g.
/// `fmt/276`). A format may be identified by several signatures, and one
/// signature may identify several formats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileFormat {
    pub puid: String,
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Known file extensions, without the leading dot.
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Ids of the internal signatures identifying this format. A format
    /// with no signatures can only ever be a tentative, extension-based
    /// identification.
    #[serde(default)]
    pub signature_ids: Vec<u32>,
}

impl FileFormat {
    pub fn has_extension(&self, extension: &str) -> bool {
        self.extensions.iter().any(|known| known.eq_ignore_ascii_case(extension))
    }

    /// Detaches every signature from this format, returning the ids that
    /// were attached.
    pub(crate) fn clear_signatures(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.signature_ids)
    }
}
