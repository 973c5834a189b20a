//! The top-level signature file: signatures wired to file formats.
//!
//! Owns the prepared signature collection and the format records, plus the
//! extension maps used for tentative identification when no binary
//! signature hits. Built once (see [`super::store`]) and then shared
//! read-only across identification workers.

use std::collections::HashMap;

use crate::reader::ByteReader;

use super::format::FileFormat;
use super::internal::{InternalSignatureBuilder, SignatureCollection};

/// One matching signature and the formats it identifies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHit {
    pub signature_id: u32,
    pub puids: Vec<String>,
}

/// A prepared signature database.
pub struct SignatureFile {
    version: String,
    date_created: String,
    formats: Vec<FileFormat>,
    by_puid: HashMap<String, usize>,
    signatures: SignatureCollection,
    /// Uppercased extension → formats with no signature at all.
    tentative_formats: HashMap<String, Vec<usize>>,
    /// Uppercased extension → every format claiming it.
    formats_for_extension: HashMap<String, Vec<usize>>,
    max_bytes_to_scan: i64,
}

impl SignatureFile {
    /// Wires formats and signature builders into a ready-to-use database:
    /// prepares the signatures (dropping invalid ones with a warning),
    /// links the survivors to their formats and builds the extension maps.
    pub fn new(
        version: impl Into<String>,
        date_created: impl Into<String>,
        formats: Vec<FileFormat>,
        signatures: Vec<InternalSignatureBuilder>,
    ) -> Self {
        let mut file = Self {
            version: version.into(),
            date_created: date_created.into(),
            formats,
            by_puid: HashMap::new(),
            signatures: SignatureCollection::prepare(signatures),
            tentative_formats: HashMap::new(),
            formats_for_extension: HashMap::new(),
            // Scan whole files unless the caller bounds it.
            max_bytes_to_scan: -1,
        };
        file.link_signature_formats();
        file.build_extension_maps();
        tracing::info!(
            version = %file.version,
            formats = file.formats.len(),
            signatures = file.signatures.len(),
            "signature file prepared"
        );
        file
    }

    fn link_signature_formats(&mut self) {
        self.by_puid = self
            .formats
            .iter()
            .enumerate()
            .map(|(index, format)| (format.puid.clone(), index))
            .collect();
        for format in &mut self.formats {
            // Forget ids whose signatures were dropped as invalid, so the
            // format correctly becomes tentative if none survive.
            format.signature_ids.retain(|id| self.signatures.signature(*id).is_some());
        }
        for format in &self.formats {
            for id in &format.signature_ids {
                if let Some(signature) = self.signatures.signature_mut(*id) {
                    signature.add_format(&format.puid);
                }
            }
        }
    }

    fn build_extension_maps(&mut self) {
        for (index, format) in self.formats.iter().enumerate() {
            for extension in &format.extensions {
                let key = extension.to_uppercase();
                self.formats_for_extension.entry(key.clone()).or_default().push(index);
                if format.signature_ids.is_empty() {
                    self.tentative_formats.entry(key).or_default().push(index);
                }
            }
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn date_created(&self) -> &str {
        &self.date_created
    }

    pub fn signatures(&self) -> &SignatureCollection {
        &self.signatures
    }

    pub fn formats(&self) -> &[FileFormat] {
        &self.formats
    }

    pub fn format(&self, puid: &str) -> Option<&FileFormat> {
        self.by_puid.get(puid).map(|index| &self.formats[*index])
    }

    /// Maximum bytes scanned from each end of a file; zero or negative
    /// means whole-file scanning.
    pub fn max_bytes_to_scan(&self) -> i64 {
        self.max_bytes_to_scan
    }

    pub fn set_max_bytes_to_scan(&mut self, max_bytes_to_scan: i64) {
        self.max_bytes_to_scan = max_bytes_to_scan;
    }

    /// Identifies a file: runs every signature in collection order and
    /// reports each matching signature with the formats it maps to.
    pub fn identify<R: ByteReader + ?Sized>(&self, reader: &R) -> Vec<SignatureHit> {
        self.signatures
            .matching_signatures(reader, self.max_bytes_to_scan)
            .into_iter()
            .map(|signature| SignatureHit {
                signature_id: signature.id(),
                puids: signature.format_puids().to_vec(),
            })
            .collect()
    }

    /// Formats for an extension that have no other signature defined — the
    /// classic meaning of a "tentative" format.
    pub fn tentative_formats_for_extension(&self, extension: &str) -> Vec<&FileFormat> {
        self.tentative_formats
            .get(&extension.to_uppercase())
            .map(|indices| indices.iter().map(|index| &self.formats[*index]).collect())
            .unwrap_or_default()
    }

    /// Every format claiming an extension.
    pub fn formats_for_extension(&self, extension: &str) -> Vec<&FileFormat> {
        self.formats_for_extension
            .get(&extension.to_uppercase())
            .map(|indices| indices.iter().map(|index| &self.formats[*index]).collect())
            .unwrap_or_default()
    }

    /// Tells the database that `puid` is identified by an overriding
    /// mechanism elsewhere (a container signature, say), so its binary
    /// signatures must not run.
    ///
    /// Detaches the format's signatures, removes signatures left with no
    /// formats at all, and drops the format from the tentative maps — it is
    /// definitely not tentative if something overrides it.
    pub fn puid_has_overriding_signatures(&mut self, puid: &str) {
        let Some(&format_index) = self.by_puid.get(puid) else {
            return;
        };
        let removed_ids = self.formats[format_index].clear_signatures();
        for id in removed_ids {
            let remove = if let Some(signature) = self.signatures.signature_mut(id) {
                signature.remove_format(puid);
                signature.format_puids().is_empty()
            } else {
                false
            };
            if remove {
                self.signatures.remove(id);
            }
        }
        for extension in self.formats[format_index].extensions.clone() {
            let key = extension.to_uppercase();
            if let Some(indices) = self.tentative_formats.get_mut(&key) {
                indices.retain(|index| *index != format_index);
                if indices.is_empty() {
                    self.tentative_formats.remove(&key);
                }
            }
        }
    }
}
