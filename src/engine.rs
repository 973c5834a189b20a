//! Identification engine - run a signature database over many files.
//!
//! Walks a file or directory tree and identifies every file against the
//! prepared signature database.
//!
//! # Design
//!
//! - **mmap**: zero-copy access to each target via `memmap2`
//! - **Parallel files**: identification is synchronous per file; rayon fans
//!   the file list out across workers, each holding its own private reader
//!   while the compiled signature model is shared read-only
//! - **Extension fallback**: files with no binary signature hit can fall
//!   back to extension lookups (tentative formats first)
//! - **Fail-safe**: unreadable files are counted and logged, never fatal

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::reader::{ByteReader, FileBytes};
use crate::signature::{SignatureFile, SignatureHit};

/// Options for an identification run.
#[derive(Debug, Clone)]
pub struct IdentifyOptions {
    /// File or directory to identify.
    pub source: PathBuf,
    /// Maximum bytes to scan from each end of every file; zero or negative
    /// scans whole files. Overrides the database default when set.
    pub max_bytes_to_scan: Option<i64>,
    /// Number of parallel workers.
    pub workers: usize,
    /// Recurse into directories.
    pub recursive: bool,
    /// Fall back to extension lookups when no signature matches.
    pub extension_fallback: bool,
}

impl Default for IdentifyOptions {
    fn default() -> Self {
        Self {
            source: PathBuf::new(),
            max_bytes_to_scan: None,
            workers: num_cpus::get(),
            recursive: true,
            extension_fallback: true,
        }
    }
}

/// How a file ended up identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentificationMethod {
    /// One or more binary signatures matched.
    BinarySignature,
    /// No signature matched; extension-only (tentative) formats claimed it.
    Extension,
    /// Nothing matched at all.
    None,
}

/// Identification outcome for one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileIdentification {
    pub path: PathBuf,
    pub size: u64,
    pub method: IdentificationMethod,
    /// Matched format PUIDs with names, one entry per (signature, format)
    /// pairing. Multiple hits are all reported.
    pub formats: Vec<FormatHit>,
}

/// One identified format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatHit {
    pub puid: String,
    pub name: String,
    /// The signature that produced the hit; absent for extension fallback.
    pub signature_id: Option<u32>,
}

/// Aggregate results of an identification run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentifyResult {
    pub files_scanned: usize,
    pub files_identified: usize,
    pub files_tentative: usize,
    pub files_unidentified: usize,
    pub files_failed: usize,
    pub total_bytes: u64,
    pub duration_ms: u64,
    pub completed_at: Option<DateTime<Utc>>,
    pub by_format: std::collections::HashMap<String, usize>,
}

/// Progress updates emitted during identification.
#[derive(Debug, Clone)]
pub enum IdentifyProgress {
    /// Scanning phase: files done out of total.
    Scanning { files_done: usize, total_files: usize },
    /// Done.
    Done,
}

/// The identification engine.
pub struct Identifier {
    signature_file: Arc<SignatureFile>,
    options: IdentifyOptions,
}

impl Identifier {
    pub fn new(signature_file: SignatureFile, options: IdentifyOptions) -> Self {
        Self { signature_file: Arc::new(signature_file), options }
    }

    pub fn signature_file(&self) -> &SignatureFile {
        &self.signature_file
    }

    /// Identify with a progress callback, called as files complete.
    pub async fn identify_with_progress<F>(
        &self,
        on_progress: F,
    ) -> Result<(Vec<FileIdentification>, IdentifyResult)>
    where
        F: Fn(IdentifyProgress) + Send + Sync,
    {
        let start = Instant::now();
        let source = &self.options.source;
        anyhow::ensure!(source.exists(), "Source not found: {}", source.display());

        let files = self.collect_files()?;
        let total_files = files.len();

        tracing::info!(
            source = %source.display(),
            files = total_files,
            signatures = self.signature_file.signatures().len(),
            workers = self.options.workers,
            "Starting identification"
        );

        let done = Arc::new(AtomicUsize::new(0));
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.workers.max(1))
            .build()
            .context("Failed to build worker pool")?;

        let identified: Vec<Result<FileIdentification, PathBuf>> = pool.install(|| {
            files
                .par_iter()
                .map(|path| {
                    let outcome = self.identify_file(path).map_err(|error| {
                        tracing::warn!(path = %path.display(), %error, "Failed to identify file");
                        path.clone()
                    });
                    let files_done = done.fetch_add(1, Ordering::Relaxed) + 1;
                    on_progress(IdentifyProgress::Scanning { files_done, total_files });
                    outcome
                })
                .collect()
        });

        let mut results = Vec::with_capacity(total_files);
        let mut summary = IdentifyResult { files_scanned: total_files, ..Default::default() };
        for outcome in identified {
            match outcome {
                Ok(identification) => {
                    match identification.method {
                        IdentificationMethod::BinarySignature => summary.files_identified += 1,
                        IdentificationMethod::Extension => summary.files_tentative += 1,
                        IdentificationMethod::None => summary.files_unidentified += 1,
                    }
                    summary.total_bytes += identification.size;
                    for hit in &identification.formats {
                        *summary.by_format.entry(hit.puid.clone()).or_insert(0) += 1;
                    }
                    results.push(identification);
                }
                Err(_) => summary.files_failed += 1,
            }
        }

        on_progress(IdentifyProgress::Done);
        summary.duration_ms = start.elapsed().as_millis() as u64;
        summary.completed_at = Some(Utc::now());

        tracing::info!(
            files_scanned = summary.files_scanned,
            files_identified = summary.files_identified,
            files_tentative = summary.files_tentative,
            files_unidentified = summary.files_unidentified,
            files_failed = summary.files_failed,
            duration_ms = summary.duration_ms,
            "Identification complete"
        );

        Ok((results, summary))
    }

    /// Convenience wrapper without progress (for tests and non-interactive
    /// use).
    pub async fn identify(&self) -> Result<(Vec<FileIdentification>, IdentifyResult)> {
        self.identify_with_progress(|_| {}).await
    }

    /// Identifies a single file.
    pub fn identify_file(&self, path: &Path) -> Result<FileIdentification> {
        let reader = FileBytes::open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let size = reader.num_bytes();
        let hits = self.run_signatures(&reader);

        let (method, formats) = if !hits.is_empty() {
            (IdentificationMethod::BinarySignature, self.signature_hits_to_formats(&hits))
        } else if self.options.extension_fallback {
            let fallback = self.extension_fallback(path);
            if fallback.is_empty() {
                (IdentificationMethod::None, fallback)
            } else {
                (IdentificationMethod::Extension, fallback)
            }
        } else {
            (IdentificationMethod::None, Vec::new())
        };

        Ok(FileIdentification { path: path.to_path_buf(), size, method, formats })
    }

    fn run_signatures<R: ByteReader + ?Sized>(&self, reader: &R) -> Vec<SignatureHit> {
        match self.options.max_bytes_to_scan {
            // Run with the caller's scan bound instead of the database's.
            Some(max_bytes) => self
                .signature_file
                .signatures()
                .matching_signatures(reader, max_bytes)
                .into_iter()
                .map(|signature| SignatureHit {
                    signature_id: signature.id(),
                    puids: signature.format_puids().to_vec(),
                })
                .collect(),
            None => self.signature_file.identify(reader),
        }
    }

    fn signature_hits_to_formats(&self, hits: &[SignatureHit]) -> Vec<FormatHit> {
        let mut formats = Vec::new();
        for hit in hits {
            for puid in &hit.puids {
                let name = self
                    .signature_file
                    .format(puid)
                    .map(|format| format.name.clone())
                    .unwrap_or_default();
                formats.push(FormatHit {
                    puid: puid.clone(),
                    name,
                    signature_id: Some(hit.signature_id),
                });
            }
        }
        formats
    }

    fn extension_fallback(&self, path: &Path) -> Vec<FormatHit> {
        let Some(extension) = path.extension().and_then(|e| e.to_str()) else {
            return Vec::new();
        };
        let mut tentative = self.signature_file.tentative_formats_for_extension(extension);
        if tentative.is_empty() {
            // Nothing extension-only; fall back to any format claiming it.
            tentative = self.signature_file.formats_for_extension(extension);
        }
        tentative
            .into_iter()
            .map(|format| FormatHit {
                puid: format.puid.clone(),
                name: format.name.clone(),
                signature_id: None,
            })
            .collect()
    }

    fn collect_files(&self) -> Result<Vec<PathBuf>> {
        let source = &self.options.source;
        if source.is_file() {
            return Ok(vec![source.clone()]);
        }
        let max_depth = if self.options.recursive { usize::MAX } else { 1 };
        let mut files: Vec<PathBuf> = WalkDir::new(source)
            .max_depth(max_depth)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect();
        files.sort();
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::store::parse_signature_file;

    const DEMO_SIGNATURES: &str = r#"{
        "version": "demo",
        "formats": [
            { "puid": "fmt/276", "name": "PDF", "extensions": ["pdf"], "signature_ids": [1] },
            { "puid": "fmt/11", "name": "PNG", "extensions": ["png"], "signature_ids": [2] },
            { "puid": "x-fmt/111", "name": "Plain Text", "extensions": ["txt"], "signature_ids": [] }
        ],
        "signatures": [
            { "id": 1, "byte_sequences": [
                { "reference": "BOFoffset", "sequence": "25504446" },
                { "reference": "EOFoffset", "sequence": "2525454F46" }
            ]},
            { "id": 2, "byte_sequences": [
                { "reference": "BOFoffset", "sequence": "89504E470D0A1A0A" }
            ]}
        ]
    }"#;

    fn run_identify(options: IdentifyOptions) -> (Vec<FileIdentification>, IdentifyResult) {
        let signature_file = parse_signature_file(DEMO_SIGNATURES).unwrap();
        let identifier = Identifier::new(signature_file, options);
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async { identifier.identify().await.unwrap() })
    }

    fn write_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn identifies_a_mixed_directory() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "doc.pdf", b"%PDF-1.4 content %%EOF");
        write_file(
            dir.path(),
            "img.png",
            &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0],
        );
        write_file(dir.path(), "notes.txt", b"hello");
        write_file(dir.path(), "mystery.bin", b"\x00\x01\x02\x03");

        let (results, summary) = run_identify(IdentifyOptions {
            source: dir.path().to_path_buf(),
            ..Default::default()
        });

        assert_eq!(summary.files_scanned, 4);
        assert_eq!(summary.files_identified, 2);
        assert_eq!(summary.files_tentative, 1);
        assert_eq!(summary.files_unidentified, 1);
        assert_eq!(summary.files_failed, 0);

        let by_name: std::collections::HashMap<_, _> = results
            .iter()
            .map(|r| (r.path.file_name().unwrap().to_str().unwrap().to_string(), r))
            .collect();
        assert_eq!(by_name["doc.pdf"].method, IdentificationMethod::BinarySignature);
        assert_eq!(by_name["doc.pdf"].formats[0].puid, "fmt/276");
        assert_eq!(by_name["img.png"].formats[0].signature_id, Some(2));
        assert_eq!(by_name["notes.txt"].method, IdentificationMethod::Extension);
        assert_eq!(by_name["mystery.bin"].method, IdentificationMethod::None);
    }

    #[test]
    fn single_file_source_works() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "one.pdf", b"%PDF-1.4 x %%EOF");
        let (results, summary) = run_identify(IdentifyOptions {
            source: path,
            ..Default::default()
        });
        assert_eq!(summary.files_scanned, 1);
        assert_eq!(results[0].method, IdentificationMethod::BinarySignature);
    }

    #[test]
    fn truncated_pdf_header_alone_is_not_enough() {
        // Both byte sequences must match: header without footer fails.
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "half.pdf", b"%PDF-1.4 but no footer");
        let (results, _) = run_identify(IdentifyOptions {
            source: path,
            extension_fallback: false,
            ..Default::default()
        });
        assert_eq!(results[0].method, IdentificationMethod::None);
    }

    #[test]
    fn missing_source_errors_cleanly() {
        let signature_file = parse_signature_file(DEMO_SIGNATURES).unwrap();
        let identifier = Identifier::new(
            signature_file,
            IdentifyOptions { source: PathBuf::from("/nonexistent/nowhere"), ..Default::default() },
        );
        let rt = tokio::runtime::Runtime::new().unwrap();
        assert!(rt.block_on(async { identifier.identify().await }).is_err());
    }

    #[test]
    fn scan_bound_override_can_suppress_deep_matches() {
        let dir = tempfile::tempdir().unwrap();
        // Variable-anchored signature that sits deep in the file.
        let json = r#"{
            "formats": [
                { "puid": "t/1", "name": "Deep", "extensions": [], "signature_ids": [1] }
            ],
            "signatures": [
                { "id": 1, "byte_sequences": [
                    { "reference": "Variable", "sequence": "'DEEPMARK'" }
                ]}
            ]
        }"#;
        let mut data = vec![b'.'; 4096];
        data.extend_from_slice(b"DEEPMARK");
        let path = write_file(dir.path(), "deep.bin", &data);

        let signature_file = parse_signature_file(json).unwrap();
        let identifier = Identifier::new(
            signature_file,
            IdentifyOptions {
                source: path.clone(),
                max_bytes_to_scan: Some(1024),
                extension_fallback: false,
                ..Default::default()
            },
        );
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (results, _) = rt.block_on(async { identifier.identify().await.unwrap() });
        assert_eq!(results[0].method, IdentificationMethod::None);

        let signature_file = parse_signature_file(json).unwrap();
        let identifier = Identifier::new(
            signature_file,
            IdentifyOptions {
                source: path,
                extension_fallback: false,
                ..Default::default()
            },
        );
        let (results, _) = rt.block_on(async { identifier.identify().await.unwrap() });
        assert_eq!(results[0].method, IdentificationMethod::BinarySignature);
    }
}
