//! End-to-end identification tests: signature database in, verdicts out.

use std::path::{Path, PathBuf};

use hallmark::engine::{IdentificationMethod, Identifier, IdentifyOptions};
use hallmark::signature::store::parse_signature_file;
use hallmark::signature::SignatureFile;

/// A small but realistic database: PDF (header + footer), PNG, ZIP local
/// header with version range, GIF with alternatives, and a tentative
/// text format with no signature at all.
fn demo_database() -> SignatureFile {
    parse_signature_file(
        r#"{
        "version": "v104-demo",
        "date_created": "2024-06-01",
        "formats": [
            { "puid": "fmt/276", "name": "Acrobat PDF 1.7", "mime_type": "application/pdf",
              "extensions": ["pdf"], "signature_ids": [1] },
            { "puid": "fmt/11", "name": "Portable Network Graphics", "mime_type": "image/png",
              "extensions": ["png"], "signature_ids": [2] },
            { "puid": "x-fmt/263", "name": "ZIP Format", "mime_type": "application/zip",
              "extensions": ["zip"], "signature_ids": [3] },
            { "puid": "fmt/4", "name": "Graphics Interchange Format",
              "extensions": ["gif"], "signature_ids": [4] },
            { "puid": "x-fmt/111", "name": "Plain Text", "extensions": ["txt"],
              "signature_ids": [] }
        ],
        "signatures": [
            { "id": 1, "byte_sequences": [
                { "reference": "BOFoffset", "sequence": "255044462D312E" },
                { "reference": "EOFoffset", "sequence": "2525454F46{0-1024}" }
            ]},
            { "id": 2, "byte_sequences": [
                { "reference": "BOFoffset", "sequence": "89504E470D0A1A0A" }
            ]},
            { "id": 3, "byte_sequences": [
                { "reference": "BOFoffset", "sequence": "504B0304[14:2D]" }
            ]},
            { "id": 4, "byte_sequences": [
                { "reference": "BOFoffset", "sequence": "4749463839(61|62)" }
            ]}
        ]
    }"#,
    )
    .unwrap()
}

fn identify_bytes(data: &[u8]) -> Vec<String> {
    demo_database().identify(&data).iter().flat_map(|hit| hit.puids.clone()).collect()
}

#[test]
fn pdf_needs_both_header_and_footer() {
    let full = b"%PDF-1.7 body text %%EOF\n".to_vec();
    assert_eq!(identify_bytes(&full), vec!["fmt/276".to_string()]);

    let headerless = b"plain body text %%EOF\n".to_vec();
    assert!(identify_bytes(&headerless).is_empty());

    let footerless = b"%PDF-1.7 body text, unterminated".to_vec();
    assert!(identify_bytes(&footerless).is_empty());
}

#[test]
fn pdf_footer_gap_tolerates_trailing_bytes() {
    // %%EOF may sit up to 1024 bytes before the end of the file.
    let mut padded = b"%PDF-1.7 body %%EOF".to_vec();
    padded.extend(std::iter::repeat(b'\n').take(512));
    assert_eq!(identify_bytes(&padded), vec!["fmt/276".to_string()]);

    let mut too_far = b"%PDF-1.7 body %%EOF".to_vec();
    too_far.extend(std::iter::repeat(b'\n').take(2048));
    assert!(identify_bytes(&too_far).is_empty());
}

#[test]
fn zip_version_range_matches_the_class() {
    for version in [0x14u8, 0x1f, 0x2d] {
        let data = [0x50, 0x4b, 0x03, 0x04, version, 0x00, 0x00];
        assert_eq!(identify_bytes(&data), vec!["x-fmt/263".to_string()], "{version:#x}");
    }
    let out_of_range = [0x50, 0x4b, 0x03, 0x04, 0x2e, 0x00, 0x00];
    assert!(identify_bytes(&out_of_range).is_empty());
}

#[test]
fn gif_alternatives_accept_87a_and_89a_variants() {
    assert_eq!(identify_bytes(b"GIF89a......"), vec!["fmt/4".to_string()]);
    assert_eq!(identify_bytes(b"GIF89b......"), vec!["fmt/4".to_string()]);
    assert!(identify_bytes(b"GIF89c......").is_empty());
}

#[test]
fn png_prefix_of_another_format_does_not_cross_match() {
    let png = [0x89u8, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00];
    assert_eq!(identify_bytes(&png), vec!["fmt/11".to_string()]);
    // One flipped bit in the magic: nothing matches.
    let not_png = [0x88u8, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00];
    assert!(identify_bytes(&not_png).is_empty());
}

fn write_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, data).unwrap();
    path
}

#[tokio::test]
async fn directory_run_reports_methods_and_summary() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "report.pdf", b"%PDF-1.7 report body %%EOF");
    write_file(dir.path(), "notes.txt", b"just some notes");
    write_file(dir.path(), "blob.dat", &[0u8; 128]);
    let nested = dir.path().join("nested");
    std::fs::create_dir(&nested).unwrap();
    write_file(&nested, "image.png", &[0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 1, 2, 3]);

    let identifier = Identifier::new(
        demo_database(),
        IdentifyOptions { source: dir.path().to_path_buf(), ..Default::default() },
    );
    let (results, summary) = identifier.identify().await.unwrap();

    assert_eq!(summary.files_scanned, 4);
    assert_eq!(summary.files_identified, 2);
    assert_eq!(summary.files_tentative, 1);
    assert_eq!(summary.files_unidentified, 1);
    assert_eq!(summary.by_format.get("fmt/276"), Some(&1));
    assert_eq!(summary.by_format.get("fmt/11"), Some(&1));

    let pdf = results.iter().find(|r| r.path.ends_with("report.pdf")).unwrap();
    assert_eq!(pdf.method, IdentificationMethod::BinarySignature);
    assert_eq!(pdf.formats[0].name, "Acrobat PDF 1.7");

    let txt = results.iter().find(|r| r.path.ends_with("notes.txt")).unwrap();
    assert_eq!(txt.method, IdentificationMethod::Extension);
    assert_eq!(txt.formats[0].puid, "x-fmt/111");
    assert_eq!(txt.formats[0].signature_id, None);
}

#[tokio::test]
async fn non_recursive_run_skips_nested_files() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "top.pdf", b"%PDF-1.7 x %%EOF");
    let nested = dir.path().join("deep");
    std::fs::create_dir(&nested).unwrap();
    write_file(&nested, "hidden.pdf", b"%PDF-1.7 y %%EOF");

    let identifier = Identifier::new(
        demo_database(),
        IdentifyOptions {
            source: dir.path().to_path_buf(),
            recursive: false,
            ..Default::default()
        },
    );
    let (_, summary) = identifier.identify().await.unwrap();
    assert_eq!(summary.files_scanned, 1);
}

#[tokio::test]
async fn empty_and_tiny_files_never_crash_the_run() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "empty.pdf", b"");
    write_file(dir.path(), "one.pdf", b"%");
    write_file(dir.path(), "four.pdf", b"%PDF");

    let identifier = Identifier::new(
        demo_database(),
        IdentifyOptions {
            source: dir.path().to_path_buf(),
            extension_fallback: false,
            ..Default::default()
        },
    );
    let (results, summary) = identifier.identify().await.unwrap();
    assert_eq!(summary.files_scanned, 3);
    assert_eq!(summary.files_failed, 0);
    assert!(results.iter().all(|r| r.method == IdentificationMethod::None));
}

#[test]
fn overriding_container_signatures_suppress_binary_hits() {
    let mut database = demo_database();
    database.puid_has_overriding_signatures("fmt/276");

    let pdf = b"%PDF-1.7 body %%EOF".to_vec();
    let hits = database.identify(&pdf.as_slice());
    assert!(hits.is_empty(), "overridden PDF signature must not run");

    // Other formats are untouched.
    let png = [0x89u8, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a];
    assert_eq!(database.identify(&png.as_slice()).len(), 1);
}
