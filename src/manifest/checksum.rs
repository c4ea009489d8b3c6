//! Canonical manifest checksums and media content digests.
//!
//! Change detection compares a SHA-256 digest of the manifest's canonical
//! serialization: semantic fields only, map keys in sorted order, no
//! incidental whitespace. Two manifests that differ only in JSON field
//! ordering or formatting hash identically; any semantic edit changes
//! the digest.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::Manifest;

/// Read buffer size for file digests.
const DIGEST_BUF_SIZE: usize = 8192;

/// Canonical view of a manifest: the fields that participate in change
/// detection, in a fixed serialization order. `meta` is deliberately
/// excluded - provenance churn must not trigger remote writes.
#[derive(Serialize)]
struct CanonicalManifest<'a> {
    sku: &'a str,
    title: &'a str,
    slug: Option<&'a str>,
    status: &'a str,
    taxonomy: &'a std::collections::BTreeMap<String, Vec<String>>,
    short: Option<&'a str>,
    technical: Option<&'a str>,
    attributes: &'a std::collections::BTreeMap<String, Vec<String>>,
    featured: Option<&'a str>,
    gallery: Vec<(&'a str, Option<&'a str>)>,
}

/// Computes the canonical checksum of a manifest as a lowercase hex
/// SHA-256 digest.
///
/// Stable across runs and across incidental reformatting of the source
/// JSON. Struct fields serialize in declaration order and `BTreeMap`
/// keys iterate sorted, so the byte stream is deterministic.
#[must_use]
pub fn manifest_checksum(manifest: &Manifest) -> String {
    let canonical = CanonicalManifest {
        sku: &manifest.sku,
        title: &manifest.product.title,
        slug: manifest.product.slug.as_deref(),
        status: manifest.product.status.as_str(),
        taxonomy: &manifest.taxonomy,
        short: manifest.descriptions.short.as_deref(),
        technical: manifest.descriptions.technical.as_deref(),
        attributes: &manifest.attributes,
        featured: manifest.media.featured.as_deref(),
        gallery: manifest
            .media
            .gallery
            .iter()
            .map(|g| (g.file.as_str(), g.checksum.as_deref()))
            .collect(),
    };

    // Serialization of this in-memory struct cannot fail.
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    hex_digest(&bytes)
}

/// Computes the SHA-256 content digest of a file, streaming in chunks.
///
/// Used for media dedup: assets are content-addressed by this digest
/// both locally (ledger, in-run cache) and remotely (checksum metadata
/// tag on uploaded assets).
///
/// # Errors
///
/// Returns the underlying IO error when the file cannot be read.
pub fn file_checksum(path: &Path) -> std::io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; DIGEST_BUF_SIZE];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Hex SHA-256 of a byte slice.
#[must_use]
pub fn hex_digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::manifest::Manifest;

    fn parse(json: &str) -> Manifest {
        let dir = tempfile::tempdir().unwrap();
        Manifest::from_json(json.as_bytes(), "A-1", dir.path()).unwrap()
    }

    // ==================== Stability Tests ====================

    #[test]
    fn test_checksum_ignores_field_order_and_whitespace() {
        let a = parse(r#"{"sku": "A-1", "product": {"title": "Widget", "status": "draft"}}"#);
        let b = parse(
            r#"{
                "product": { "status": "draft",   "title": "Widget" },
                "sku":    "A-1"
            }"#,
        );
        assert_eq!(manifest_checksum(&a), manifest_checksum(&b));
    }

    #[test]
    fn test_checksum_ignores_meta_changes() {
        let a = parse(r#"{"sku": "A-1", "product": {"title": "Widget"}}"#);
        let b = parse(
            r#"{"sku": "A-1", "meta": {"schema_version": "1.0", "generated_at": "2026-02-02T00:00:00Z"}, "product": {"title": "Widget"}}"#,
        );
        assert_eq!(manifest_checksum(&a), manifest_checksum(&b));
    }

    #[test]
    fn test_checksum_is_stable_across_calls() {
        let m = parse(r#"{"sku": "A-1", "product": {"title": "Widget"}}"#);
        assert_eq!(manifest_checksum(&m), manifest_checksum(&m));
    }

    // ==================== Change Detection Tests ====================

    #[test]
    fn test_checksum_changes_on_title_edit() {
        let a = parse(r#"{"sku": "A-1", "product": {"title": "Widget"}}"#);
        let b = parse(r#"{"sku": "A-1", "product": {"title": "Widget v2"}}"#);
        assert_ne!(manifest_checksum(&a), manifest_checksum(&b));
    }

    #[test]
    fn test_checksum_changes_on_status_edit() {
        let a = parse(r#"{"sku": "A-1", "product": {"title": "W", "status": "draft"}}"#);
        let b = parse(r#"{"sku": "A-1", "product": {"title": "W", "status": "publish"}}"#);
        assert_ne!(manifest_checksum(&a), manifest_checksum(&b));
    }

    #[test]
    fn test_checksum_changes_on_taxonomy_edit() {
        let a = parse(r#"{"sku": "A-1", "product": {"title": "W"}, "taxonomy": {"c": ["x"]}}"#);
        let b = parse(r#"{"sku": "A-1", "product": {"title": "W"}, "taxonomy": {"c": ["y"]}}"#);
        assert_ne!(manifest_checksum(&a), manifest_checksum(&b));
    }

    #[test]
    fn test_checksum_changes_on_attribute_edit() {
        let a = parse(
            r#"{"sku": "A-1", "product": {"title": "W"}, "attributes": {"available_colors": ["red"]}}"#,
        );
        let b = parse(
            r#"{"sku": "A-1", "product": {"title": "W"}, "attributes": {"available_colors": ["red", "blue"]}}"#,
        );
        assert_ne!(manifest_checksum(&a), manifest_checksum(&b));
    }

    // ==================== File Digest Tests ====================

    #[test]
    fn test_file_checksum_known_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::write(&path, b"hello").unwrap();

        // sha256("hello")
        assert_eq!(
            file_checksum(&path).unwrap(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_file_checksum_identical_content_identical_digest() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        std::fs::write(&a, b"same bytes").unwrap();
        std::fs::write(&b, b"same bytes").unwrap();
        assert_eq!(file_checksum(&a).unwrap(), file_checksum(&b).unwrap());
    }

    #[test]
    fn test_file_checksum_missing_file_errors() {
        assert!(file_checksum(Path::new("/nonexistent/file.bin")).is_err());
    }
}
