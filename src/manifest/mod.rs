//! Product manifest model: parsing and validation.
//!
//! A manifest is the declarative description of one catalog item, loaded
//! fresh on every run from `<catalog-root>/<sku>/manifest.json`. Manifests
//! are immutable once parsed; change detection works on a canonical
//! checksum of the semantic fields (see [`checksum`]).
//!
//! # Example manifest
//!
//! ```json
//! {
//!   "sku": "A-1",
//!   "meta": { "schema_version": "1.0", "source": "pim-export" },
//!   "product": { "title": "Widget", "slug": "widget", "status": "publish" },
//!   "taxonomy": { "item-category": ["tools"] },
//!   "descriptions": { "short": "A widget.", "technical": "<p>Specs</p>" },
//!   "attributes": { "available_colors": ["red", "blue"] },
//!   "media": {
//!     "featured": "images/front.jpg",
//!     "gallery": [{ "file": "images/front.jpg", "checksum": "ab12..." }]
//!   }
//! }
//! ```

pub mod checksum;
pub mod scanner;

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Schema versions this build understands. Anything else logs a warning
/// but is still processed (forward-compatible fields are ignored).
pub const SUPPORTED_SCHEMA_VERSIONS: &[&str] = &["1.0", "1.1"];

/// Errors produced while parsing or validating a single manifest.
///
/// Validation errors are fatal for the affected sku but never abort the
/// run; the orchestrator records them in that sku's report entry.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The manifest file could not be read from disk.
    #[error("cannot read manifest for {sku}: {source}")]
    Io {
        /// Sku whose manifest failed to load.
        sku: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The manifest file is not valid JSON or does not match the schema.
    #[error("malformed manifest for {sku}: {source}")]
    Malformed {
        /// Sku whose manifest failed to parse.
        sku: String,
        /// The underlying deserialization error.
        #[source]
        source: serde_json::Error,
    },

    /// A required field is missing or empty.
    #[error("invalid manifest for {sku}: {reason}")]
    Invalid {
        /// Affected sku (directory name when the manifest sku is unusable).
        sku: String,
        /// What was wrong.
        reason: String,
    },

    /// A media file referenced by the manifest does not exist on disk.
    #[error("missing media file for {sku}: {file}")]
    MissingMedia {
        /// Affected sku.
        sku: String,
        /// Relative path of the missing file.
        file: String,
    },
}

impl ValidationError {
    /// Returns the sku this error applies to.
    #[must_use]
    pub fn sku(&self) -> &str {
        match self {
            Self::Io { sku, .. }
            | Self::Malformed { sku, .. }
            | Self::Invalid { sku, .. }
            | Self::MissingMedia { sku, .. } => sku,
        }
    }
}

/// Publish status of a catalog item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishStatus {
    /// Item exists remotely but is not publicly visible.
    #[default]
    Draft,
    /// Item is publicly visible.
    Publish,
}

impl PublishStatus {
    /// Wire representation used in remote payloads.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Publish => "publish",
        }
    }
}

/// Informational provenance block. Never part of the canonical checksum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMeta {
    /// Schema version the manifest was written against.
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    /// Where the manifest came from (export pipeline, hand-written, ...).
    #[serde(default)]
    pub source: Option<String>,
    /// When the manifest was generated.
    #[serde(default)]
    pub generated_at: Option<String>,
}

fn default_schema_version() -> String {
    "1.0".to_string()
}

impl Default for ManifestMeta {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            source: None,
            generated_at: None,
        }
    }
}

/// Core product fields mapped onto the remote item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductInfo {
    /// Display title. Required, non-empty.
    #[serde(default)]
    pub title: String,
    /// URL slug. Derived from the title when absent.
    #[serde(default)]
    pub slug: Option<String>,
    /// Publish status, defaults to draft.
    #[serde(default)]
    pub status: PublishStatus,
}

/// Short and technical description bodies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Descriptions {
    /// Short plain-text summary.
    #[serde(default)]
    pub short: Option<String>,
    /// Technical HTML body.
    #[serde(default)]
    pub technical: Option<String>,
}

/// One gallery image reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalleryItem {
    /// Path relative to the sku directory.
    pub file: String,
    /// Content digest of the file bytes. Computed from disk when absent.
    #[serde(default)]
    pub checksum: Option<String>,
}

/// Featured image and gallery references.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Featured image path. Falls back to the first gallery entry.
    #[serde(default)]
    pub featured: Option<String>,
    /// Ordered gallery entries.
    #[serde(default)]
    pub gallery: Vec<GalleryItem>,
}

/// One catalog item's declarative description.
///
/// `BTreeMap` is used for taxonomy and attributes so iteration order is
/// deterministic; the canonical checksum depends on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Unique stable identifier; the idempotence key.
    pub sku: String,
    /// Provenance, informational only.
    #[serde(default)]
    pub meta: ManifestMeta,
    /// Core product fields.
    #[serde(default)]
    pub product: ProductInfo,
    /// Taxonomy name to ordered term slugs.
    #[serde(default)]
    pub taxonomy: BTreeMap<String, Vec<String>>,
    /// Description bodies.
    #[serde(default)]
    pub descriptions: Descriptions,
    /// Free-form extension data (e.g. `available_colors`).
    #[serde(default)]
    pub attributes: BTreeMap<String, Vec<String>>,
    /// Media references.
    #[serde(default)]
    pub media: MediaInfo,
}

impl Manifest {
    /// Parses and validates a manifest from raw JSON bytes.
    ///
    /// `sku_hint` is the catalog directory name; it is used for error
    /// attribution and compared against the embedded sku (a mismatch
    /// logs a warning, the embedded sku wins).
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when the JSON is malformed, required
    /// fields are missing or empty, or a referenced media file does not
    /// exist under `item_dir`.
    pub fn from_json(
        bytes: &[u8],
        sku_hint: &str,
        item_dir: &Path,
    ) -> Result<Self, ValidationError> {
        let manifest: Manifest =
            serde_json::from_slice(bytes).map_err(|source| ValidationError::Malformed {
                sku: sku_hint.to_string(),
                source,
            })?;

        if manifest.sku.trim().is_empty() {
            return Err(ValidationError::Invalid {
                sku: sku_hint.to_string(),
                reason: "sku is required and must be non-empty".to_string(),
            });
        }

        if manifest.sku != sku_hint {
            warn!(
                directory = sku_hint,
                manifest_sku = %manifest.sku,
                "sku mismatch between directory name and manifest; using manifest sku"
            );
        }

        manifest.validate(item_dir)?;
        Ok(manifest)
    }

    /// Validates semantic constraints against the item directory.
    fn validate(&self, item_dir: &Path) -> Result<(), ValidationError> {
        if self.product.title.trim().is_empty() {
            return Err(ValidationError::Invalid {
                sku: self.sku.clone(),
                reason: "product title is required".to_string(),
            });
        }

        if !SUPPORTED_SCHEMA_VERSIONS.contains(&self.meta.schema_version.as_str()) {
            warn!(
                sku = %self.sku,
                schema_version = %self.meta.schema_version,
                "unknown manifest schema version"
            );
        }

        for file in self.media_files() {
            if !item_dir.join(file).is_file() {
                return Err(ValidationError::MissingMedia {
                    sku: self.sku.clone(),
                    file: file.to_string(),
                });
            }
        }

        Ok(())
    }

    /// All media paths referenced by this manifest (featured + gallery).
    pub fn media_files(&self) -> impl Iterator<Item = &str> {
        self.media
            .featured
            .iter()
            .map(String::as_str)
            .chain(self.media.gallery.iter().map(|g| g.file.as_str()))
    }

    /// Resolves the effective slug: the explicit one, or derived from
    /// the title when absent.
    #[must_use]
    pub fn effective_slug(&self) -> String {
        match &self.product.slug {
            Some(slug) if !slug.is_empty() => slug.clone(),
            _ => slugify(&self.product.title),
        }
    }

    /// Resolves the effective featured image: the explicit one, or the
    /// first gallery entry when absent.
    #[must_use]
    pub fn effective_featured(&self) -> Option<&str> {
        self.media
            .featured
            .as_deref()
            .or_else(|| self.media.gallery.first().map(|g| g.file.as_str()))
    }
}

/// Converts arbitrary text into a URL-safe slug.
///
/// Lowercases, keeps ASCII alphanumerics, collapses everything else
/// into single hyphens, and trims leading/trailing hyphens.
#[must_use]
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut last_was_sep = true;

    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            slug.push('-');
            last_was_sep = true;
        }
    }

    slug.trim_end_matches('-').to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn minimal_json(sku: &str) -> String {
        format!(
            r#"{{"sku": "{sku}", "product": {{"title": "Widget"}}}}"#
        )
    }

    // ==================== Parsing Tests ====================

    #[test]
    fn test_minimal_manifest_parses_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = Manifest::from_json(minimal_json("A-1").as_bytes(), "A-1", dir.path())
            .unwrap();

        assert_eq!(manifest.sku, "A-1");
        assert_eq!(manifest.product.title, "Widget");
        assert_eq!(manifest.product.status, PublishStatus::Draft);
        assert_eq!(manifest.meta.schema_version, "1.0");
        assert!(manifest.taxonomy.is_empty());
        assert!(manifest.media.gallery.is_empty());
    }

    #[test]
    fn test_full_manifest_parses_all_fields() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("images")).unwrap();
        std::fs::write(dir.path().join("images/a.jpg"), b"img").unwrap();

        let json = r#"{
            "sku": "B-2",
            "meta": {"schema_version": "1.1", "source": "pim", "generated_at": "2026-01-01T00:00:00Z"},
            "product": {"title": "Gadget", "slug": "gadget", "status": "publish"},
            "taxonomy": {"item-category": ["tools", "hardware"]},
            "descriptions": {"short": "s", "technical": "<p>t</p>"},
            "attributes": {"available_colors": ["red"]},
            "media": {"featured": "images/a.jpg", "gallery": [{"file": "images/a.jpg", "checksum": "abc"}]}
        }"#;

        let manifest = Manifest::from_json(json.as_bytes(), "B-2", dir.path()).unwrap();
        assert_eq!(manifest.product.status, PublishStatus::Publish);
        assert_eq!(manifest.taxonomy["item-category"], vec!["tools", "hardware"]);
        assert_eq!(manifest.attributes["available_colors"], vec!["red"]);
        assert_eq!(manifest.media.gallery[0].checksum.as_deref(), Some("abc"));
    }

    #[test]
    fn test_malformed_json_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = Manifest::from_json(b"{not json", "A-1", dir.path()).unwrap_err();
        assert!(matches!(err, ValidationError::Malformed { .. }));
        assert_eq!(err.sku(), "A-1");
    }

    // ==================== Validation Tests ====================

    #[test]
    fn test_empty_sku_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = Manifest::from_json(minimal_json("").as_bytes(), "A-1", dir.path())
            .unwrap_err();
        assert!(matches!(err, ValidationError::Invalid { .. }));
        assert!(err.to_string().contains("sku"));
    }

    #[test]
    fn test_empty_title_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let json = r#"{"sku": "A-1", "product": {"title": "  "}}"#;
        let err = Manifest::from_json(json.as_bytes(), "A-1", dir.path()).unwrap_err();
        assert!(err.to_string().contains("title"));
    }

    #[test]
    fn test_missing_media_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let json = r#"{
            "sku": "A-1",
            "product": {"title": "Widget"},
            "media": {"gallery": [{"file": "images/missing.jpg"}]}
        }"#;
        let err = Manifest::from_json(json.as_bytes(), "A-1", dir.path()).unwrap_err();
        assert!(matches!(err, ValidationError::MissingMedia { .. }));
        assert!(err.to_string().contains("missing.jpg"));
    }

    #[test]
    fn test_sku_mismatch_uses_manifest_sku() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = Manifest::from_json(minimal_json("REAL-1").as_bytes(), "dir-name", dir.path())
            .unwrap();
        assert_eq!(manifest.sku, "REAL-1");
    }

    // ==================== Slug Tests ====================

    #[test]
    fn test_effective_slug_prefers_explicit() {
        let dir = tempfile::tempdir().unwrap();
        let json = r#"{"sku": "A-1", "product": {"title": "Widget", "slug": "custom"}}"#;
        let manifest = Manifest::from_json(json.as_bytes(), "A-1", dir.path()).unwrap();
        assert_eq!(manifest.effective_slug(), "custom");
    }

    #[test]
    fn test_effective_slug_derived_from_title() {
        let dir = tempfile::tempdir().unwrap();
        let json = r#"{"sku": "A-1", "product": {"title": "Big Widget, Mk II"}}"#;
        let manifest = Manifest::from_json(json.as_bytes(), "A-1", dir.path()).unwrap();
        assert_eq!(manifest.effective_slug(), "big-widget-mk-ii");
    }

    #[test]
    fn test_slugify_collapses_separators() {
        assert_eq!(slugify("  Hello -- World!  "), "hello-world");
        assert_eq!(slugify("Ünïcode"), "n-code");
        assert_eq!(slugify(""), "");
    }

    // ==================== Featured Image Tests ====================

    #[test]
    fn test_effective_featured_falls_back_to_first_gallery() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"x").unwrap();
        let json = r#"{
            "sku": "A-1",
            "product": {"title": "Widget"},
            "media": {"gallery": [{"file": "a.jpg"}]}
        }"#;
        let manifest = Manifest::from_json(json.as_bytes(), "A-1", dir.path()).unwrap();
        assert_eq!(manifest.effective_featured(), Some("a.jpg"));
    }

    #[test]
    fn test_effective_featured_none_without_media() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = Manifest::from_json(minimal_json("A-1").as_bytes(), "A-1", dir.path())
            .unwrap();
        assert_eq!(manifest.effective_featured(), None);
    }
}
