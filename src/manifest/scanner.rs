//! Catalog scanner: enumerates sku directories under the catalog root.
//!
//! Each immediate subdirectory of the catalog root containing a
//! `manifest.json` is one candidate item. Entries are yielded in
//! lexicographic sku order - that ordering is load-bearing: the final
//! run report is deterministic regardless of execution concurrency
//! because it starts from (and is re-sorted into) this order.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, instrument};

use super::{Manifest, ValidationError};

/// Manifest file name expected inside each sku directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Run-level scanner errors. Per-item parse failures are not run-level;
/// they are carried inside [`ScanEntry`] so one bad manifest never
/// aborts the run.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The catalog root does not exist or is not a directory.
    #[error("catalog root is not a directory: {path}")]
    RootMissing {
        /// The offending path.
        path: PathBuf,
    },

    /// The catalog root could not be enumerated.
    #[error("cannot read catalog root {path}: {source}")]
    RootUnreadable {
        /// The offending path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// One scanned catalog entry: the sku (directory name), its directory,
/// and the parse/validation result for its manifest.
#[derive(Debug)]
pub struct ScanEntry {
    /// Sku as named by the catalog directory.
    pub sku: String,
    /// Absolute directory of this item.
    pub dir: PathBuf,
    /// Parsed manifest, or the validation error to report for this sku.
    pub manifest: Result<Manifest, ValidationError>,
}

/// Scans the catalog root and returns entries in lexicographic sku order.
///
/// Subdirectories without a `manifest.json` are ignored (they are not
/// candidate items). Unreadable or invalid manifests yield an entry
/// carrying the error so the orchestrator can report it per-sku.
///
/// # Errors
///
/// Returns [`ScanError`] only for run-level problems: missing or
/// unreadable catalog root.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn scan_catalog(root: &Path) -> Result<Vec<ScanEntry>, ScanError> {
    if !root.is_dir() {
        return Err(ScanError::RootMissing {
            path: root.to_path_buf(),
        });
    }

    let read_dir = std::fs::read_dir(root).map_err(|source| ScanError::RootUnreadable {
        path: root.to_path_buf(),
        source,
    })?;

    let mut entries: Vec<ScanEntry> = Vec::new();

    for dir_entry in read_dir.flatten() {
        let dir = dir_entry.path();
        if !dir.is_dir() {
            continue;
        }
        let manifest_path = dir.join(MANIFEST_FILE);
        if !manifest_path.is_file() {
            continue;
        }

        let sku = dir_entry.file_name().to_string_lossy().into_owned();
        let manifest = load_manifest(&manifest_path, &sku, &dir);
        entries.push(ScanEntry { sku, dir, manifest });
    }

    entries.sort_by(|a, b| a.sku.cmp(&b.sku));

    debug!(count = entries.len(), "scanned catalog");
    Ok(entries)
}

/// Reads and parses one manifest file.
fn load_manifest(path: &Path, sku: &str, dir: &Path) -> Result<Manifest, ValidationError> {
    let bytes = std::fs::read(path).map_err(|source| ValidationError::Io {
        sku: sku.to_string(),
        source,
    })?;
    Manifest::from_json(&bytes, sku, dir)
}
