//! Durable per-sku ingestion ledger.
//!
//! The ledger is the single local source of truth for idempotence: one
//! JSON record per sku under `<state-dir>/ledger/`, committed only after
//! the remote system has durably acknowledged the corresponding write.
//! Records are written via write-temp-then-rename so a crash mid-write
//! never leaves a torn record, and all physical writes funnel through a
//! single-writer mutex even when the computation feeding them ran
//! concurrently.
//!
//! The ledger is advisory in one important sense: the orchestrator also
//! performs a defensive remote `find_by_sku` before creating, so a lost
//! or corrupted ledger degrades to extra lookups, never to duplicate
//! remote items.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Subdirectory of the state dir holding ledger records.
const LEDGER_DIR: &str = "ledger";

/// Ledger-related errors.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Filesystem failure reading or writing a record.
    #[error("ledger IO error at {path}: {source}")]
    Io {
        /// The path involved.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A record exists but cannot be parsed. Surfaced only under
    /// [`CorruptionPolicy::Fail`]; `Discard` drops the record instead.
    #[error("corrupt ledger record at {path}: {detail}")]
    Corrupt {
        /// The corrupt record's path.
        path: PathBuf,
        /// Parser diagnostic.
        detail: String,
    },
}

/// What to do when a ledger record is unreadable at load.
///
/// `Discard` is safe because every create is preceded by a remote
/// `find_by_sku`; the worst case is one redundant lookup and update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CorruptionPolicy {
    /// Abort the run on the first corrupt record.
    Fail,
    /// Drop the corrupt record and fall back to remote-side verification.
    #[default]
    Discard,
}

/// Outcome recorded for the last ingestion attempt of a sku.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// The remote write was acknowledged and the entry is authoritative.
    Succeeded,
    /// The last attempt failed; the checksum must not be trusted for
    /// skip decisions.
    Failed,
    /// The sku was skipped (e.g. lock contention).
    Skipped,
}

/// One durable per-sku record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// The idempotence key.
    pub sku: String,
    /// Canonical checksum of the last manifest applied (or attempted).
    pub manifest_checksum: String,
    /// Remote item identifier returned by the last acknowledged upsert.
    pub remote_item_id: Option<u64>,
    /// Media content digest to remote media identifier, accumulated
    /// across runs for dedup.
    #[serde(default)]
    pub media: BTreeMap<String, u64>,
    /// Status of the last attempt.
    pub last_status: SyncStatus,
    /// Total attempts recorded for this sku.
    pub attempt_count: u32,
    /// RFC 7231 timestamp of the last attempt.
    pub last_attempt_at: String,
}

impl LedgerEntry {
    /// Builds a fresh entry stamped with the current time.
    #[must_use]
    pub fn new(sku: &str, manifest_checksum: &str, status: SyncStatus) -> Self {
        Self {
            sku: sku.to_string(),
            manifest_checksum: manifest_checksum.to_string(),
            remote_item_id: None,
            media: BTreeMap::new(),
            last_status: status,
            attempt_count: 1,
            last_attempt_at: httpdate::fmt_http_date(SystemTime::now()),
        }
    }

    /// True when this entry allows skipping an identical manifest:
    /// the last attempt succeeded and the checksum matches.
    #[must_use]
    pub fn is_current(&self, checksum: &str) -> bool {
        self.last_status == SyncStatus::Succeeded && self.manifest_checksum == checksum
    }
}

/// Durable record store with atomic per-record upsert and whole-store
/// enumeration.
///
/// `get` and `all` read the filesystem directly; `put` serializes all
/// writers through an internal mutex. The store itself is cheap to share
/// behind an `Arc`.
#[derive(Debug)]
pub struct LedgerStore {
    dir: PathBuf,
    policy: CorruptionPolicy,
    // Single-writer discipline for the physical write path.
    writer: Mutex<()>,
}

impl LedgerStore {
    /// Opens (creating if needed) the ledger directory under `state_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Io`] when the directory cannot be created.
    #[instrument(skip_all, fields(state_dir = %state_dir.display()))]
    pub fn open(state_dir: &Path, policy: CorruptionPolicy) -> Result<Self, LedgerError> {
        let dir = state_dir.join(LEDGER_DIR);
        std::fs::create_dir_all(&dir).map_err(|source| LedgerError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            policy,
            writer: Mutex::new(()),
        })
    }

    /// Looks up the record for a sku.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Corrupt`] for an unreadable record under
    /// [`CorruptionPolicy::Fail`]; under `Discard` the record is dropped
    /// with a warning and `None` is returned.
    pub fn get(&self, sku: &str) -> Result<Option<LedgerEntry>, LedgerError> {
        let path = self.record_path(sku);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(LedgerError::Io { path, source }),
        };

        match serde_json::from_slice::<LedgerEntry>(&bytes) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => self.handle_corrupt(&path, &e.to_string()),
        }
    }

    /// Atomically upserts a record: write `<sku>.json.tmp`, fsync, then
    /// rename over the final path. Safe to call from multiple workers.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Io`] on any filesystem failure.
    #[instrument(skip_all, fields(sku = %entry.sku, status = ?entry.last_status))]
    pub fn put(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let path = self.record_path(&entry.sku);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(entry).unwrap_or_default();

        // Serialize the physical write path; poisoning only happens if a
        // writer panicked, in which case continuing with the data is fine.
        let _guard = self.writer.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        let write = || -> std::io::Result<()> {
            std::fs::write(&tmp, &bytes)?;
            let f = std::fs::File::open(&tmp)?;
            f.sync_all()?;
            std::fs::rename(&tmp, &path)
        };
        write().map_err(|source| LedgerError::Io {
            path: path.clone(),
            source,
        })?;

        debug!(path = %path.display(), "ledger record committed");
        Ok(())
    }

    /// Enumerates all records, sorted by sku.
    ///
    /// # Errors
    ///
    /// Propagates IO errors and, under [`CorruptionPolicy::Fail`],
    /// corrupt records.
    pub fn all(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        let read_dir = std::fs::read_dir(&self.dir).map_err(|source| LedgerError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut entries = Vec::new();
        for dir_entry in read_dir.flatten() {
            let path = dir_entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = std::fs::read(&path).map_err(|source| LedgerError::Io {
                path: path.clone(),
                source,
            })?;
            match serde_json::from_slice::<LedgerEntry>(&bytes) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    self.handle_corrupt(&path, &e.to_string())?;
                }
            }
        }

        entries.sort_by(|a, b| a.sku.cmp(&b.sku));
        Ok(entries)
    }

    /// Applies the corruption policy to one unreadable record.
    fn handle_corrupt(
        &self,
        path: &Path,
        detail: &str,
    ) -> Result<Option<LedgerEntry>, LedgerError> {
        match self.policy {
            CorruptionPolicy::Fail => Err(LedgerError::Corrupt {
                path: path.to_path_buf(),
                detail: detail.to_string(),
            }),
            CorruptionPolicy::Discard => {
                warn!(
                    path = %path.display(),
                    detail,
                    "discarding corrupt ledger record; remote lookup will reconcile"
                );
                Ok(None)
            }
        }
    }

    /// Record path for a sku, with path separators made filesystem-safe.
    fn record_path(&self, sku: &str) -> PathBuf {
        let safe: String = sku
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}
