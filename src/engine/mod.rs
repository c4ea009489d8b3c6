//! Ingestion orchestrator: scan, diff, lock, apply, commit.
//!
//! The pipeline for each sku is fixed: compute the canonical manifest
//! checksum, consult the ledger (unchanged manifests are skipped before
//! any lock or network activity), acquire the per-sku lock, resolve
//! taxonomy terms and media, upsert the item with a defensive
//! `find_by_sku` as the existing-id hint, and commit a ledger record
//! only after the remote system acknowledged the write.
//!
//! Skus are distributed over a bounded worker pool (a semaphore over
//! spawned tasks); every per-sku error is caught and becomes that sku's
//! report entry, never aborting the others. Only run-level problems
//! (missing catalog root, unusable ledger store) abort the run before
//! any sku is processed.

pub mod report;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::ledger::{LedgerEntry, LedgerError, LedgerStore, SyncStatus};
use crate::lock::{LockError, LockManager};
use crate::manifest::checksum::{file_checksum, manifest_checksum};
use crate::manifest::scanner::{ScanEntry, ScanError, scan_catalog};
use crate::manifest::Manifest;
use crate::remote::{FailureKind, ItemUpsert, RemoteClient, RemoteError, classify_error};

pub use report::{RunReport, RunSummary, SkuOutcome, SkuReport};

/// Run-level failures that abort before any sku is processed.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The catalog root is missing or unreadable.
    #[error(transparent)]
    Scan(#[from] ScanError),

    /// The ledger store is unusable or (under the fail policy) corrupt.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Orchestrator tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Full diff/lock logic and defensive lookups, but no remote
    /// mutation and no ledger writes.
    pub dry_run: bool,
    /// Worker pool size; 1 means fully sequential.
    pub parallelism: usize,
    /// How long a worker waits for a contended per-sku lock before
    /// skipping the sku for this run.
    pub lock_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            parallelism: 1,
            lock_timeout: Duration::from_secs(30),
        }
    }
}

/// Failures while applying one sku, after diff and lock.
#[derive(Debug, Error)]
enum ApplyError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("cannot digest media file {file}: {source}")]
    MediaDigest {
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl ApplyError {
    /// Stable machine-readable error class for the report.
    fn kind(&self) -> &'static str {
        match self {
            Self::Remote(e) if e.is_exhausted() => "exhausted",
            Self::Remote(e) => match classify_error(e) {
                FailureKind::Auth => "auth",
                _ => "remote",
            },
            Self::MediaDigest { .. } => "io",
            Self::Ledger(_) => "ledger",
        }
    }
}

/// The ingestion engine. Cheap to share behind an `Arc`; `run` spawns
/// worker tasks that clone that `Arc`.
#[derive(Debug)]
pub struct Engine {
    options: EngineOptions,
    client: Arc<RemoteClient>,
    ledger: Arc<LedgerStore>,
    locks: Arc<LockManager>,
    shutdown: AtomicBool,
    /// In-run media dedup: content digest to remote media id, shared
    /// across workers so identical bytes upload once per run.
    media_cache: DashMap<String, u64>,
}

impl Engine {
    /// Wires an engine over its collaborators.
    #[must_use]
    pub fn new(
        options: EngineOptions,
        client: Arc<RemoteClient>,
        ledger: Arc<LedgerStore>,
        locks: Arc<LockManager>,
    ) -> Self {
        Self {
            options,
            client,
            ledger,
            locks,
            shutdown: AtomicBool::new(false),
            media_cache: DashMap::new(),
        }
    }

    /// Requests a graceful shutdown: in-flight skus finish, no new sku
    /// is dequeued, held locks are released on exit.
    pub fn request_shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::SeqCst) {
            warn!("shutdown requested; finishing in-flight skus only");
        }
    }

    /// Runs the full pipeline over the catalog root and returns the
    /// deterministic per-sku report.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] only for run-level failures; per-sku
    /// errors are recorded in the report instead.
    #[instrument(skip_all, fields(root = %catalog_root.display(), dry_run = self.options.dry_run))]
    pub async fn run(self: Arc<Self>, catalog_root: &Path) -> Result<RunReport, EngineError> {
        let entries = scan_catalog(catalog_root)?;

        // Loading the whole store up front is the run-level corruption
        // gate: under the fail policy a corrupt record aborts here,
        // before any sku is touched.
        let known: BTreeMap<String, LedgerEntry> = self
            .ledger
            .all()?
            .into_iter()
            .map(|e| (e.sku.clone(), e))
            .collect();

        info!(
            skus = entries.len(),
            known = known.len(),
            parallelism = self.options.parallelism,
            "starting ingestion run"
        );

        let pool = Arc::new(Semaphore::new(self.options.parallelism.max(1)));
        let mut handles = Vec::with_capacity(entries.len());

        for entry in entries {
            let engine = Arc::clone(&self);
            let pool = Arc::clone(&pool);
            let prior = known.get(&entry.sku).cloned();
            let fallback_sku = entry.sku.clone();

            let handle = tokio::spawn(async move {
                // A closed semaphore cannot happen; treat it as shutdown.
                let Ok(_permit) = pool.acquire().await else {
                    return engine.skipped(&entry.sku, "shutdown requested");
                };
                if engine.shutdown.load(Ordering::SeqCst) {
                    return engine.skipped(&entry.sku, "shutdown requested");
                }
                engine.process(entry, prior).await
            });
            handles.push((fallback_sku, handle));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for (sku, handle) in handles {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    warn!(sku = %sku, error = %e, "worker task aborted");
                    reports.push(SkuReport {
                        sku,
                        outcome: SkuOutcome::Failed {
                            kind: "internal".to_string(),
                            message: e.to_string(),
                        },
                    });
                }
            }
        }

        let report = RunReport::from_entries(reports);
        let summary = report.summary();
        info!(
            created = summary.created,
            updated = summary.updated,
            unchanged = summary.unchanged,
            would_create = summary.would_create,
            would_update = summary.would_update,
            failed = summary.failed,
            skipped = summary.skipped,
            "ingestion run complete"
        );
        Ok(report)
    }

    /// Processes one sku end-to-end: diff, lock, apply, commit.
    #[instrument(skip_all, fields(sku = %entry.sku))]
    async fn process(&self, entry: ScanEntry, prior: Option<LedgerEntry>) -> SkuReport {
        let manifest = match entry.manifest {
            Ok(manifest) => manifest,
            Err(e) => {
                return SkuReport {
                    sku: entry.sku,
                    outcome: SkuOutcome::Failed {
                        kind: "validation".to_string(),
                        message: e.to_string(),
                    },
                };
            }
        };
        let sku = manifest.sku.clone();
        let checksum = manifest_checksum(&manifest);

        // Unchanged short-circuit: no lock, no network.
        if prior.as_ref().is_some_and(|p| p.is_current(&checksum)) {
            debug!(sku = %sku, "manifest unchanged, skipping");
            return SkuReport {
                sku,
                outcome: SkuOutcome::Unchanged,
            };
        }

        let _guard = match self.locks.acquire(&sku, self.options.lock_timeout).await {
            Ok(guard) => guard,
            Err(LockError::Held { waited_ms, .. }) => {
                return self.skipped(&sku, &format!("lock held, waited {waited_ms}ms"));
            }
            Err(e) => {
                return SkuReport {
                    sku,
                    outcome: SkuOutcome::Failed {
                        kind: "lock".to_string(),
                        message: e.to_string(),
                    },
                };
            }
        };

        let outcome = match self
            .apply(&entry.dir, &manifest, &checksum, prior.as_ref())
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(sku = %sku, error = %e, kind = e.kind(), "sku failed");
                if !self.options.dry_run {
                    // Best-effort: the failed record only adds attempt
                    // history; losing it does not affect correctness.
                    if let Err(commit_err) =
                        self.commit(&sku, &checksum, SyncStatus::Failed, prior.as_ref(), None, None)
                    {
                        warn!(sku = %sku, error = %commit_err, "failed to record failed attempt");
                    }
                }
                SkuOutcome::Failed {
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                }
            }
        };

        SkuReport { sku, outcome }
        // Lock guard released here, on every path.
    }

    /// Applies one changed manifest: resolve terms and media, upsert,
    /// commit the ledger record. Dry runs stop after the existing-id
    /// lookup and mutate nothing.
    async fn apply(
        &self,
        item_dir: &Path,
        manifest: &Manifest,
        checksum: &str,
        prior: Option<&LedgerEntry>,
    ) -> Result<SkuOutcome, ApplyError> {
        // Existing-id hint: the ledger when it knows, a defensive remote
        // lookup otherwise. The lookup is what makes creation safe after
        // ledger loss.
        let existing = match prior.and_then(|p| p.remote_item_id) {
            Some(id) => Some(id),
            None => self.client.find_by_sku(&manifest.sku).await?,
        };

        if self.options.dry_run {
            return Ok(match existing {
                Some(remote_id) => SkuOutcome::WouldUpdate { remote_id },
                None => SkuOutcome::WouldCreate,
            });
        }

        let mut term_ids = BTreeMap::new();
        for (taxonomy, slugs) in &manifest.taxonomy {
            let ids = self.client.ensure_taxonomy_terms(taxonomy, slugs).await?;
            term_ids.insert(taxonomy.clone(), ids);
        }

        let media = self.resolve_media(item_dir, manifest, prior).await?;

        let upsert = ItemUpsert {
            manifest,
            checksum,
            term_ids,
            featured_media: media.featured,
            gallery: media.gallery.clone(),
        };
        let remote_id = self.client.upsert_item(&upsert, existing).await?;

        self.commit(
            &manifest.sku,
            checksum,
            SyncStatus::Succeeded,
            prior,
            Some(remote_id),
            Some(media.by_digest),
        )?;

        Ok(match existing {
            Some(_) => SkuOutcome::Updated { remote_id },
            None => SkuOutcome::Created { remote_id },
        })
    }

    /// Resolves every referenced media file to a remote media id,
    /// deduplicating by content digest: the in-run cache first, the
    /// sku's prior ledger record second, the remote store last.
    async fn resolve_media(
        &self,
        item_dir: &Path,
        manifest: &Manifest,
        prior: Option<&LedgerEntry>,
    ) -> Result<ResolvedMedia, ApplyError> {
        // Digest each unique file once; manifest-provided gallery
        // checksums are trusted as-is.
        let mut digests: BTreeMap<&str, String> = BTreeMap::new();
        for item in &manifest.media.gallery {
            if let Some(checksum) = &item.checksum {
                digests.insert(item.file.as_str(), checksum.clone());
            }
        }
        for file in manifest.media_files() {
            if !digests.contains_key(file) {
                let digest = file_checksum(&item_dir.join(file)).map_err(|source| {
                    ApplyError::MediaDigest {
                        file: file.to_string(),
                        source,
                    }
                })?;
                digests.insert(file, digest);
            }
        }

        let mut by_digest: BTreeMap<String, u64> = BTreeMap::new();
        for file in manifest.media_files() {
            let digest = &digests[file];
            if by_digest.contains_key(digest) {
                continue;
            }
            let id = self.media_id(&item_dir.join(file), digest, prior).await?;
            by_digest.insert(digest.clone(), id);
        }

        let featured = manifest
            .effective_featured()
            .map(|file| by_digest[&digests[file]]);
        let gallery = manifest
            .media
            .gallery
            .iter()
            .map(|g| by_digest[&digests[g.file.as_str()]])
            .collect();

        Ok(ResolvedMedia {
            featured,
            gallery,
            by_digest,
        })
    }

    /// Resolves one digest to a remote media id.
    async fn media_id(
        &self,
        path: &Path,
        digest: &str,
        prior: Option<&LedgerEntry>,
    ) -> Result<u64, ApplyError> {
        if let Some(id) = self.media_cache.get(digest) {
            return Ok(*id);
        }
        if let Some(id) = prior.and_then(|p| p.media.get(digest)) {
            self.media_cache.insert(digest.to_string(), *id);
            return Ok(*id);
        }

        let id = self.client.upload_media_dedup(path, digest).await?;
        self.media_cache.insert(digest.to_string(), id);
        Ok(id)
    }

    /// Commits a ledger record for one attempt, carrying forward the
    /// remote identifiers the sku already had.
    fn commit(
        &self,
        sku: &str,
        checksum: &str,
        status: SyncStatus,
        prior: Option<&LedgerEntry>,
        remote_id: Option<u64>,
        media: Option<BTreeMap<String, u64>>,
    ) -> Result<(), LedgerError> {
        let mut entry = LedgerEntry::new(sku, checksum, status);
        entry.attempt_count = prior.map_or(1, |p| p.attempt_count.saturating_add(1));
        entry.remote_item_id = remote_id.or_else(|| prior.and_then(|p| p.remote_item_id));
        entry.media = prior.map(|p| p.media.clone()).unwrap_or_default();
        if let Some(media) = media {
            entry.media.extend(media);
        }
        self.ledger.put(&entry)
    }

    fn skipped(&self, sku: &str, reason: &str) -> SkuReport {
        debug!(sku, reason, "sku skipped");
        SkuReport {
            sku: sku.to_string(),
            outcome: SkuOutcome::Skipped {
                reason: reason.to_string(),
            },
        }
    }
}

/// Remote media ids resolved for one manifest.
#[derive(Debug)]
struct ResolvedMedia {
    featured: Option<u64>,
    gallery: Vec<u64>,
    by_digest: BTreeMap<String, u64>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ledger::CorruptionPolicy;
    use crate::remote::{RateLimiter, RemoteConfig, RetryExecutor, RetryPolicy};
    use url::Url;

    /// Engine over a dead endpoint: only paths that never reach the
    /// network are exercised here; full pipelines run against a mock
    /// server in the integration tests.
    fn offline_engine(state_dir: &Path, options: EngineOptions) -> Arc<Engine> {
        let client = Arc::new(RemoteClient::new(
            RemoteConfig {
                base_url: Url::parse("http://127.0.0.1:9/").unwrap(),
                token: "test-token".to_string(),
                timeout: Duration::from_millis(200),
            },
            Arc::new(RateLimiter::disabled()),
            RetryExecutor::new(RetryPolicy::with_max_attempts(1)),
        ));
        let ledger =
            Arc::new(LedgerStore::open(state_dir, CorruptionPolicy::Discard).unwrap());
        let locks =
            Arc::new(LockManager::open(state_dir, Duration::from_secs(600)).unwrap());
        Arc::new(Engine::new(options, client, ledger, locks))
    }

    fn write_item(root: &Path, sku: &str) {
        let dir = root.join(sku);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("manifest.json"),
            format!(r#"{{"sku": "{sku}", "product": {{"title": "Widget"}}}}"#),
        )
        .unwrap();
    }

    // ==================== Offline Path Tests ====================

    #[tokio::test]
    async fn test_unchanged_sku_needs_no_network() {
        let catalog = tempfile::tempdir().unwrap();
        let state = tempfile::tempdir().unwrap();
        write_item(catalog.path(), "A-1");

        let engine = offline_engine(state.path(), EngineOptions::default());

        // Seed the ledger with the current checksum.
        let scanned = scan_catalog(catalog.path()).unwrap();
        let manifest = scanned[0].manifest.as_ref().unwrap();
        let checksum = manifest_checksum(manifest);
        engine
            .ledger
            .put(&LedgerEntry::new("A-1", &checksum, SyncStatus::Succeeded))
            .unwrap();

        let report = engine.run(catalog.path()).await.unwrap();
        assert_eq!(report.entries().len(), 1);
        assert_eq!(report.entries()[0].outcome, SkuOutcome::Unchanged);
        assert_eq!(report.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_validation_error_is_per_sku_failure() {
        let catalog = tempfile::tempdir().unwrap();
        let state = tempfile::tempdir().unwrap();
        write_item(catalog.path(), "A-1");
        let bad = catalog.path().join("B-1");
        std::fs::create_dir(&bad).unwrap();
        std::fs::write(bad.join("manifest.json"), b"{broken").unwrap();

        // Make A-1 unchanged so no network is needed for it either.
        let engine = offline_engine(state.path(), EngineOptions::default());
        let scanned = scan_catalog(catalog.path()).unwrap();
        let manifest = scanned[0].manifest.as_ref().unwrap();
        engine
            .ledger
            .put(&LedgerEntry::new(
                "A-1",
                &manifest_checksum(manifest),
                SyncStatus::Succeeded,
            ))
            .unwrap();

        let report = engine.run(catalog.path()).await.unwrap();
        assert_eq!(report.entries().len(), 2);
        assert_eq!(report.entries()[0].outcome, SkuOutcome::Unchanged);
        assert!(matches!(
            &report.entries()[1].outcome,
            SkuOutcome::Failed { kind, .. } if kind == "validation"
        ));
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_contended_lock_is_skip_not_failure() {
        let catalog = tempfile::tempdir().unwrap();
        let state = tempfile::tempdir().unwrap();
        write_item(catalog.path(), "A-1");

        let engine = offline_engine(
            state.path(),
            EngineOptions {
                lock_timeout: Duration::from_millis(100),
                ..EngineOptions::default()
            },
        );

        // Hold A-1's lock for the duration of the run.
        let _held = engine
            .locks
            .acquire("A-1", Duration::from_millis(50))
            .await
            .unwrap();

        let report = engine.run(catalog.path()).await.unwrap();
        assert!(matches!(
            report.entries()[0].outcome,
            SkuOutcome::Skipped { .. }
        ));
        assert_eq!(report.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_skips_undequeued_skus() {
        let catalog = tempfile::tempdir().unwrap();
        let state = tempfile::tempdir().unwrap();
        write_item(catalog.path(), "A-1");
        write_item(catalog.path(), "A-2");

        let engine = offline_engine(state.path(), EngineOptions::default());
        engine.request_shutdown();

        let report = engine.run(catalog.path()).await.unwrap();
        assert_eq!(report.entries().len(), 2);
        for entry in report.entries() {
            assert!(matches!(entry.outcome, SkuOutcome::Skipped { .. }));
        }
    }

    #[tokio::test]
    async fn test_missing_catalog_root_aborts_run() {
        let state = tempfile::tempdir().unwrap();
        let engine = offline_engine(state.path(), EngineOptions::default());
        let err = engine.run(Path::new("/nonexistent/catalog")).await.unwrap_err();
        assert!(matches!(err, EngineError::Scan(_)));
    }

    // ==================== Error Kind Tests ====================

    #[test]
    fn test_apply_error_kinds() {
        let auth = ApplyError::Remote(RemoteError::from_status("http://cms.test", 401, None));
        assert_eq!(auth.kind(), "auth");

        let exhausted = ApplyError::Remote(RemoteError::Exhausted {
            attempts: 4,
            last: Box::new(RemoteError::from_status("http://cms.test", 503, None)),
        });
        assert_eq!(exhausted.kind(), "exhausted");

        let permanent = ApplyError::Remote(RemoteError::from_status("http://cms.test", 404, None));
        assert_eq!(permanent.kind(), "remote");

        let io = ApplyError::MediaDigest {
            file: "a.jpg".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        assert_eq!(io.kind(), "io");
    }
}
