//! Advisory per-sku locking with staleness-based crash recovery.
//!
//! Each sku is guarded by a lock file under `<state-dir>/locks/`, held
//! via an exclusive `fs2` advisory lock. The file records the holder's
//! pid and acquisition time; a marker older than the staleness threshold
//! is presumed abandoned by a crashed process and is forcibly reclaimed.
//! Staleness, not liveness-probing, is the crash-recovery signal - the
//! recorded pid is diagnostic only.
//!
//! Locks are advisory: they coordinate cooperating workers and runs,
//! nothing else. The returned [`LockGuard`] releases on every exit path
//! via `Drop`, and release is idempotent.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Subdirectory of the state dir holding lock files.
const LOCK_DIR: &str = "locks";

/// How often a blocked acquisition re-attempts the lock.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lock-related errors.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another holder kept the lock for the whole timeout window.
    /// Per-sku retryable-later, never fatal to the run.
    #[error("lock held for {sku}: gave up after {waited_ms}ms")]
    Held {
        /// The contended sku.
        sku: String,
        /// How long this attempt waited.
        waited_ms: u64,
    },

    /// Filesystem failure manipulating the lock file.
    #[error("lock IO error at {path}: {source}")]
    Io {
        /// The lock file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// Marker written into a held lock file.
#[derive(Debug, Serialize, Deserialize)]
struct LockMarker {
    /// Holder process id, for diagnostics only.
    pid: u32,
    /// Acquisition time, seconds since the Unix epoch.
    acquired_at_unix: u64,
}

/// Hands out per-sku advisory locks.
#[derive(Debug)]
pub struct LockManager {
    dir: PathBuf,
    stale_after: Duration,
}

impl LockManager {
    /// Opens (creating if needed) the lock directory under `state_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Io`] when the directory cannot be created.
    pub fn open(state_dir: &Path, stale_after: Duration) -> Result<Self, LockError> {
        let dir = state_dir.join(LOCK_DIR);
        std::fs::create_dir_all(&dir).map_err(|source| LockError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir, stale_after })
    }

    /// Acquires the lock for `sku`, waiting up to `timeout`.
    ///
    /// Contended acquisitions poll; a marker older than the staleness
    /// threshold is reclaimed by deleting the lock file and re-trying
    /// immediately. A timeout surfaces [`LockError::Held`], which the
    /// orchestrator treats as skip-for-this-run.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Held`] on timeout or [`LockError::Io`] on
    /// filesystem failure.
    #[instrument(skip(self))]
    pub async fn acquire(&self, sku: &str, timeout: Duration) -> Result<LockGuard, LockError> {
        let path = self.lock_path(sku);
        let started = tokio::time::Instant::now();

        loop {
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .read(true)
                .write(true)
                .open(&path)
                .map_err(|source| LockError::Io {
                    path: path.clone(),
                    source,
                })?;

            match file.try_lock_exclusive() {
                Ok(()) => {
                    write_marker(&file, &path)?;
                    debug!(sku, path = %path.display(), "lock acquired");
                    return Ok(LockGuard {
                        sku: sku.to_string(),
                        file: Some(file),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    drop(file);

                    if self.reclaim_if_stale(sku, &path)? {
                        continue;
                    }

                    let waited = started.elapsed();
                    if waited >= timeout {
                        return Err(LockError::Held {
                            sku: sku.to_string(),
                            waited_ms: waited.as_millis() as u64,
                        });
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Err(source) => {
                    return Err(LockError::Io { path, source });
                }
            }
        }
    }

    /// Reclaims an abandoned lock file. Returns true when reclaimed.
    fn reclaim_if_stale(&self, sku: &str, path: &Path) -> Result<bool, LockError> {
        let Some(age) = marker_age(path) else {
            return Ok(false);
        };

        if age <= self.stale_after {
            return Ok(false);
        }

        warn!(
            sku,
            age_secs = age.as_secs(),
            stale_after_secs = self.stale_after.as_secs(),
            "reclaiming stale lock presumed abandoned by a crashed process"
        );
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            // Already gone: the holder released between check and remove.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
            Err(source) => Err(LockError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Lock file path for a sku, with path separators made safe.
    fn lock_path(&self, sku: &str) -> PathBuf {
        let safe: String = sku
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        self.dir.join(format!("{safe}.lock"))
    }
}

/// Writes the holder marker into a freshly acquired lock file.
fn write_marker(mut file: &File, path: &Path) -> Result<(), LockError> {
    let marker = LockMarker {
        pid: std::process::id(),
        acquired_at_unix: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
    };
    let io = |source| LockError::Io {
        path: path.to_path_buf(),
        source,
    };
    file.set_len(0).map_err(io)?;
    file.write_all(&serde_json::to_vec(&marker).unwrap_or_default())
        .map_err(io)?;
    file.sync_all().map_err(io)
}

/// Age of the marker in a lock file: the embedded acquisition time when
/// parseable, the file mtime otherwise. `None` when unreadable.
fn marker_age(path: &Path) -> Option<Duration> {
    let now_unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    if let Ok(bytes) = std::fs::read(path) {
        if let Ok(marker) = serde_json::from_slice::<LockMarker>(&bytes) {
            return Some(Duration::from_secs(
                now_unix.saturating_sub(marker.acquired_at_unix),
            ));
        }
    }

    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    SystemTime::now().duration_since(modified).ok()
}

/// A held per-sku lock. Releasing is idempotent and happens at the
/// latest on `Drop`, covering success, failure, and cancellation paths.
#[derive(Debug)]
pub struct LockGuard {
    sku: String,
    file: Option<File>,
}

impl LockGuard {
    /// The locked sku.
    #[must_use]
    pub fn sku(&self) -> &str {
        &self.sku
    }

    /// Releases the lock early. Safe to call more than once.
    ///
    /// The lock file itself is left in place: a contender polling the
    /// old inode and a later acquirer must end up flocking the same
    /// file, which deleting here would break. Stale-file cleanup is the
    /// reclaim path's job.
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = FileExt::unlock(&file) {
                warn!(sku = %self.sku, error = %e, "failed to unlock lock file");
            }
            debug!(sku = %self.sku, "lock released");
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release();
    }
}
