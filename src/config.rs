//! Runtime configuration and component wiring.
//!
//! The CLI layer parses flags into the two settings structs here;
//! `build_client` / `build_engine` turn them into wired components.
//! The bearer token is never taken from a file: it comes from the
//! `--token` flag or, preferably, the `CATSYNC_TOKEN` environment
//! variable so it stays out of shell history.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::engine::{Engine, EngineOptions};
use crate::ledger::{CorruptionPolicy, LedgerError, LedgerStore};
use crate::lock::{LockError, LockManager};
use crate::remote::{RateLimiter, RemoteClient, RemoteConfig, RetryExecutor, RetryPolicy};

/// Environment variable consulted when `--token` is absent.
pub const TOKEN_ENV: &str = "CATSYNC_TOKEN";

/// Default per-request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default sustained request rate (requests per second).
pub const DEFAULT_RATE_LIMIT: u32 = 5;

/// Default lock acquisition timeout in seconds.
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 30;

/// Default staleness threshold for abandoned locks, in seconds.
pub const DEFAULT_LOCK_STALE_SECS: u64 = 900;

/// Configuration and wiring failures, surfaced before any sku work.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No bearer token was provided in any accepted way.
    #[error("no API token: pass --token or set {TOKEN_ENV}")]
    MissingToken,

    /// The ledger store could not be opened.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The lock directory could not be opened.
    #[error(transparent)]
    Lock(#[from] LockError),
}

/// Connection and throttling settings for the remote API.
#[derive(Debug, Clone)]
pub struct RemoteSettings {
    /// Base URL of the remote deployment.
    pub base_url: Url,
    /// Resolved bearer token.
    pub token: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Sustained requests per second; 0 disables rate limiting.
    pub rate_limit: u32,
    /// Maximum attempts per remote call, including the first.
    pub max_attempts: u32,
}

impl RemoteSettings {
    /// Wires the rate limiter, retry executor, and API client.
    #[must_use]
    pub fn build_client(&self) -> Arc<RemoteClient> {
        let limiter = if self.rate_limit == 0 {
            RateLimiter::disabled()
        } else {
            // Burst equals the sustained rate: one second of headroom.
            RateLimiter::new(self.rate_limit, self.rate_limit)
        };
        let retry = RetryExecutor::new(RetryPolicy::with_max_attempts(self.max_attempts));

        Arc::new(RemoteClient::new(
            RemoteConfig {
                base_url: self.base_url.clone(),
                token: self.token.clone(),
                timeout: self.timeout,
            },
            Arc::new(limiter),
            retry,
        ))
    }
}

/// Settings for one ingestion run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Catalog root: one directory per sku.
    pub catalog_root: PathBuf,
    /// State directory holding the ledger and lock files.
    pub state_dir: PathBuf,
    /// Diff and lock only; no remote mutation, no ledger writes.
    pub dry_run: bool,
    /// Worker pool size; 1 means fully sequential.
    pub parallelism: usize,
    /// How long to wait for a contended per-sku lock.
    pub lock_timeout: Duration,
    /// Age after which a held lock is presumed abandoned.
    pub lock_stale_after: Duration,
    /// What to do with unreadable ledger records.
    pub corruption_policy: CorruptionPolicy,
}

impl RunSettings {
    /// Opens the state directory stores and wires the engine.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the ledger or lock directory cannot
    /// be created.
    pub fn build_engine(&self, client: Arc<RemoteClient>) -> Result<Arc<Engine>, ConfigError> {
        let ledger = Arc::new(LedgerStore::open(&self.state_dir, self.corruption_policy)?);
        let locks = Arc::new(LockManager::open(&self.state_dir, self.lock_stale_after)?);
        let options = EngineOptions {
            dry_run: self.dry_run,
            parallelism: self.parallelism,
            lock_timeout: self.lock_timeout,
        };
        Ok(Arc::new(Engine::new(options, client, ledger, locks)))
    }
}

/// Resolves the bearer token: explicit flag value first, then the
/// `CATSYNC_TOKEN` environment variable.
///
/// # Errors
///
/// Returns [`ConfigError::MissingToken`] when neither source yields a
/// non-empty value.
pub fn resolve_token(explicit: Option<String>) -> Result<String, ConfigError> {
    if let Some(token) = explicit {
        if !token.is_empty() {
            return Ok(token);
        }
    }
    match std::env::var(TOKEN_ENV) {
        Ok(token) if !token.is_empty() => Ok(token),
        _ => Err(ConfigError::MissingToken),
    }
}
