//! Catalog Ingestion Engine
//!
//! This library ingests a directory tree of product manifests into a
//! remote content-management REST API with three guarantees:
//!
//! - **Idempotence**: repeated runs over an unchanged catalog issue no
//!   remote writes; change detection is a canonical manifest checksum.
//! - **Crash safety**: per-sku state lives in a durable ledger committed
//!   only after the remote system acknowledged the write, so a crashed
//!   run is resumable without duplicating remote items.
//! - **Concurrency safety**: advisory per-sku locks (with staleness
//!   reclaim for crashed holders) make concurrent workers and runs safe.
//!
//! # Architecture
//!
//! - [`manifest`] - manifest model, validation, catalog scanning, and
//!   canonical checksums
//! - [`ledger`] - durable per-sku ledger store
//! - [`lock`] - advisory per-sku lock manager
//! - [`remote`] - API client with retry, rate limiting, and failure
//!   classification
//! - [`engine`] - the orchestrator composing the above into a
//!   deterministic pipeline
//! - [`config`] - runtime settings and component wiring

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod engine;
pub mod ledger;
pub mod lock;
pub mod manifest;
pub mod remote;

// Re-export commonly used types
pub use config::{ConfigError, RemoteSettings, RunSettings, resolve_token};
pub use engine::{
    Engine, EngineError, EngineOptions, RunReport, RunSummary, SkuOutcome, SkuReport,
};
pub use ledger::{CorruptionPolicy, LedgerEntry, LedgerError, LedgerStore, SyncStatus};
pub use lock::{LockError, LockGuard, LockManager};
pub use manifest::checksum::{file_checksum, manifest_checksum};
pub use manifest::scanner::{ScanEntry, ScanError, scan_catalog};
pub use manifest::{Manifest, PublishStatus, ValidationError};
pub use remote::{
    FailureKind, ItemUpsert, RateLimiter, RemoteClient, RemoteConfig, RemoteError,
    RetryExecutor, RetryPolicy, classify_error,
};
