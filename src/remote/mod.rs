//! Remote content-management API layer.
//!
//! Everything that touches the network lives here: the typed error
//! model and failure classification ([`error`]), the backoff/retry
//! combinator ([`retry`]), the process-wide token bucket
//! ([`rate_limiter`]), and the upsert-style API client ([`client`]).
//!
//! Layering is strict: the client issues single-attempt requests, each
//! of which passes rate limiter then retry executor. Nothing in this
//! module retries on its own behalf beyond that one wrapping.

pub mod client;
pub mod error;
pub mod rate_limiter;
pub mod retry;

pub use client::{ItemUpsert, RemoteClient, RemoteConfig};
pub use error::{FailureKind, RemoteError, classify_error};
pub use rate_limiter::RateLimiter;
pub use retry::{DEFAULT_MAX_ATTEMPTS, RetryExecutor, RetryPolicy, parse_retry_after};
