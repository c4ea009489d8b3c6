//! Remote transport errors and failure classification.
//!
//! Every remote call failure is classified into a [`FailureKind`] which
//! drives retry behavior:
//!
//! | Kind | Examples | Retried |
//! |------|----------|---------|
//! | `Transient` | timeout, connection reset, 5xx, 408 | yes |
//! | `RateLimited` | HTTP 429 | yes, honoring Retry-After |
//! | `Auth` | HTTP 401/403 | no - configuration error |
//! | `Permanent` | HTTP 400/404, undecodable body | no |
//!
//! Exhausting retries wraps the last error in [`RemoteError::Exhausted`]
//! so per-sku reports can distinguish "gave up after N attempts" from a
//! directly fatal status.

use thiserror::Error;

/// Errors from a single remote API operation.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Network-level failure (DNS, connection refused/reset, TLS).
    #[error("network error calling {url}: {source}")]
    Network {
        /// The request URL.
        url: String,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The request timed out.
    #[error("timeout calling {url}")]
    Timeout {
        /// The request URL.
        url: String,
    },

    /// Non-success HTTP response.
    #[error("HTTP {status} from {url}")]
    HttpStatus {
        /// The request URL.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// Raw Retry-After header value, if the server sent one.
        retry_after: Option<String>,
    },

    /// 401/403: the bearer credential was rejected. Fatal configuration
    /// error, never retried.
    #[error("authentication rejected (HTTP {status}) by {url}")]
    AuthRejected {
        /// The request URL.
        url: String,
        /// 401 or 403.
        status: u16,
    },

    /// The response body could not be decoded as the expected shape.
    #[error("unexpected response body from {url}: {detail}")]
    Decode {
        /// The request URL.
        url: String,
        /// Parser diagnostic.
        detail: String,
    },

    /// All retry attempts were exhausted on a retryable failure.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted {
        /// Total attempts made.
        attempts: u32,
        /// The final failure that ended the sequence.
        #[source]
        last: Box<RemoteError>,
    },
}

impl RemoteError {
    /// Creates an error from a reqwest failure, splitting out timeouts.
    pub fn from_reqwest(url: impl Into<String>, source: reqwest::Error) -> Self {
        let url = url.into();
        if source.is_timeout() {
            Self::Timeout { url }
        } else {
            Self::Network { url, source }
        }
    }

    /// Creates the appropriate error for a non-success status code.
    pub fn from_status(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        let url = url.into();
        match status {
            401 | 403 => Self::AuthRejected { url, status },
            _ => Self::HttpStatus {
                url,
                status,
                retry_after,
            },
        }
    }

    /// True when this is an exhausted-retry failure.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

/// Classification of a remote failure for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Temporary failure that may succeed on retry.
    Transient,
    /// Server-side throttling; retried with backoff, honoring Retry-After.
    RateLimited,
    /// Credential rejected; fatal configuration error.
    Auth,
    /// Failure that will not succeed regardless of retries.
    Permanent,
}

impl FailureKind {
    /// Whether the retry executor may re-attempt this failure.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::RateLimited)
    }
}

/// Classifies a remote error into a failure kind.
#[must_use]
pub fn classify_error(error: &RemoteError) -> FailureKind {
    match error {
        RemoteError::Timeout { .. } | RemoteError::Network { .. } => FailureKind::Transient,
        RemoteError::HttpStatus { status, .. } => classify_http_status(*status),
        RemoteError::AuthRejected { .. } => FailureKind::Auth,
        RemoteError::Decode { .. } | RemoteError::Exhausted { .. } => FailureKind::Permanent,
    }
}

/// Classifies an HTTP status code.
#[allow(clippy::match_same_arms)]
fn classify_http_status(status: u16) -> FailureKind {
    match status {
        401 | 403 => FailureKind::Auth,
        408 => FailureKind::Transient, // Request Timeout
        429 => FailureKind::RateLimited,
        status if (400..500).contains(&status) => FailureKind::Permanent,
        status if (500..600).contains(&status) => FailureKind::Transient,
        _ => FailureKind::Permanent,
    }
}
