//! Retry with exponential backoff for transient remote failures.
//!
//! The pieces are kept separate on purpose: [`classify_error`] is a pure
//! classification function, [`RetryPolicy::delay_for`] is a pure backoff
//! schedule, and [`RetryExecutor::execute`] is a generic combinator that
//! wraps any remote operation without knowing anything about it. The
//! executor is stateless across calls; every invocation starts a fresh
//! attempt sequence.
//!
//! Delay formula: `min(base * 2^(attempt-1), max) + jitter`. Jitter
//! spreads concurrent retries so workers do not hammer the remote
//! system in lockstep. HTTP 429 responses carrying a Retry-After header
//! use the server-mandated delay instead of the computed one.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use super::error::{FailureKind, RemoteError, classify_error};

/// Default maximum attempts (including the initial one).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Default base delay for the first retry.
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Default delay cap.
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Maximum jitter added to each delay.
const MAX_JITTER: Duration = Duration::from_millis(250);

/// Maximum honored Retry-After value; anything larger is capped.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(120);

/// Backoff schedule configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with explicit settings. `max_attempts` is
    /// clamped to at least 1.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Creates a policy overriding only the attempt count.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Maximum attempts including the initial one.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Pure backoff schedule: delay before the retry following failed
    /// attempt `attempt` (1-indexed), without jitter.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay_ms = (self.base_delay.as_millis() as u64).saturating_mul(1u64 << exponent);
        Duration::from_millis(delay_ms).min(self.max_delay)
    }

    /// Random jitter in `[0, MAX_JITTER]`.
    fn jitter(&self) -> Duration {
        let mut rng = rand::thread_rng();
        Duration::from_millis(rng.gen_range(0..=MAX_JITTER.as_millis() as u64))
    }
}

/// Generic retry combinator around a single remote operation.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    /// Creates an executor with the given policy.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// The configured policy.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `op`, retrying transient and rate-limited failures with
    /// exponential backoff. Fatal failures propagate immediately;
    /// exhausting attempts surfaces [`RemoteError::Exhausted`].
    ///
    /// `op` must be a single unit of remote work with no internal retry.
    ///
    /// # Errors
    ///
    /// The operation's own fatal error, or [`RemoteError::Exhausted`]
    /// wrapping the last retryable failure.
    pub async fn execute<T, F, Fut>(&self, op_name: &str, mut op: F) -> Result<T, RemoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        for attempt in 1..=self.policy.max_attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    let kind = classify_error(&error);
                    if !kind.is_retryable() {
                        return Err(error);
                    }
                    if attempt >= self.policy.max_attempts {
                        warn!(op = op_name, attempts = attempt, "retries exhausted");
                        return Err(RemoteError::Exhausted {
                            attempts: attempt,
                            last: Box::new(error),
                        });
                    }

                    let delay = self.next_delay(attempt, kind, &error);
                    debug!(
                        op = op_name,
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "transient failure, will retry"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        // max_attempts >= 1 guarantees the loop returned.
        unreachable!("retry loop always returns within max_attempts")
    }

    /// Delay before the next attempt: server-mandated Retry-After when
    /// the failure was a 429 carrying one, the backoff schedule plus
    /// jitter otherwise.
    fn next_delay(&self, attempt: u32, kind: FailureKind, error: &RemoteError) -> Duration {
        if kind == FailureKind::RateLimited {
            if let RemoteError::HttpStatus {
                retry_after: Some(value),
                ..
            } = error
            {
                if let Some(delay) = parse_retry_after(value) {
                    return delay;
                }
            }
        }
        self.policy.delay_for(attempt) + self.policy.jitter()
    }
}

/// Parses a Retry-After header value into a duration.
///
/// Supports both RFC 7231 forms: integer seconds and HTTP-date. Returns
/// `None` for unparseable values; caps excessive values at
/// [`MAX_RETRY_AFTER`].
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            return None;
        }
        #[allow(clippy::cast_sign_loss)]
        return Some(Duration::from_secs(seconds as u64).min(MAX_RETRY_AFTER));
    }

    if let Ok(datetime) = httpdate::parse_http_date(header_value) {
        let delay = datetime
            .duration_since(std::time::SystemTime::now())
            .unwrap_or(Duration::ZERO);
        return Some(delay.min(MAX_RETRY_AFTER));
    }

    None
}
