//! Process-wide token-bucket rate limiting for remote requests.
//!
//! A single [`RateLimiter`] is shared (via `Arc`) by every worker; each
//! request attempt must take one token before going on the wire, which
//! bounds the aggregate request rate regardless of worker count.
//! `acquire` blocks the calling worker until a token is available - it
//! never drops or skips a request.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument};

/// Token bucket state. Tokens refill continuously at the configured
/// rate up to the burst capacity.
#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Shared token-bucket gate in front of the remote API.
#[derive(Debug)]
pub struct RateLimiter {
    /// Tokens added per second.
    rate: f64,
    /// Bucket capacity (burst size).
    burst: f64,
    /// Whether limiting is disabled (`--rate-limit 0`).
    disabled: bool,
    state: Mutex<Bucket>,
}

impl RateLimiter {
    /// Creates a limiter allowing `requests_per_second` sustained, with
    /// bursts up to `burst`. Both are clamped to at least 1.
    #[must_use]
    #[instrument]
    pub fn new(requests_per_second: u32, burst: u32) -> Self {
        debug!("creating rate limiter");
        let burst = f64::from(burst.max(1));
        Self {
            rate: f64::from(requests_per_second.max(1)),
            burst,
            disabled: false,
            state: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Creates a disabled limiter that never delays.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            rate: f64::MAX,
            burst: f64::MAX,
            disabled: true,
            state: Mutex::new(Bucket {
                tokens: 0.0,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Whether limiting is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Takes one token, sleeping until one is available.
    ///
    /// The bucket mutex is released before sleeping so other workers can
    /// queue up their own tokens; each sleeper has already debited the
    /// bucket, so wakeups do not stampede.
    pub async fn acquire(&self) {
        if self.disabled {
            return;
        }

        let wait = {
            let mut bucket = self.state.lock().await;
            let now = Instant::now();
            let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
            bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
            bucket.last_refill = now;

            if bucket.tokens >= 1.0 {
                bucket.tokens -= 1.0;
                return;
            }

            // Claim the token now by letting the balance go negative;
            // the next acquirer sees the debt and queues behind it
            // instead of re-spending the refill this sleeper is owed.
            let deficit = 1.0 - bucket.tokens;
            bucket.tokens -= 1.0;
            Duration::from_secs_f64(deficit / self.rate)
        };

        debug!(wait_ms = wait.as_millis(), "rate limit wait");
        tokio::time::sleep(wait).await;
    }
}
