//! Bounded retry with exponential backoff.
//!
//! Used by the HTTP address resolver; kept transport-agnostic so any fallible
//! async lookup can share the same policy type.

use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::debug;

/// Attempt budget and backoff curve for a retried operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included. Zero is treated as one.
    pub max_attempts: usize,
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
    /// Ceiling for the doubled delay.
    pub max_backoff: Duration,
    /// Upper bound of the pseudo-random delay added on top of the backoff.
    pub jitter: Duration,
}

impl RetryPolicy {
    /// Policy for the one-shot endpoint lookup done at channel startup.
    pub fn address_lookup() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            jitter: Duration::from_millis(50),
        }
    }

    /// Single attempt, no delay.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    /// Backoff without jitter after the 1-based `attempt` failed.
    pub fn backoff_after(&self, attempt: usize) -> Duration {
        let doublings = attempt.saturating_sub(1).min(31) as u32;
        self.initial_backoff
            .saturating_mul(1u32 << doublings)
            .min(self.max_backoff)
    }

    /// Full delay, jitter included, slept after the 1-based `attempt` failed.
    pub fn delay_after(&self, attempt: usize) -> Duration {
        self.backoff_after(attempt) + jitter(self.jitter, attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::address_lookup()
    }
}

/// Runs `op` until it succeeds, `should_retry` rejects the error, or the
/// policy's attempt budget is spent.
///
/// `op` receives the 1-based attempt number. `operation` only labels the
/// log lines.
pub async fn retry_async<T, E, Op, Fut, ShouldRetry>(
    operation: &'static str,
    policy: &RetryPolicy,
    mut op: Op,
    mut should_retry: ShouldRetry,
) -> Result<T, E>
where
    Op: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    ShouldRetry: FnMut(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let error = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if attempt >= max_attempts || !should_retry(&error) {
            return Err(error);
        }

        let delay = policy.delay_after(attempt);
        debug!(
            event = "retry_scheduled",
            operation,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64
        );
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        attempt += 1;
    }
}

fn jitter(max: Duration, attempt: usize) -> Duration {
    let bound = max.as_nanos().min(u128::from(u64::MAX)) as u64;
    if bound == 0 {
        return Duration::ZERO;
    }

    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    let mixed = seed ^ (attempt as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    Duration::from_nanos(mixed % (bound + 1))
}
