//! §4.9 — the retry policy. Wraps the fetch attempt only; cache and dedup
//! phases are never retried.

use std::time::Duration;

use rand::Rng;

/// How jitter is applied to the computed backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Jitter {
    #[default]
    None,
    Full,
}

/// Retry configuration. `false` at the call site (spec: `retry?` option)
/// disables retrying entirely rather than constructing this type.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
    pub jitter: Jitter,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(base_delay: Duration, max_delay: Duration, max_retries: u32, jitter: Jitter) -> Self {
        Self { base_delay, max_delay, max_retries, jitter }
    }
}

/// The default retryable HTTP status set (spec §4.9).
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// True if `status` is in the default retryable set.
#[must_use]
pub fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUSES.contains(&status)
}

/// Computes the delay before `attempt` (1-based), before any server
/// `Retry-After` override is applied.
///
/// `cappedDelay := min(baseDelay * 2^(attempt-1), maxDelay)`; under full
/// jitter this is replaced with a uniform value in `[0, cappedDelay)`.
#[must_use]
pub fn compute_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let scale = 2u64.saturating_pow(attempt.saturating_sub(1));
    let raw = policy.base_delay.saturating_mul(scale as u32);
    let capped = raw.min(policy.max_delay);

    match policy.jitter {
        Jitter::None => capped,
        Jitter::Full => {
            if capped.is_zero() {
                return capped;
            }
            let max_nanos = capped.as_nanos().min(u128::from(u64::MAX));
            let jittered = rand::rng().random_range(0..max_nanos as u64);
            Duration::from_nanos(jittered)
        }
    }
}

/// Applies retry-after precedence: the server-directed delay always wins
/// over the computed delay when it is larger (spec §9, "never use a
/// smaller value than the server asked for").
#[must_use]
pub fn apply_retry_after_precedence(computed: Duration, server_retry_after: Option<Duration>) -> Duration {
    match server_retry_after {
        Some(server) => computed.max(server),
        None => computed,
    }
}
