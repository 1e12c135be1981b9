//! Reconnection backoff for the capture device

use std::time::{Duration, SystemTime};

/// Backoff policy for reopening a failed capture device
///
/// Reconnection is retried indefinitely; the delay doubles per attempt up to
/// `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry (doubles each attempt)
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Compute the delay before reconnection attempt `attempt` (0-based)
///
/// `min(base_delay * 2^attempt + jitter, max_delay)` where jitter is 0-25% of
/// the exponential delay, derived from the system clock.
#[must_use]
pub fn delay_for_attempt(policy: &RetryPolicy, attempt: u32) -> Duration {
    let base = policy
        .base_delay
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(policy.max_delay);

    let jitter_nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();

    let jitter_fraction = f64::from(jitter_nanos % 250) / 1000.0;
    let jitter = base.mul_f64(jitter_fraction);

    (base + jitter).min(policy.max_delay)
}
