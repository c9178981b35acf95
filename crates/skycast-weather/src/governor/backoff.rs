//! Exponential backoff with symmetric jitter for rate-limited retries.

use std::time::Duration;

/// Fraction of the base delay used as the jitter spread in each direction.
pub const JITTER_FRACTION: f64 = 0.2;

/// Backoff bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry (doubles each attempt)
    pub initial: Duration,
    /// Upper bound for the un-jittered delay
    pub max: Duration,
}

impl BackoffPolicy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Un-jittered delay for a given attempt: `initial * 2^attempt`, capped at `max`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        let initial_ms = u64::try_from(self.initial.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(initial_ms.saturating_mul(factor).min(max_ms))
    }

    /// Delay for a given attempt with ±20% jitter applied.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        apply_jitter(self.base_delay(attempt), rand::random::<f64>())
    }
}

/// Spread `base` by `(sample * 2 - 1) * base * JITTER_FRACTION`.
///
/// `sample` is expected in `[0, 1)`; values outside are clamped.
pub fn apply_jitter(base: Duration, sample: f64) -> Duration {
    let sample = sample.clamp(0.0, 1.0);
    let base_secs = base.as_secs_f64();
    let jittered = base_secs + (sample * 2.0 - 1.0) * base_secs * JITTER_FRACTION;
    Duration::from_secs_f64(jittered.max(0.0))
}
