//! Token bucket holding the request budget.

use std::time::Duration;

/// Capacity-bounded token counter refilled from elapsed time.
///
/// Tokens are fractional so slow refill rates accumulate across ticks.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: Duration,
}

impl TokenBucket {
    /// Create a full bucket.
    ///
    /// `refill_rate` is in tokens per second; negative rates are treated as zero.
    pub fn new(capacity: u32, refill_rate: f64, now: Duration) -> Self {
        let capacity = f64::from(capacity);
        Self {
            tokens: capacity,
            capacity,
            refill_rate: refill_rate.max(0.0),
            last_refill: now,
        }
    }

    /// Add tokens for the time elapsed since the last refill.
    ///
    /// A clock reading earlier than the last refill adds nothing.
    pub fn refill(&mut self, now: Duration) {
        let elapsed = now.saturating_sub(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Take one token if available.
    pub fn try_take(&mut self) -> bool {
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub fn available(&self) -> f64 {
        self.tokens
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn is_exhausted(&self) -> bool {
        self.tokens < 1.0
    }
}
