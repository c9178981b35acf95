//! Time sources for the request governor.
//!
//! Every timestamp the governor stores is a [`Duration`] measured from an
//! arbitrary, clock-specific origin. Only differences between readings of
//! the same clock are meaningful.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

/// A monotonic time source.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Time elapsed since this clock's origin.
    fn now(&self) -> Duration;
}

/// Clock backed by tokio's `Instant`.
///
/// Under `#[tokio::test(start_paused = true)]` it follows the paused runtime
/// clock, so tests can advance it with `tokio::time::advance`.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Manually driven clock for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.now_ms
            .fetch_add(duration_to_ms(by), Ordering::SeqCst);
    }

    /// Jump to an absolute reading. Moving backwards is allowed; consumers
    /// clamp negative elapsed time to zero.
    pub fn set(&self, at: Duration) {
        self.now_ms.store(duration_to_ms(at), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_millis(self.now_ms.load(Ordering::SeqCst))
    }
}

fn duration_to_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
