//! Request governor guarding the rate-limited weather API.
//!
//! Every outbound call goes through [`RequestGovernor::execute`], which:
//! - serves live cached responses without touching the network
//! - spends one token per network attempt from a refilling [`TokenBucket`]
//! - parks high-priority callers until a token frees up (polling every 100ms)
//! - queues normal/low-priority callers FIFO until the refill tick drains them
//! - retries rate-limited (429) failures with jittered exponential backoff
//!
//! Requests that end up in the queue make a single attempt. A 429 returned
//! to a queued request is handed straight back to its caller.

mod backoff;
mod bucket;
mod cache;
mod clock;

pub use backoff::{apply_jitter, BackoffPolicy, JITTER_FRACTION};
pub use bucket::TokenBucket;
pub use cache::{cache_key, CacheEntry, ResponseCache};
pub use clock::{Clock, ManualClock, MonotonicClock};

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::ApiError;

/// How often a high-priority caller re-checks the bucket.
pub const HIGH_PRIORITY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Endpoint bookkeeping entries older than this are dropped during cleanup.
const RECORD_MAX_AGE: Duration = Duration::from_secs(60);

/// Chance that a request triggers a bookkeeping cleanup.
const RECORD_CLEANUP_PROBABILITY: f64 = 0.1;

const SHUT_DOWN_MESSAGE: &str = "Request governor has been shut down";

/// Default rate limit settings
pub const DEFAULT_BURST_CAPACITY: u32 = 10;
pub const DEFAULT_REFILL_RATE: f64 = 1.0;
pub const DEFAULT_REFILL_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 1000;
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 10_000;
pub const DEFAULT_CACHE_TIME_MS: u64 = 5 * 60 * 1000;

/// Rate limit configuration, fixed for the lifetime of a governor.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Maximum tokens the bucket can hold
    pub burst_capacity: u32,
    /// Tokens added per second
    pub refill_rate: f64,
    /// Period of the refill tick
    pub refill_interval: Duration,
    /// Retries allowed after a rate-limited attempt
    pub max_retries: u32,
    /// Backoff before the first retry
    pub initial_backoff: Duration,
    /// Upper bound on the un-jittered backoff
    pub max_backoff: Duration,
    /// How long a successful response stays servable
    pub cache_time: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            burst_capacity: DEFAULT_BURST_CAPACITY,
            refill_rate: DEFAULT_REFILL_RATE,
            refill_interval: Duration::from_millis(DEFAULT_REFILL_INTERVAL_MS),
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
            cache_time: Duration::from_millis(DEFAULT_CACHE_TIME_MS),
        }
    }
}

impl RateLimitConfig {
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.initial_backoff, self.max_backoff)
    }
}

/// Scheduling priority of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    /// Waits for a token instead of queueing; may overtake queued requests
    High,
    #[default]
    Normal,
    Low,
}

/// Per-call options for [`RequestGovernor::execute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequestOptions {
    pub bypass_cache: bool,
    pub priority: Priority,
}

impl RequestOptions {
    pub fn high_priority() -> Self {
        Self {
            priority: Priority::High,
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn bypass_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }
}

/// Point-in-time snapshot of governor state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GovernorStats {
    pub available_tokens: f64,
    pub queued_requests: usize,
    pub cached_entries: usize,
    pub tracked_endpoints: usize,
}

type PendingRequest = Box<dyn FnOnce() + Send>;

/// Last time each endpoint was hit.
#[derive(Debug, Default)]
struct RequestRecords {
    last_seen: HashMap<String, Duration>,
}

impl RequestRecords {
    fn record(&mut self, endpoint: &str, now: Duration) {
        self.last_seen.insert(endpoint.to_string(), now);
    }

    fn purge_older_than(&mut self, now: Duration, max_age: Duration) -> usize {
        let before = self.last_seen.len();
        self.last_seen
            .retain(|_, seen| now.saturating_sub(*seen) <= max_age);
        before - self.last_seen.len()
    }
}

struct GovernorState {
    bucket: TokenBucket,
    queue: VecDeque<PendingRequest>,
    cache: ResponseCache,
    records: RequestRecords,
}

struct Inner {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<GovernorState>,
    shutdown: CancellationToken,
}

impl Inner {
    fn try_take_token(&self) -> bool {
        let mut state = self.state.lock();
        !self.shutdown.is_cancelled() && state.bucket.try_take()
    }

    fn cached<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let now = self.clock.now();
        let data = self.state.lock().cache.get(key, now).cloned()?;
        match serde_json::from_value(data) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Discarding unreadable cache entry {}: {}", key, e);
                None
            }
        }
    }

    fn store<T: Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(data) => {
                let now = self.clock.now();
                self.state.lock().cache.insert(key.to_string(), data, now);
            }
            Err(e) => tracing::warn!("Response for {} not cached: {}", key, e),
        }
    }

    fn record(&self, endpoint: &str) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.records.record(endpoint, now);

        if rand::random::<f64>() < RECORD_CLEANUP_PROBABILITY {
            let purged = state.records.purge_older_than(now, RECORD_MAX_AGE);
            if purged > 0 {
                tracing::debug!("Purged {} stale endpoint records", purged);
            }
        }
    }

    /// Refill the bucket, sweep expired cache entries and release queued
    /// requests while tokens last.
    fn refill_and_drain(&self) {
        let now = self.clock.now();
        let ready: Vec<PendingRequest> = {
            let mut state = self.state.lock();
            if self.shutdown.is_cancelled() {
                return;
            }
            state.bucket.refill(now);
            state.cache.purge_expired(now);

            let mut ready = Vec::new();
            while !state.queue.is_empty() && state.bucket.try_take() {
                if let Some(job) = state.queue.pop_front() {
                    ready.push(job);
                }
            }
            ready
        };

        if !ready.is_empty() {
            tracing::info!("Releasing {} queued requests", ready.len());
        }
        for job in ready {
            job();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

enum Admission<T> {
    Granted,
    Wait,
    Queued(oneshot::Receiver<Result<T, ApiError>>),
    Closed,
}

/// Shared handle to a request governor. Clones share the same bucket,
/// queue and cache.
#[derive(Clone)]
pub struct RequestGovernor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RequestGovernor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestGovernor")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl RequestGovernor {
    /// Create a governor on the monotonic clock and start its refill tick.
    ///
    /// # Panics
    /// Must be called from within a tokio runtime.
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    /// Create a governor reading time from `clock` and start its refill tick.
    ///
    /// # Panics
    /// Must be called from within a tokio runtime.
    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        let state = GovernorState {
            bucket: TokenBucket::new(config.burst_capacity, config.refill_rate, now),
            queue: VecDeque::new(),
            cache: ResponseCache::new(config.cache_time),
            records: RequestRecords::default(),
        };
        let period = config.refill_interval.max(Duration::from_millis(1));

        let inner = Arc::new(Inner {
            config,
            clock,
            state: Mutex::new(state),
            shutdown: CancellationToken::new(),
        });
        spawn_refill_task(Arc::downgrade(&inner), inner.shutdown.clone(), period);

        tracing::debug!(
            "Request governor started: burst {}, {} tokens/s",
            inner.config.burst_capacity,
            inner.config.refill_rate
        );
        Self { inner }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.inner.config
    }

    /// Run `request_fn` under the rate limit, serving from cache when possible.
    ///
    /// `endpoint` and the JSON form of `params` make up the cache key, so
    /// `params` must be exactly what the request is built from.
    ///
    /// # Errors
    /// Returns the error produced by `request_fn`. Rate-limited failures are
    /// retried up to `max_retries` times before being returned. A request
    /// that had to be queued is attempted once.
    pub async fn execute<T, P, F, Fut>(
        &self,
        endpoint: &str,
        params: &P,
        request_fn: F,
        options: RequestOptions,
    ) -> Result<T, ApiError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        P: Serialize + ?Sized,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let key = cache_key(endpoint, params)?;

        if !options.bypass_cache {
            if let Some(hit) = self.inner.cached::<T>(&key) {
                tracing::debug!("Cache hit for {}", key);
                return Ok(hit);
            }
            tracing::debug!("Cache miss for {}", key);
        }

        let request_fn = Arc::new(request_fn);
        let max_retries = self.inner.config.max_retries;
        let backoff = self.inner.config.backoff();

        for attempt in 0..=max_retries {
            if attempt > 0 {
                let delay = backoff.delay_for_attempt(attempt - 1);
                tracing::info!(
                    "Retry attempt {} of {} for {}, waiting {:?}",
                    attempt,
                    max_retries,
                    endpoint,
                    delay
                );
                tokio::time::sleep(delay).await;
            }

            match self.admit(&key, &request_fn, options.priority) {
                Admission::Granted => {}
                Admission::Wait => self.wait_for_token().await?,
                Admission::Closed => return Err(ApiError::message(SHUT_DOWN_MESSAGE)),
                Admission::Queued(rx) => {
                    tracing::info!("Token bucket exhausted, queued request to {}", endpoint);
                    return rx.await.unwrap_or_else(|_| {
                        Err(ApiError::message(
                            "Queued request was dropped before it could run",
                        ))
                    });
                }
            }

            self.inner.record(endpoint);

            match (*request_fn)().await {
                Ok(value) => {
                    self.inner.store(&key, &value);
                    if attempt > 0 {
                        tracing::info!(
                            "Request to {} succeeded after {} retries",
                            endpoint,
                            attempt
                        );
                    }
                    return Ok(value);
                }
                Err(e) if e.is_rate_limited() && attempt < max_retries => {
                    tracing::warn!(
                        "Rate limited on attempt {} of {} for {}",
                        attempt + 1,
                        max_retries + 1,
                        endpoint
                    );
                }
                Err(e) => {
                    if e.is_rate_limited() {
                        tracing::error!(
                            "All {} attempts for {} were rate limited",
                            max_retries + 1,
                            endpoint
                        );
                    } else {
                        tracing::debug!("Request to {} failed: {}", endpoint, e);
                    }
                    return Err(e);
                }
            }
        }

        Err(ApiError::message("Unexpected error in request execution"))
    }

    /// True when no token is currently available. A snapshot only.
    pub fn is_rate_limited(&self) -> bool {
        self.inner.state.lock().bucket.is_exhausted()
    }

    pub fn stats(&self) -> GovernorStats {
        let state = self.inner.state.lock();
        GovernorStats {
            available_tokens: state.bucket.available(),
            queued_requests: state.queue.len(),
            cached_entries: state.cache.len(),
            tracked_endpoints: state.records.last_seen.len(),
        }
    }

    /// Drop every cached response.
    pub fn clear_cache(&self) {
        self.inner.state.lock().cache.clear();
        tracing::debug!("Response cache cleared");
    }

    /// Stop the refill tick and fail every request still in the queue.
    /// Later calls that need a token fail instead of waiting; cache hits are
    /// still served.
    pub fn shutdown(&self) {
        let dropped = {
            let mut state = self.inner.state.lock();
            self.inner.shutdown.cancel();
            std::mem::take(&mut state.queue)
        };
        if !dropped.is_empty() {
            tracing::warn!("Dropping {} queued requests on shutdown", dropped.len());
        }
    }

    /// Take a token, or decide how to wait for one. Normal and low priority
    /// requests are queued under the same lock that saw the bucket empty.
    fn admit<T, F, Fut>(&self, key: &str, request_fn: &Arc<F>, priority: Priority) -> Admission<T>
    where
        T: Serialize + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        if self.inner.shutdown.is_cancelled() {
            return Admission::Closed;
        }
        if state.bucket.try_take() {
            return Admission::Granted;
        }
        if priority == Priority::High {
            return Admission::Wait;
        }

        let (tx, rx) = oneshot::channel();
        state
            .queue
            .push_back(self.pending_request(key.to_string(), Arc::clone(request_fn), tx));
        Admission::Queued(rx)
    }

    async fn wait_for_token(&self) -> Result<(), ApiError> {
        tracing::debug!("No tokens available, high-priority request waiting");
        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => {
                    return Err(ApiError::message(SHUT_DOWN_MESSAGE));
                }
                _ = tokio::time::sleep(HIGH_PRIORITY_POLL_INTERVAL) => {
                    if self.inner.try_take_token() {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Build the deferred call run by the refill tick. `request_fn` is
    /// invoked synchronously when drained so queued calls start in FIFO order.
    fn pending_request<T, F, Fut>(
        &self,
        key: String,
        request_fn: Arc<F>,
        tx: oneshot::Sender<Result<T, ApiError>>,
    ) -> PendingRequest
    where
        T: Serialize + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let inner = Arc::downgrade(&self.inner);
        Box::new(move || {
            let fut = (*request_fn)();
            tokio::spawn(async move {
                let result = fut.await;
                if let (Ok(value), Some(inner)) = (&result, inner.upgrade()) {
                    inner.store(&key, value);
                }
                if tx.send(result).is_err() {
                    tracing::debug!("Caller stopped waiting for queued request {}", key);
                }
            });
        })
    }
}

fn spawn_refill_task(inner: Weak<Inner>, shutdown: CancellationToken, period: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(inner) = inner.upgrade() else { break };
                    inner.refill_and_drain();
                }
            }
        }
        tracing::debug!("Token refill task stopped");
    });
}
