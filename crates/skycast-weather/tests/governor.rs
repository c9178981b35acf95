//! Behavioural tests for the request governor.
//!
//! These run on tokio's paused clock: sleeps and refill ticks advance virtual
//! time, so timing assertions are exact and the suite runs instantly.

use std::future::{ready, Ready};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use skycast_weather::{
    ApiError, ManualClock, Priority, RateLimitConfig, RequestGovernor, RequestOptions,
};
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Reading {
    temp: i32,
}

fn config(burst_capacity: u32, refill_rate: f64) -> RateLimitConfig {
    RateLimitConfig {
        burst_capacity,
        refill_rate,
        refill_interval: Duration::from_millis(1000),
        max_retries: 3,
        initial_backoff: Duration::from_millis(1000),
        max_backoff: Duration::from_millis(10_000),
        cache_time: Duration::from_millis(5000),
    }
}

/// Request function that counts its invocations and returns `temp`.
fn reading_fetch(
    calls: &Arc<AtomicU32>,
    temp: i32,
) -> impl Fn() -> Ready<Result<Reading, ApiError>> + Send + Sync + 'static {
    let calls = Arc::clone(calls);
    move || {
        calls.fetch_add(1, Ordering::SeqCst);
        ready(Ok(Reading { temp }))
    }
}

/// Request function that counts its invocations and always fails.
fn failing_fetch(
    calls: &Arc<AtomicU32>,
    error: ApiError,
) -> impl Fn() -> Ready<Result<Reading, ApiError>> + Send + Sync + 'static {
    let calls = Arc::clone(calls);
    move || {
        calls.fetch_add(1, Ordering::SeqCst);
        ready(Err(error.clone()))
    }
}

fn rate_limited() -> ApiError {
    ApiError::from_status(429, "")
}

async fn wait_for_queue(governor: &RequestGovernor, len: usize) {
    while governor.stats().queued_requests < len {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_cache_hit_skips_request() {
    let governor = RequestGovernor::new(config(10, 1.0));
    let calls = Arc::new(AtomicU32::new(0));
    let params = json!({ "q": "Paris" });

    let first = governor
        .execute("/current.json", &params, reading_fetch(&calls, 20), RequestOptions::default())
        .await
        .unwrap();
    let second = governor
        .execute("/current.json", &params, reading_fetch(&calls, 99), RequestOptions::default())
        .await
        .unwrap();

    assert_eq!(first, Reading { temp: 20 });
    assert_eq!(second, Reading { temp: 20 });
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(governor.stats().cached_entries, 1);
}

#[tokio::test(start_paused = true)]
async fn test_cache_hit_consumes_no_token() {
    let governor = RequestGovernor::new(config(1, 1.0));
    let calls = Arc::new(AtomicU32::new(0));
    let params = json!({ "q": "Paris" });

    governor
        .execute("/current.json", &params, reading_fetch(&calls, 20), RequestOptions::default())
        .await
        .unwrap();
    assert!(governor.is_rate_limited());

    // Bucket is empty, but the cached answer still comes back immediately
    let cached = governor
        .execute("/current.json", &params, reading_fetch(&calls, 21), RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(cached.temp, 20);
    assert_eq!(governor.stats().queued_requests, 0);
}

#[tokio::test(start_paused = true)]
async fn test_cache_expires_after_cache_time() {
    let governor = RequestGovernor::new(config(10, 1.0));
    let calls = Arc::new(AtomicU32::new(0));
    let params = json!({ "q": "Berlin" });

    let at_zero = governor
        .execute("/current.json", &params, reading_fetch(&calls, 20), RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(at_zero.temp, 20);

    tokio::time::advance(Duration::from_millis(3000)).await;
    let at_three = governor
        .execute("/current.json", &params, reading_fetch(&calls, 25), RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(at_three.temp, 20);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_millis(3000)).await;
    let at_six = governor
        .execute("/current.json", &params, reading_fetch(&calls, 25), RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(at_six.temp, 25);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_bypass_cache_and_distinct_params_fetch_again() {
    let governor = RequestGovernor::new(config(10, 1.0));
    let calls = Arc::new(AtomicU32::new(0));

    let paris = json!({ "q": "Paris" });
    let london = json!({ "q": "London" });

    governor
        .execute("/current.json", &paris, reading_fetch(&calls, 20), RequestOptions::default())
        .await
        .unwrap();
    governor
        .execute("/current.json", &london, reading_fetch(&calls, 15), RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let fresh = governor
        .execute(
            "/current.json",
            &paris,
            reading_fetch(&calls, 22),
            RequestOptions::default().bypass_cache(),
        )
        .await
        .unwrap();
    assert_eq!(fresh.temp, 22);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // The bypassing fetch refreshed the entry
    let cached = governor
        .execute("/current.json", &paris, reading_fetch(&calls, 0), RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(cached.temp, 22);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_burst_admission_then_wait() {
    let governor = RequestGovernor::new(config(10, 1.0));
    let calls = Arc::new(AtomicU32::new(0));
    let start = Instant::now();

    for i in 0..10 {
        let params = json!({ "q": format!("city-{}", i) });
        governor
            .execute("/current.json", &params, reading_fetch(&calls, i), RequestOptions::high_priority())
            .await
            .unwrap();
    }
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert!(governor.is_rate_limited());

    let eleventh = Instant::now();
    governor
        .execute(
            "/current.json",
            &json!({ "q": "city-10" }),
            reading_fetch(&calls, 10),
            RequestOptions::high_priority(),
        )
        .await
        .unwrap();
    assert!(eleventh.elapsed() >= Duration::from_millis(100));
    assert_eq!(calls.load(Ordering::SeqCst), 11);
}

#[tokio::test(start_paused = true)]
async fn test_high_priority_blocks_until_refill() {
    let governor = RequestGovernor::new(config(1, 1.0));
    let calls = Arc::new(AtomicU32::new(0));

    let start = Instant::now();
    governor
        .execute("/current.json", &json!({ "q": "A" }), reading_fetch(&calls, 1), RequestOptions::high_priority())
        .await
        .unwrap();
    assert_eq!(start.elapsed(), Duration::ZERO);

    governor
        .execute("/current.json", &json!({ "q": "B" }), reading_fetch(&calls, 2), RequestOptions::high_priority())
        .await
        .unwrap();
    let waited = start.elapsed();
    assert!(waited >= Duration::from_millis(1000), "waited {:?}", waited);
    assert!(waited <= Duration::from_millis(1200), "waited {:?}", waited);
    assert_eq!(governor.stats().queued_requests, 0);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_retries_are_bounded() {
    let governor = RequestGovernor::new(config(10, 1.0));
    let calls = Arc::new(AtomicU32::new(0));
    let start = Instant::now();

    let result = governor
        .execute("/current.json", &json!({ "q": "Rome" }), failing_fetch(&calls, rate_limited()), RequestOptions::default())
        .await;

    assert!(matches!(result, Err(ApiError::RateLimited { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    // 1s + 2s + 4s of backoff, each jittered by at most 20%
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(5600), "elapsed {:?}", elapsed);
    assert!(elapsed <= Duration::from_millis(8400), "elapsed {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_then_success_is_cached() {
    let governor = RequestGovernor::new(config(10, 1.0));
    let calls = Arc::new(AtomicU32::new(0));

    let counter = Arc::clone(&calls);
    let flaky = move || {
        let attempt = counter.fetch_add(1, Ordering::SeqCst);
        ready(if attempt < 2 {
            Err(rate_limited())
        } else {
            Ok(Reading { temp: 18 })
        })
    };

    let params = json!({ "q": "Madrid" });
    let value = governor
        .execute("/current.json", &params, flaky, RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(value.temp, 18);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let cached = governor
        .execute("/current.json", &params, reading_fetch(&calls, 0), RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(cached.temp, 18);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_server_error_is_not_retried_or_cached() {
    let governor = RequestGovernor::new(config(10, 1.0));
    let calls = Arc::new(AtomicU32::new(0));
    let params = json!({ "q": "Lisbon" });
    let start = Instant::now();

    let first = governor
        .execute("/current.json", &params, failing_fetch(&calls, ApiError::from_status(500, "")), RequestOptions::default())
        .await;
    assert!(matches!(first, Err(ApiError::ServerUnavailable { status: 500, .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);

    let second = governor
        .execute("/current.json", &params, failing_fetch(&calls, ApiError::from_status(500, "")), RequestOptions::default())
        .await;
    assert!(second.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(governor.stats().cached_entries, 0);
}

#[tokio::test(start_paused = true)]
async fn test_queued_requests_run_in_fifo_order() {
    let governor = RequestGovernor::new(config(1, 1.0));
    let calls = Arc::new(AtomicU32::new(0));

    // Spend the only token
    governor
        .execute("/current.json", &json!({ "q": "warmup" }), reading_fetch(&calls, 0), RequestOptions::default())
        .await
        .unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();

    for (i, label) in ["A", "B", "C"].into_iter().enumerate() {
        let gov = governor.clone();
        let seen = Arc::clone(&order);
        let fetch = move || {
            seen.lock().unwrap().push(label);
            ready(Ok(Reading { temp: i as i32 }))
        };
        handles.push(tokio::spawn(async move {
            let params = json!({ "q": label });
            gov.execute("/current.json", &params, fetch, RequestOptions::default())
                .await
        }));
        wait_for_queue(&governor, i + 1).await;
    }

    for (i, handle) in handles.into_iter().enumerate() {
        let reading = handle.await.unwrap().unwrap();
        assert_eq!(reading.temp, i as i32);
    }
    assert_eq!(*order.lock().unwrap(), vec!["A", "B", "C"]);
    assert_eq!(governor.stats().queued_requests, 0);
}

#[tokio::test(start_paused = true)]
async fn test_queued_request_is_cached_once_serviced() {
    let governor = RequestGovernor::new(config(1, 1.0));
    let calls = Arc::new(AtomicU32::new(0));

    governor
        .execute("/current.json", &json!({ "q": "warmup" }), reading_fetch(&calls, 0), RequestOptions::default())
        .await
        .unwrap();

    let params = json!({ "q": "Vienna" });
    let queued = governor
        .execute("/current.json", &params, reading_fetch(&calls, 11), RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(queued.temp, 11);

    let cached = governor
        .execute("/current.json", &params, reading_fetch(&calls, 12), RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(cached.temp, 11);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_queued_rate_limited_request_is_not_retried() {
    let governor = RequestGovernor::new(config(1, 1.0));
    let calls = Arc::new(AtomicU32::new(0));

    governor
        .execute("/current.json", &json!({ "q": "warmup" }), reading_fetch(&calls, 0), RequestOptions::default())
        .await
        .unwrap();

    let failures = Arc::new(AtomicU32::new(0));
    let result = governor
        .execute(
            "/current.json",
            &json!({ "q": "Athens" }),
            failing_fetch(&failures, rate_limited()),
            RequestOptions::default(),
        )
        .await;

    assert!(matches!(result, Err(ApiError::RateLimited { .. })));
    assert_eq!(failures.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_low_priority_queues_like_normal() {
    let governor = RequestGovernor::new(config(1, 1.0));
    let calls = Arc::new(AtomicU32::new(0));

    governor
        .execute("/current.json", &json!({ "q": "warmup" }), reading_fetch(&calls, 0), RequestOptions::default())
        .await
        .unwrap();

    let gov = governor.clone();
    let fetch = reading_fetch(&calls, 5);
    let handle = tokio::spawn(async move {
        let params = json!({ "q": "Prague" });
        gov.execute(
            "/current.json",
            &params,
            fetch,
            RequestOptions::default().with_priority(Priority::Low),
        )
        .await
    });

    wait_for_queue(&governor, 1).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let reading = handle.await.unwrap().unwrap();
    assert_eq!(reading.temp, 5);
}

#[tokio::test(start_paused = true)]
async fn test_is_rate_limited_tracks_bucket() {
    let governor = RequestGovernor::new(config(1, 1.0));
    let calls = Arc::new(AtomicU32::new(0));
    assert!(!governor.is_rate_limited());

    governor
        .execute("/current.json", &json!({ "q": "Oslo" }), reading_fetch(&calls, 3), RequestOptions::default())
        .await
        .unwrap();
    assert!(governor.is_rate_limited());

    tokio::time::sleep(Duration::from_millis(1050)).await;
    assert!(!governor.is_rate_limited());
}

#[tokio::test(start_paused = true)]
async fn test_clear_cache_forces_refetch() {
    let governor = RequestGovernor::new(config(10, 1.0));
    let calls = Arc::new(AtomicU32::new(0));
    let params = json!({ "q": "Dublin" });

    governor
        .execute("/current.json", &params, reading_fetch(&calls, 9), RequestOptions::default())
        .await
        .unwrap();
    governor.clear_cache();
    assert_eq!(governor.stats().cached_entries, 0);

    governor
        .execute("/current.json", &params, reading_fetch(&calls, 9), RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(governor.stats().tracked_endpoints, 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_fails_queued_requests() {
    let governor = RequestGovernor::new(config(1, 1.0));
    let calls = Arc::new(AtomicU32::new(0));

    governor
        .execute("/current.json", &json!({ "q": "warmup" }), reading_fetch(&calls, 0), RequestOptions::default())
        .await
        .unwrap();

    let gov = governor.clone();
    let fetch = reading_fetch(&calls, 8);
    let handle = tokio::spawn(async move {
        let params = json!({ "q": "Vienna" });
        gov.execute("/current.json", &params, fetch, RequestOptions::default())
            .await
    });

    wait_for_queue(&governor, 1).await;
    governor.shutdown();

    let result = handle.await.unwrap();
    assert!(matches!(result, Err(ApiError::Generic { status: None, .. })));
    assert_eq!(governor.stats().queued_requests, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_execute_after_shutdown_fails_fast() {
    let governor = RequestGovernor::new(config(1, 1.0));
    let calls = Arc::new(AtomicU32::new(0));
    let warm = json!({ "q": "warmup" });

    governor
        .execute("/current.json", &warm, reading_fetch(&calls, 0), RequestOptions::default())
        .await
        .unwrap();
    governor.shutdown();

    let start = Instant::now();
    for options in [
        RequestOptions::default(),
        RequestOptions::default().with_priority(Priority::Low),
        RequestOptions::high_priority(),
    ] {
        let result = tokio::time::timeout(
            Duration::from_secs(3600),
            governor.execute(
                "/current.json",
                &json!({ "q": "Lisbon" }),
                reading_fetch(&calls, 1),
                options,
            ),
        )
        .await
        .expect("execute must not hang after shutdown");

        assert!(matches!(result, Err(ApiError::Generic { status: None, .. })));
    }
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(governor.stats().queued_requests, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Cached responses are still served
    let cached = governor
        .execute("/current.json", &warm, reading_fetch(&calls, 99), RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(cached.temp, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_wakes_high_priority_waiter() {
    let governor = RequestGovernor::new(config(1, 1.0));
    let calls = Arc::new(AtomicU32::new(0));

    governor
        .execute("/current.json", &json!({ "q": "warmup" }), reading_fetch(&calls, 0), RequestOptions::default())
        .await
        .unwrap();

    let gov = governor.clone();
    let fetch = reading_fetch(&calls, 4);
    let start = Instant::now();
    let handle = tokio::spawn(async move {
        let params = json!({ "q": "Madrid" });
        gov.execute("/current.json", &params, fetch, RequestOptions::high_priority())
            .await
    });

    tokio::time::sleep(Duration::from_millis(350)).await;
    governor.shutdown();

    let result = handle.await.unwrap();
    assert!(matches!(result, Err(ApiError::Generic { status: None, .. })));
    assert!(start.elapsed() < Duration::from_millis(1000));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_governor_releases_abandoned_queue_entries() {
    let governor = RequestGovernor::new(config(1, 1.0));
    let calls = Arc::new(AtomicU32::new(0));

    governor
        .execute("/current.json", &json!({ "q": "warmup" }), reading_fetch(&calls, 0), RequestOptions::default())
        .await
        .unwrap();

    // Caller gives up while queued; the entry stays until drained or dropped
    let abandoned = tokio::time::timeout(
        Duration::from_millis(10),
        governor.execute(
            "/current.json",
            &json!({ "q": "Rome" }),
            reading_fetch(&calls, 6),
            RequestOptions::default(),
        ),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(governor.stats().queued_requests, 1);
    assert_eq!(Arc::strong_count(&calls), 2);

    drop(governor);
    assert_eq!(Arc::strong_count(&calls), 1);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_manual_clock_drives_cache_expiry() {
    let clock = Arc::new(ManualClock::new());
    let governor = RequestGovernor::with_clock(config(10, 1.0), clock.clone());
    let calls = Arc::new(AtomicU32::new(0));
    let params = json!({ "q": "Berlin" });

    let first = governor
        .execute("/current.json", &params, reading_fetch(&calls, 20), RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(first.temp, 20);

    clock.advance(Duration::from_millis(3000));
    let hit = governor
        .execute("/current.json", &params, reading_fetch(&calls, 21), RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(hit.temp, 20);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    clock.advance(Duration::from_millis(3000));
    let miss = governor
        .execute("/current.json", &params, reading_fetch(&calls, 22), RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(miss.temp, 22);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_manual_clock_drives_refill() {
    let clock = Arc::new(ManualClock::new());
    let governor = RequestGovernor::with_clock(config(1, 1.0), clock.clone());
    let calls = Arc::new(AtomicU32::new(0));

    governor
        .execute("/current.json", &json!({ "q": "Bern" }), reading_fetch(&calls, 1), RequestOptions::default())
        .await
        .unwrap();
    assert!(governor.is_rate_limited());

    // Ticks keep firing, but the injected clock has not moved
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(governor.is_rate_limited());

    clock.advance(Duration::from_millis(1000));
    tokio::time::sleep(Duration::from_millis(1050)).await;
    assert!(!governor.is_rate_limited());
    assert_eq!(governor.stats().available_tokens, 1.0);
}
