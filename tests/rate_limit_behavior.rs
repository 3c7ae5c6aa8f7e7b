//! Behavior-driven tests for the shared limiter and the retry decorator.

#[path = "support/mod.rs"]
mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ratefetch_core::{
    Backoff, CacheStore, FetchErrorKind, HttpError, HttpResponse, QueryParams, RateLimiter,
    Resource, RetryConfig, SharedResources, Throttle,
};

use support::{client_with, config, shared, Collection, FakeUpstream};

fn max_in_any_window(grants: &[Instant], window: Duration) -> usize {
    let mut grants = grants.to_vec();
    grants.sort();
    grants
        .iter()
        .enumerate()
        .map(|(start, first)| {
            grants[start..]
                .iter()
                .take_while(|grant| grant.duration_since(*first) < window)
                .count()
        })
        .max()
        .unwrap_or(0)
}

// =============================================================================
// Limiter ceiling
// =============================================================================

#[test]
fn when_threads_and_tasks_share_one_limiter_system_holds_the_ceiling() {
    // Given: One 20 req/s limiter shared by four threads and four tasks
    let limiter = Arc::new(RateLimiter::per_second(20.0));
    let grants = Arc::new(Mutex::new(Vec::new()));

    // When: Every caller takes six permits
    let threads = (0..4)
        .map(|_| {
            let limiter = Arc::clone(&limiter);
            let grants = Arc::clone(&grants);
            std::thread::spawn(move || {
                for _ in 0..6 {
                    limiter.acquire_blocking();
                    grants.lock().expect("grant log").push(Instant::now());
                }
            })
        })
        .collect::<Vec<_>>();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("runtime");
    runtime.block_on(async {
        let tasks = (0..4)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                let grants = Arc::clone(&grants);
                tokio::spawn(async move {
                    for _ in 0..6 {
                        limiter.acquire().await;
                        grants.lock().expect("grant log").push(Instant::now());
                    }
                })
            })
            .collect::<Vec<_>>();
        for task in tasks {
            task.await.expect("task");
        }
    });
    for thread in threads {
        thread.join().expect("thread");
    }

    // Then: 48 permits went out and no window of just under a second saw more than 20
    let grants = grants.lock().expect("grant log").clone();
    assert_eq!(grants.len(), 48);
    assert_eq!(limiter.granted(), 48);
    assert!(max_in_any_window(&grants, Duration::from_millis(950)) <= 20);
}

#[test]
fn when_two_clients_share_resources_system_paces_them_together() {
    // Given: Two clients over the same 10 req/s limiter
    let shared = SharedResources::new(
        Arc::new(RateLimiter::per_second(10.0)),
        CacheStore::disabled(),
    );
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    let first_upstream = Collection::leads(40).upstream();
    let second_upstream = Collection::leads(40).upstream();

    // When: Both fetch four pages at the same time
    let started = Instant::now();
    runtime.block_on(async {
        let first = client_with(first_upstream.clone(), config(10), shared.clone(), RetryConfig::no_retry());
        let second = client_with(second_upstream.clone(), config(10), shared.clone(), RetryConfig::no_retry());
        let resource = Resource::embedded("leads");
        let params = QueryParams::new();
        let (left, right) = tokio::join!(
            first.fetch_all(&resource, &params),
            second.fetch_all(&resource, &params),
        );
        left.expect("first job");
        right.expect("second job");
    });

    // Then: Eight requests took at least seven limiter intervals
    assert_eq!(first_upstream.request_count() + second_upstream.request_count(), 8);
    assert_eq!(shared.throttle.granted(), 8);
    assert!(started.elapsed() >= Duration::from_millis(650));
}

// =============================================================================
// Retry and backoff
// =============================================================================

#[tokio::test(start_paused = true)]
async fn when_upstream_keeps_answering_429_system_retries_then_reports_rate_limited() {
    // Given: An upstream that is always over quota and three retries with backoff
    let upstream = Arc::new(FakeUpstream::new(|_| {
        Ok(HttpResponse::with_status(429, r#"{"title":"Too Many Requests"}"#))
    }));
    let retry = RetryConfig {
        backoff: Backoff::Exponential {
            base: Duration::from_millis(250),
            factor: 2.0,
            max: Duration::from_secs(30),
            jitter: false,
        },
        ..RetryConfig::exponential(3)
    };
    let shared = shared();
    let client = client_with(upstream.clone(), config(250), shared.clone(), retry);

    // When: The collection is fetched
    let error = client
        .fetch_all(&Resource::embedded("leads"), &QueryParams::new())
        .await
        .expect_err("quota never recovers");

    // Then: Four attempts went out, each after a longer pause, each with a permit
    assert_eq!(error.kind(), FetchErrorKind::RateLimited);
    assert_eq!(error.status(), Some(429));
    let attempts = upstream.requests();
    assert_eq!(attempts.len(), 4);
    assert_eq!(shared.throttle.granted(), 4);
    let gaps = attempts
        .windows(2)
        .map(|pair| pair[1].at.duration_since(pair[0].at))
        .collect::<Vec<_>>();
    let expected = [250, 500, 1000].map(Duration::from_millis);
    for (gap, expected) in gaps.iter().zip(expected) {
        assert!(*gap >= expected, "gap {gap:?} shorter than {expected:?}");
        assert!(*gap < expected + Duration::from_millis(5), "gap {gap:?} overshot");
    }
    assert!(gaps.windows(2).all(|pair| pair[1] >= pair[0]));
}

#[tokio::test(start_paused = true)]
async fn when_timeouts_clear_up_system_returns_the_page() {
    // Given: An upstream that times out twice, then answers
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let collection = Collection::leads(3);
    let upstream = Arc::new(FakeUpstream::new(move |request| {
        match counter.fetch_add(1, Ordering::SeqCst) {
            0 => Err(HttpError::timeout("read timed out")),
            1 => Ok(HttpResponse::with_status(408, "")),
            _ => collection.respond(request),
        }
    }));
    let client = client_with(upstream.clone(), config(250), shared(), RetryConfig::exponential(3));

    // When: The collection is fetched
    let outcome = client
        .fetch_all(&Resource::embedded("leads"), &QueryParams::new())
        .await
        .expect("third attempt succeeds");

    // Then: The records arrive after two retries
    assert_eq!(outcome.records.len(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn when_upstream_rejects_the_request_system_does_not_retry() {
    // Given: An upstream answering 403 and a generous retry budget
    let upstream = Arc::new(FakeUpstream::new(|_| Ok(HttpResponse::with_status(403, ""))));
    let client = client_with(upstream.clone(), config(250), shared(), RetryConfig::exponential(5));

    // When: The collection is fetched
    let error = client
        .fetch_all(&Resource::embedded("leads"), &QueryParams::new())
        .await
        .expect_err("forbidden");

    // Then: The terminal status is reported after a single attempt
    assert_eq!(error.kind(), FetchErrorKind::Upstream);
    assert_eq!(error.status(), Some(403));
    assert!(!error.retryable());
    assert_eq!(upstream.request_count(), 1);
}
