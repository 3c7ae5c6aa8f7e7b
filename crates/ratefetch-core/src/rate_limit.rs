//! Process-wide request rate limiting.
//!
//! One [`RateLimiter`] is built per upstream and shared by `Arc` handle with every
//! executor, worker thread and task that talks to it. Thread workers call
//! [`Throttle::acquire_blocking`], tokio tasks await [`Throttle::acquire`]; both
//! draw permits from the same GCRA state, so the ceiling holds across a process
//! that mixes the two.

use std::future::Future;
use std::num::NonZeroU32;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use governor::clock::{Clock, DefaultClock};
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::Quota;

type DirectRateLimiter = governor::RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Permit source shared by the blocking and async fetch paths.
pub trait Throttle: Send + Sync {
    /// Parks the calling thread until a permit is granted.
    fn acquire_blocking(&self);

    /// Suspends the calling task until a permit is granted.
    fn acquire<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

    /// Number of permits granted so far.
    fn granted(&self) -> u64;
}

#[derive(Debug, Default)]
struct GrantLog {
    last_grant: Option<Instant>,
    granted: u64,
}

/// Minimum-interval limiter: no two permits are granted closer than
/// [`RateLimiter::min_interval`] apart, whatever the number of callers.
pub struct RateLimiter {
    limiter: DirectRateLimiter,
    clock: DefaultClock,
    min_interval: Duration,
    log: Mutex<GrantLog>,
}

impl RateLimiter {
    /// Limiter allowing at most `requests_per_second` permits per second.
    ///
    /// Fractional rates are allowed (`0.5` means one request every two seconds).
    pub fn per_second(requests_per_second: f64) -> Self {
        let rate = if requests_per_second.is_finite() && requests_per_second > 0.0 {
            requests_per_second
        } else {
            1.0
        };
        Self::with_min_interval(Duration::from_secs_f64(1.0 / rate))
    }

    pub fn with_min_interval(min_interval: Duration) -> Self {
        let min_interval = min_interval.max(Duration::from_millis(1));
        let quota = Quota::with_period(min_interval)
            .expect("period is clamped above zero")
            .allow_burst(NonZeroU32::MIN);

        Self {
            limiter: governor::RateLimiter::direct(quota),
            clock: DefaultClock::default(),
            min_interval,
            log: Mutex::new(GrantLog::default()),
        }
    }

    pub const fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wall-clock instant of the most recent grant, if any.
    pub fn last_grant(&self) -> Option<Instant> {
        self.log
            .lock()
            .expect("rate limiter grant log should not be poisoned")
            .last_grant
    }

    fn record_grant(&self) {
        let mut log = self
            .log
            .lock()
            .expect("rate limiter grant log should not be poisoned");
        log.last_grant = Some(Instant::now());
        log.granted = log.granted.saturating_add(1);
    }
}

impl Throttle for RateLimiter {
    fn acquire_blocking(&self) {
        while let Err(not_until) = self.limiter.check() {
            std::thread::sleep(not_until.wait_time_from(self.clock.now()));
        }
        self.record_grant();
    }

    fn acquire<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            self.limiter.until_ready().await;
            self.record_grant();
        })
    }

    fn granted(&self) -> u64 {
        self.log
            .lock()
            .expect("rate limiter grant log should not be poisoned")
            .granted
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("min_interval", &self.min_interval)
            .field("granted", &self.granted())
            .finish()
    }
}

/// Throttle that grants every permit immediately. Counts grants.
#[derive(Debug, Default)]
pub struct Unthrottled {
    granted: AtomicU64,
}

impl Unthrottled {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Throttle for Unthrottled {
    fn acquire_blocking(&self) {
        self.granted.fetch_add(1, Ordering::Relaxed);
    }

    fn acquire<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        self.granted.fetch_add(1, Ordering::Relaxed);
        Box::pin(async {})
    }

    fn granted(&self) -> u64 {
        self.granted.load(Ordering::Relaxed)
    }
}
