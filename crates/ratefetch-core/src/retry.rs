//! Retry logic with exponential backoff.
//!
//! [`RetryingClient`] and [`BlockingRetryingClient`] decorate a raw transport:
//! every attempt first takes a permit from the shared [`Throttle`], then the
//! outcome is classified by [`RetryConfig::classify`]. Quota (429) and timeout
//! failures are retried after [`RetryConfig::delay_for_attempt`]; anything else
//! that is not 2xx fails immediately.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{FetchError, FetchErrorKind};
use crate::http_client::{
    BlockingHttpClient, HttpClient, HttpError, HttpErrorKind, HttpRequest, HttpResponse,
};
use crate::rate_limit::Throttle;

/// Backoff strategy for retrying failed requests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Uses a fixed delay between retries.
    Fixed {
        /// Delay between retries.
        delay: Duration,
    },
    /// Uses an exponential delay between retries.
    ///
    /// The delay is calculated as `base * (factor ^ attempt)`.
    Exponential {
        /// The initial backoff duration.
        base: Duration,
        /// The multiplicative factor for each subsequent retry.
        factor: f64,
        /// The maximum duration to wait between retries.
        max: Duration,
        /// Adds up to 25% of random extra delay before the `max` cap. Delays
        /// stay non-decreasing when `factor >= 1.25`.
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_secs(1),
            factor: 2.0,
            max: Duration::from_secs(30),
            jitter: false,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let scale = factor.powi(attempt.min(i32::MAX as u32) as i32);
                let mut seconds = base.as_secs_f64() * scale;
                if jitter {
                    seconds *= 1.0 + fastrand::f64() * 0.25;
                }
                Duration::from_secs_f64(seconds.min(max.as_secs_f64()).max(0.0))
            }
        }
    }
}

/// Configuration for the automatic retry mechanism.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Enables or disables the retry mechanism.
    pub enabled: bool,
    /// The maximum number of retries to attempt.
    /// Total attempts = `max_retries + 1`.
    pub max_retries: u32,
    /// The backoff strategy to use between retries.
    pub backoff: Backoff,
    /// HTTP statuses that are retried. 429 maps to `RateLimited`, the rest to `Timeout`.
    pub retry_on_status: Vec<u16>,
    /// Whether to retry on request timeouts.
    pub retry_on_timeout: bool,
    /// Whether to retry on connection errors.
    pub retry_on_connect: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            backoff: Backoff::default(),
            retry_on_status: vec![408, 429],
            retry_on_timeout: true,
            retry_on_connect: true,
        }
    }
}

/// Outcome of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Success(HttpResponse),
    Retry(FetchError),
    Fail(FetchError),
}

impl RetryConfig {
    /// Create a new retry configuration with exponential backoff.
    pub fn exponential(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Create a new retry configuration with fixed backoff.
    pub fn fixed(delay: Duration, max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Fixed { delay },
            ..Self::default()
        }
    }

    /// Disable retries.
    pub fn no_retry() -> Self {
        Self {
            enabled: false,
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn should_retry_status(&self, status: u16) -> bool {
        self.retry_on_status.contains(&status)
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }

    /// Total number of attempts a request may take.
    pub fn max_attempts(&self) -> u32 {
        if self.enabled {
            self.max_retries.saturating_add(1)
        } else {
            1
        }
    }

    /// Classifies one transport outcome.
    pub fn classify(&self, outcome: Result<HttpResponse, HttpError>) -> Verdict {
        match outcome {
            Ok(response) if response.is_success() => Verdict::Success(response),
            Ok(response) => {
                let status = response.status;
                let error = if status == 429 {
                    FetchError::rate_limited("upstream rate limit exceeded")
                } else if status == 408 {
                    FetchError::timeout("upstream request timeout").with_status(status)
                } else {
                    FetchError::upstream(status, format!("upstream returned status {status}"))
                };

                if self.should_retry_status(status) {
                    Verdict::Retry(error)
                } else {
                    Verdict::Fail(error)
                }
            }
            Err(error) => match error.kind() {
                HttpErrorKind::Timeout => {
                    let error = FetchError::timeout(error.message());
                    if self.retry_on_timeout {
                        Verdict::Retry(error)
                    } else {
                        Verdict::Fail(error)
                    }
                }
                HttpErrorKind::Connect => {
                    let error = FetchError::transient(error.message());
                    if self.retry_on_connect {
                        Verdict::Retry(error)
                    } else {
                        Verdict::Fail(error)
                    }
                }
                HttpErrorKind::Other => Verdict::Fail(FetchError::transient(error.message())),
            },
        }
    }

    /// Decides what follows a failed `attempt` (0-based): `Some(delay)` to retry
    /// after sleeping, `None` when the error is final.
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt + 1 < self.max_attempts() {
            Some(self.delay_for_attempt(attempt))
        } else {
            None
        }
    }
}

fn exhausted(error: FetchError, attempts: u32) -> FetchError {
    let message = format!("{} after {attempts} attempt(s)", error.message());
    let rebuilt = match error.kind() {
        FetchErrorKind::RateLimited => FetchError::rate_limited(message),
        FetchErrorKind::Timeout => FetchError::timeout(message),
        _ => FetchError::transient(message),
    };
    match error.status() {
        Some(status) => rebuilt.with_status(status),
        None => rebuilt,
    }
}

/// Async retry decorator around an [`HttpClient`].
#[derive(Clone)]
pub struct RetryingClient {
    inner: Arc<dyn HttpClient>,
    throttle: Arc<dyn Throttle>,
    config: RetryConfig,
}

impl RetryingClient {
    pub fn new(inner: Arc<dyn HttpClient>, throttle: Arc<dyn Throttle>, config: RetryConfig) -> Self {
        Self {
            inner,
            throttle,
            config,
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse, FetchError> {
        let mut attempt = 0;
        loop {
            self.throttle.acquire().await;
            let outcome = self.inner.execute(request.clone()).await;

            match self.config.classify(outcome) {
                Verdict::Success(response) => return Ok(response),
                Verdict::Fail(error) => return Err(error),
                Verdict::Retry(error) => match self.config.next_delay(attempt) {
                    Some(delay) => {
                        tracing::warn!(
                            url = %request.url,
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            code = error.code(),
                            "retrying upstream request"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => return Err(exhausted(error, attempt + 1)),
                },
            }
        }
    }
}

/// Thread-blocking retry decorator around a [`BlockingHttpClient`].
#[derive(Clone)]
pub struct BlockingRetryingClient {
    inner: Arc<dyn BlockingHttpClient>,
    throttle: Arc<dyn Throttle>,
    config: RetryConfig,
}

impl BlockingRetryingClient {
    pub fn new(
        inner: Arc<dyn BlockingHttpClient>,
        throttle: Arc<dyn Throttle>,
        config: RetryConfig,
    ) -> Self {
        Self {
            inner,
            throttle,
            config,
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn send(&self, request: HttpRequest) -> Result<HttpResponse, FetchError> {
        let mut attempt = 0;
        loop {
            self.throttle.acquire_blocking();
            let outcome = self.inner.execute(request.clone());

            match self.config.classify(outcome) {
                Verdict::Success(response) => return Ok(response),
                Verdict::Fail(error) => return Err(error),
                Verdict::Retry(error) => match self.config.next_delay(attempt) {
                    Some(delay) => {
                        tracing::warn!(
                            url = %request.url,
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            code = error.code(),
                            "retrying upstream request"
                        );
                        std::thread::sleep(delay);
                        attempt += 1;
                    }
                    None => return Err(exhausted(error, attempt + 1)),
                },
            }
        }
    }
}
