use std::fmt::{Display, Formatter};

use thiserror::Error;

/// Classification of a failed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchErrorKind {
    /// Upstream answered 429 on every attempt.
    RateLimited,
    /// Request timed out (transport timeout or HTTP 408) on every attempt.
    Timeout,
    /// Connection failure or reset on every attempt.
    Transient,
    /// Non-retryable HTTP status.
    Upstream,
    /// Response body could not be interpreted.
    Decode,
    /// Caller-supplied parameters conflict with what the client sets itself.
    InvalidRequest,
    /// Some pages of a fetch job were lost, or pages past the last requested
    /// one may hold more records.
    PartialFetch,
}

/// Structured fetch error surfaced by the executor, paginator and batch fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
    kind: FetchErrorKind,
    message: String,
    status: Option<u16>,
}

impl FetchError {
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::RateLimited, message).with_status(429)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Timeout, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Transient, message)
    }

    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Upstream, message).with_status(status)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Decode, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::InvalidRequest, message)
    }

    pub fn partial_fetch(lost_pages: &[u32]) -> Self {
        let pages = lost_pages
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        Self::new(
            FetchErrorKind::PartialFetch,
            format!("fetch incomplete; lost pages: {pages}"),
        )
    }

    /// A job whose records may continue past the last page it requested.
    pub fn truncated(last_page: u32) -> Self {
        Self::new(
            FetchErrorKind::PartialFetch,
            format!("fetch incomplete; records may follow page {last_page}"),
        )
    }

    fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub const fn kind(&self) -> FetchErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn status(&self) -> Option<u16> {
        self.status
    }

    /// Whether another attempt of the same request could succeed.
    pub const fn retryable(&self) -> bool {
        matches!(
            self.kind,
            FetchErrorKind::RateLimited | FetchErrorKind::Timeout | FetchErrorKind::Transient
        )
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            FetchErrorKind::RateLimited => "fetch.rate_limited",
            FetchErrorKind::Timeout => "fetch.timeout",
            FetchErrorKind::Transient => "fetch.transient",
            FetchErrorKind::Upstream => "fetch.upstream",
            FetchErrorKind::Decode => "fetch.decode",
            FetchErrorKind::InvalidRequest => "fetch.invalid_request",
            FetchErrorKind::PartialFetch => "fetch.partial",
        }
    }
}

impl Display for FetchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for FetchError {}

/// Configuration loading and validation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {name}")]
    Missing { name: &'static str },

    #[error("setting {name} has invalid value '{value}'")]
    InvalidValue { name: &'static str, value: String },

    #[error("setting {name} must be greater than zero")]
    NotPositive { name: &'static str },

    #[error("base url must start with http:// or https://: '{value}'")]
    InvalidBaseUrl { value: String },
}

/// External cache store errors. Never surfaced past [`crate::cache::CacheStore`].
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(#[from] redis::RedisError),

    #[error("cache lock poisoned")]
    Poisoned,
}
