//! Client configuration loaded from `RATEFETCH_*` environment variables.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::CachePolicy;
use crate::error::ConfigError;
use crate::executor::ApiTarget;
use crate::http_client::HttpAuth;
use crate::pagination::FetchOptions;
use crate::retry::{Backoff, RetryConfig};

pub const ENV_PREFIX: &str = "RATEFETCH_";

/// Everything needed to build a [`crate::FetchClient`] for one upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    /// Bearer token sent in the `authorization` header.
    pub token: Option<String>,
    /// Process-wide request ceiling, fractional rates allowed.
    pub max_rps: f64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub page_size: u32,
    pub max_pages: u32,
    pub unknown_total_page_cap: u32,
    pub max_concurrency: usize,
    pub timeout_ms: u64,
    /// Zero disables caching.
    pub cache_ttl_secs: u64,
    pub cache_prefix: String,
    /// External cache tier; the in-process tier is used when unset or unreachable.
    pub redis_url: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: None,
            max_rps: 7.0,
            max_retries: 3,
            backoff_base_ms: 1_000,
            backoff_max_ms: 30_000,
            page_size: 250,
            max_pages: 50,
            unknown_total_page_cap: 10,
            max_concurrency: 10,
            timeout_ms: 30_000,
            cache_ttl_secs: 600,
            cache_prefix: String::from("ratefetch"),
            redis_url: None,
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Reads the process environment. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`ClientConfig::from_env`] over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let read = |suffix: &str| {
            lookup(&format!("{ENV_PREFIX}{suffix}"))
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };

        let mut config = Self {
            base_url: read("BASE_URL").ok_or(ConfigError::Missing {
                name: "RATEFETCH_BASE_URL",
            })?,
            token: read("TOKEN"),
            cache_prefix: read("CACHE_PREFIX").unwrap_or_else(|| String::from("ratefetch")),
            redis_url: read("REDIS_URL"),
            ..Self::default()
        };

        parse_into(&mut config.max_rps, read("MAX_RPS"), "RATEFETCH_MAX_RPS")?;
        parse_into(&mut config.max_retries, read("MAX_RETRIES"), "RATEFETCH_MAX_RETRIES")?;
        parse_into(&mut config.backoff_base_ms, read("BACKOFF_BASE_MS"), "RATEFETCH_BACKOFF_BASE_MS")?;
        parse_into(&mut config.backoff_max_ms, read("BACKOFF_MAX_MS"), "RATEFETCH_BACKOFF_MAX_MS")?;
        parse_into(&mut config.page_size, read("PAGE_SIZE"), "RATEFETCH_PAGE_SIZE")?;
        parse_into(&mut config.max_pages, read("MAX_PAGES"), "RATEFETCH_MAX_PAGES")?;
        parse_into(
            &mut config.unknown_total_page_cap,
            read("UNKNOWN_TOTAL_PAGE_CAP"),
            "RATEFETCH_UNKNOWN_TOTAL_PAGE_CAP",
        )?;
        parse_into(&mut config.max_concurrency, read("MAX_CONCURRENCY"), "RATEFETCH_MAX_CONCURRENCY")?;
        parse_into(&mut config.timeout_ms, read("TIMEOUT_MS"), "RATEFETCH_TIMEOUT_MS")?;
        parse_into(&mut config.cache_ttl_secs, read("CACHE_TTL_SECS"), "RATEFETCH_CACHE_TTL_SECS")?;

        config.validate()?;
        Ok(config)
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::Missing {
                name: "RATEFETCH_BASE_URL",
            });
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidBaseUrl {
                value: self.base_url.clone(),
            });
        }
        if !(self.max_rps.is_finite() && self.max_rps > 0.0) {
            return Err(ConfigError::NotPositive {
                name: "RATEFETCH_MAX_RPS",
            });
        }

        let positive = [
            ("RATEFETCH_PAGE_SIZE", u64::from(self.page_size)),
            ("RATEFETCH_MAX_PAGES", u64::from(self.max_pages)),
            ("RATEFETCH_UNKNOWN_TOTAL_PAGE_CAP", u64::from(self.unknown_total_page_cap)),
            ("RATEFETCH_MAX_CONCURRENCY", self.max_concurrency as u64),
            ("RATEFETCH_TIMEOUT_MS", self.timeout_ms),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::NotPositive { name });
            }
        }

        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(ConfigError::InvalidValue {
                name: "RATEFETCH_BACKOFF_MAX_MS",
                value: self.backoff_max_ms.to_string(),
            });
        }
        Ok(())
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            backoff: Backoff::Exponential {
                base: Duration::from_millis(self.backoff_base_ms),
                factor: 2.0,
                max: Duration::from_millis(self.backoff_max_ms),
                jitter: false,
            },
            ..RetryConfig::default()
        }
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            max_concurrency: self.max_concurrency,
            max_pages: self.max_pages,
            page_size: self.page_size,
            unknown_total_page_cap: self.unknown_total_page_cap,
            cache: CachePolicy::default(),
        }
    }

    pub fn api_target(&self) -> ApiTarget {
        let auth = match &self.token {
            Some(token) => HttpAuth::BearerToken(token.clone()),
            None => HttpAuth::None,
        };
        ApiTarget::new(&self.base_url)
            .with_auth(auth)
            .with_timeout_ms(self.timeout_ms)
            .with_cache_prefix(&self.cache_prefix)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

fn parse_into<T: FromStr>(
    slot: &mut T,
    raw: Option<String>,
    name: &'static str,
) -> Result<(), ConfigError> {
    if let Some(raw) = raw {
        *slot = raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value: raw.clone() })?;
    }
    Ok(())
}
