//! # Ratefetch Core
//!
//! Rate-limited, cached, concurrent fetching of paginated REST collections.
//!
//! ## Overview
//!
//! A fetch job requests page 1, estimates the page count, then fetches the
//! remaining pages concurrently; cursor-paged collections are walked one page
//! at a time instead. Every request, from any thread or task, draws
//! a permit from one shared limiter; responses are cached by a deterministic
//! key; quota and timeout failures are retried with exponential backoff.
//! Pages that still fail are reported, never silently dropped.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`batch`] | Lookup by identifier with per-id fallback |
//! | [`cache`] | Two-tier response cache and cache keys |
//! | [`client`] | Async and blocking client facades |
//! | [`config`] | `RATEFETCH_*` configuration |
//! | [`error`] | Fetch, config and cache errors |
//! | [`executor`] | Single cached, throttled, retried request |
//! | [`http_client`] | Transport abstraction (reqwest async and blocking) |
//! | [`pagination`] | Page discovery, fan-out and merge |
//! | [`params`] | Query parameter maps |
//! | [`provider_policy`] | Per-upstream limit presets |
//! | [`rate_limit`] | Process-wide request limiter |
//! | [`redis_store`] | Redis cache tier |
//! | [`resource`] | Collection descriptions and envelope parsing |
//! | [`retry`] | Retry decorator and backoff |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ratefetch_core::{ClientConfig, FetchClient, QueryParams, Resource};
//!
//! let client = FetchClient::from_config(ClientConfig::from_env()?)?;
//! let leads = client
//!     .fetch_all(&Resource::embedded("leads"), &QueryParams::new().with("with", "contacts"))
//!     .await?
//!     .into_complete()?;
//! ```

pub mod batch;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod http_client;
pub mod pagination;
pub mod params;
pub mod provider_policy;
pub mod rate_limit;
pub mod redis_store;
pub mod resource;
pub mod retry;

pub use batch::{BatchEntityFetcher, BatchOutcome, BlockingBatchEntityFetcher};
pub use cache::{CacheKey, CacheListing, CacheMode, CachePolicy, CacheStats, CacheStore, KvStore};
pub use client::{BlockingFetchClient, FetchClient, FetchClientBuilder, SharedResources};
pub use config::ClientConfig;
pub use error::{CacheError, ConfigError, FetchError, FetchErrorKind};
pub use executor::{ApiTarget, BlockingRequestExecutor, RequestExecutor};
pub use http_client::{
    BlockingHttpClient, HttpAuth, HttpClient, HttpError, HttpErrorKind, HttpRequest, HttpResponse,
    ReqwestBlockingClient, ReqwestHttpClient,
};
pub use pagination::{
    estimate_total_pages, BlockingPaginator, CursorWalk, Discovery, FetchJob, FetchOptions, FetchOutcome,
    PageFailure, PageRequest, PageResult, ParallelPaginator,
};
pub use params::QueryParams;
pub use provider_policy::{BackoffPolicy, Provider, ProviderPolicy};
pub use rate_limit::{RateLimiter, Throttle, Unthrottled};
pub use redis_store::RedisStore;
pub use resource::{EnvelopeShape, PageEnvelope, Paging, Record, Resource};
pub use retry::{Backoff, BlockingRetryingClient, RetryConfig, RetryingClient, Verdict};
