//! Consumer-facing fetch clients.
//!
//! Callers hand over a [`Resource`] and normalized filter parameters and get a
//! flat record list back; pages, retries, throttling and caching stay inside.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::batch::{BatchEntityFetcher, BatchOutcome, BlockingBatchEntityFetcher};
use crate::cache::CacheStore;
use crate::config::ClientConfig;
use crate::error::{ConfigError, FetchError};
use crate::executor::{BlockingRequestExecutor, RequestExecutor};
use crate::http_client::{BlockingHttpClient, HttpClient, ReqwestBlockingClient, ReqwestHttpClient};
use crate::pagination::{BlockingPaginator, FetchOptions, FetchOutcome, ParallelPaginator};
use crate::params::QueryParams;
use crate::rate_limit::{RateLimiter, Throttle};
use crate::redis_store::RedisStore;
use crate::resource::Resource;
use crate::retry::{BlockingRetryingClient, RetryConfig, RetryingClient};

/// The limiter and cache of one upstream.
///
/// Build it once and hand clones to every client that talks to that upstream,
/// blocking and async alike; clones share state.
#[derive(Clone)]
pub struct SharedResources {
    pub throttle: Arc<dyn Throttle>,
    pub cache: CacheStore,
}

impl SharedResources {
    pub fn new(throttle: Arc<dyn Throttle>, cache: CacheStore) -> Self {
        Self { throttle, cache }
    }

    /// Limiter at `max_rps`; Redis-backed cache when `redis_url` is set and
    /// parses, in-process cache otherwise.
    pub fn from_config(config: &ClientConfig) -> Self {
        let throttle: Arc<dyn Throttle> = Arc::new(RateLimiter::per_second(config.max_rps));
        let ttl = config.cache_ttl();

        let cache = match config.redis_url.as_deref() {
            _ if ttl.is_zero() => CacheStore::disabled(),
            Some(url) => match RedisStore::open(url, Duration::from_millis(config.timeout_ms)) {
                Ok(store) => CacheStore::with_external(Arc::new(store), ttl),
                Err(error) => {
                    tracing::warn!(%error, "redis cache unavailable; using in-process cache");
                    CacheStore::new(ttl)
                }
            },
            None => CacheStore::new(ttl),
        };

        Self { throttle, cache }
    }
}

impl std::fmt::Debug for SharedResources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedResources")
            .field("granted", &self.throttle.granted())
            .field("cache", &self.cache)
            .finish()
    }
}

/// Assembles [`FetchClient`] and [`BlockingFetchClient`] from a config,
/// with every collaborator replaceable.
pub struct FetchClientBuilder {
    config: ClientConfig,
    shared: Option<SharedResources>,
    http_client: Option<Arc<dyn HttpClient>>,
    blocking_http_client: Option<Arc<dyn BlockingHttpClient>>,
    retry: Option<RetryConfig>,
}

impl FetchClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            shared: None,
            http_client: None,
            blocking_http_client: None,
            retry: None,
        }
    }

    pub fn with_shared(mut self, shared: SharedResources) -> Self {
        self.shared = Some(shared);
        self
    }

    pub fn with_http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn with_blocking_http_client(mut self, client: Arc<dyn BlockingHttpClient>) -> Self {
        self.blocking_http_client = Some(client);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    fn parts(&self) -> Result<(SharedResources, RetryConfig, FetchOptions), ConfigError> {
        self.config.validate()?;
        let shared = self
            .shared
            .clone()
            .unwrap_or_else(|| SharedResources::from_config(&self.config));
        let retry = self
            .retry
            .clone()
            .unwrap_or_else(|| self.config.retry_config());
        Ok((shared, retry, self.config.fetch_options()))
    }

    pub fn build(self) -> Result<FetchClient, ConfigError> {
        let (shared, retry, options) = self.parts()?;
        let http_client = self
            .http_client
            .unwrap_or_else(|| Arc::new(ReqwestHttpClient::new()));

        let executor = RequestExecutor::new(
            self.config.api_target(),
            RetryingClient::new(http_client, Arc::clone(&shared.throttle), retry),
            shared.cache.clone(),
        );
        Ok(FetchClient {
            executor: Arc::new(executor),
            options,
            shared,
        })
    }

    /// Builds the thread-pool client. With the default transport this must run
    /// outside a tokio runtime.
    pub fn build_blocking(self) -> Result<BlockingFetchClient, ConfigError> {
        let (shared, retry, options) = self.parts()?;
        let http_client = self
            .blocking_http_client
            .unwrap_or_else(|| Arc::new(ReqwestBlockingClient::new()));

        let executor = BlockingRequestExecutor::new(
            self.config.api_target(),
            BlockingRetryingClient::new(http_client, Arc::clone(&shared.throttle), retry),
            shared.cache.clone(),
        );
        Ok(BlockingFetchClient {
            executor: Arc::new(executor),
            options,
            shared,
        })
    }
}

/// Async client: pages fan out as tokio tasks.
#[derive(Clone)]
pub struct FetchClient {
    executor: Arc<RequestExecutor>,
    options: FetchOptions,
    shared: SharedResources,
}

impl FetchClient {
    pub fn builder(config: ClientConfig) -> FetchClientBuilder {
        FetchClientBuilder::new(config)
    }

    pub fn from_config(config: ClientConfig) -> Result<Self, ConfigError> {
        FetchClientBuilder::new(config).build()
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    pub fn shared(&self) -> &SharedResources {
        &self.shared
    }

    pub fn with_options(mut self, options: FetchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn paginator(&self) -> ParallelPaginator {
        ParallelPaginator::new(Arc::clone(&self.executor), self.options)
    }

    pub async fn fetch_all(
        &self,
        resource: &Resource,
        params: &QueryParams,
    ) -> Result<FetchOutcome, FetchError> {
        self.paginator().fetch_all(resource, params).await
    }

    /// Like [`FetchClient::fetch_all`], abandoning pages still outstanding after `budget`.
    pub async fn fetch_all_within(
        &self,
        resource: &Resource,
        params: &QueryParams,
        budget: Duration,
    ) -> Result<FetchOutcome, FetchError> {
        self.paginator()
            .fetch_all_within(resource, params, Instant::now() + budget)
            .await
    }

    pub async fn fetch_by_ids<I, S>(&self, resource: &Resource, ids: I) -> BatchOutcome
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        BatchEntityFetcher::new(Arc::clone(&self.executor), self.options)
            .fetch_by_ids(resource, ids)
            .await
    }
}

/// Thread-pool client: pages fan out over scoped OS threads.
#[derive(Clone)]
pub struct BlockingFetchClient {
    executor: Arc<BlockingRequestExecutor>,
    options: FetchOptions,
    shared: SharedResources,
}

impl BlockingFetchClient {
    pub fn from_config(config: ClientConfig) -> Result<Self, ConfigError> {
        FetchClientBuilder::new(config).build_blocking()
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    pub fn shared(&self) -> &SharedResources {
        &self.shared
    }

    pub fn with_options(mut self, options: FetchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn fetch_all(
        &self,
        resource: &Resource,
        params: &QueryParams,
    ) -> Result<FetchOutcome, FetchError> {
        BlockingPaginator::new(Arc::clone(&self.executor), self.options).fetch_all(resource, params)
    }

    pub fn fetch_by_ids<I, S>(&self, resource: &Resource, ids: I) -> BatchOutcome
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        BlockingBatchEntityFetcher::new(Arc::clone(&self.executor), self.options)
            .fetch_by_ids(resource, ids)
    }
}
