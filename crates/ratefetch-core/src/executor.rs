//! Single logical upstream call: cache lookup, throttled retried transport,
//! decode, write-through.

use crate::cache::{CacheKey, CachePolicy, CacheStore};
use crate::error::FetchError;
use crate::http_client::{HttpAuth, HttpRequest};
use crate::params::QueryParams;
use crate::resource::{PageEnvelope, Record, Resource};
use crate::retry::{BlockingRetryingClient, RetryingClient};

/// Where requests go and how they are authenticated and cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiTarget {
    pub base_url: String,
    pub auth: HttpAuth,
    pub timeout_ms: u64,
    pub cache_prefix: String,
}

impl ApiTarget {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            auth: HttpAuth::None,
            timeout_ms: 30_000,
            cache_prefix: String::from("ratefetch"),
        }
    }

    pub fn with_auth(mut self, auth: HttpAuth) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_cache_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.cache_prefix = prefix.into();
        self
    }

    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn request(&self, path: &str, params: &QueryParams) -> HttpRequest {
        HttpRequest::get(self.url(path))
            .with_query(params)
            .with_header("accept", "application/json")
            .with_auth(&self.auth)
            .with_timeout_ms(self.timeout_ms)
    }

    pub fn cache_key(&self, path: &str, params: &QueryParams) -> CacheKey {
        CacheKey::new(&self.cache_prefix, path, params)
    }
}

/// Async request executor shared by every task of a fetch job.
#[derive(Clone)]
pub struct RequestExecutor {
    target: ApiTarget,
    transport: RetryingClient,
    cache: CacheStore,
}

impl RequestExecutor {
    pub fn new(target: ApiTarget, transport: RetryingClient, cache: CacheStore) -> Self {
        Self {
            target,
            transport,
            cache,
        }
    }

    pub fn target(&self) -> &ApiTarget {
        &self.target
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Raw payload of `GET {path}?{params}`.
    pub async fn execute(
        &self,
        path: &str,
        params: &QueryParams,
        policy: CachePolicy,
    ) -> Result<String, FetchError> {
        self.execute_decoded(path, params, policy, |body| Ok(body.to_owned()))
            .await
    }

    /// Like [`RequestExecutor::execute`], decoding the payload with `decode`.
    ///
    /// A payload is only written to the cache once it decodes; a cached payload
    /// that no longer decodes is treated as a miss.
    pub async fn execute_decoded<T>(
        &self,
        path: &str,
        params: &QueryParams,
        policy: CachePolicy,
        decode: impl Fn(&str) -> Result<T, FetchError>,
    ) -> Result<T, FetchError> {
        let key = self.target.cache_key(path, params);

        if policy.mode.reads() {
            if let Some(payload) = self.cache.get_async(&key).await {
                match decode(&payload) {
                    Ok(value) => {
                        tracing::debug!(path, key = key.as_str(), "cache hit");
                        return Ok(value);
                    }
                    Err(error) => {
                        tracing::warn!(path, %error, "cached payload no longer decodes; refetching");
                    }
                }
            }
        }

        let response = self
            .transport
            .send(self.target.request(path, params))
            .await?;
        let value = decode(&response.body)?;

        if policy.mode.writes() {
            self.cache.put_async(&key, &response.body, policy.ttl).await;
        }
        Ok(value)
    }

    pub async fn fetch_page(
        &self,
        resource: &Resource,
        params: &QueryParams,
        policy: CachePolicy,
    ) -> Result<PageEnvelope, FetchError> {
        self.execute_decoded(&resource.path, params, policy, |body| {
            resource.parse_page(body)
        })
        .await
    }

    pub async fn fetch_entity(
        &self,
        resource: &Resource,
        id: &str,
        policy: CachePolicy,
    ) -> Result<Option<Record>, FetchError> {
        self.execute_decoded(
            &resource.entity_path(id),
            &QueryParams::new(),
            policy,
            |body| resource.parse_entity(body),
        )
        .await
    }
}

/// Thread-blocking twin of [`RequestExecutor`].
#[derive(Clone)]
pub struct BlockingRequestExecutor {
    target: ApiTarget,
    transport: BlockingRetryingClient,
    cache: CacheStore,
}

impl BlockingRequestExecutor {
    pub fn new(target: ApiTarget, transport: BlockingRetryingClient, cache: CacheStore) -> Self {
        Self {
            target,
            transport,
            cache,
        }
    }

    pub fn target(&self) -> &ApiTarget {
        &self.target
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn execute(
        &self,
        path: &str,
        params: &QueryParams,
        policy: CachePolicy,
    ) -> Result<String, FetchError> {
        self.execute_decoded(path, params, policy, |body| Ok(body.to_owned()))
    }

    pub fn execute_decoded<T>(
        &self,
        path: &str,
        params: &QueryParams,
        policy: CachePolicy,
        decode: impl Fn(&str) -> Result<T, FetchError>,
    ) -> Result<T, FetchError> {
        let key = self.target.cache_key(path, params);

        if policy.mode.reads() {
            if let Some(payload) = self.cache.get(&key) {
                match decode(&payload) {
                    Ok(value) => {
                        tracing::debug!(path, key = key.as_str(), "cache hit");
                        return Ok(value);
                    }
                    Err(error) => {
                        tracing::warn!(path, %error, "cached payload no longer decodes; refetching");
                    }
                }
            }
        }

        let response = self.transport.send(self.target.request(path, params))?;
        let value = decode(&response.body)?;

        if policy.mode.writes() {
            self.cache.put(&key, &response.body, policy.ttl);
        }
        Ok(value)
    }

    pub fn fetch_page(
        &self,
        resource: &Resource,
        params: &QueryParams,
        policy: CachePolicy,
    ) -> Result<PageEnvelope, FetchError> {
        self.execute_decoded(&resource.path, params, policy, |body| {
            resource.parse_page(body)
        })
    }

    pub fn fetch_entity(
        &self,
        resource: &Resource,
        id: &str,
        policy: CachePolicy,
    ) -> Result<Option<Record>, FetchError> {
        self.execute_decoded(
            &resource.entity_path(id),
            &QueryParams::new(),
            policy,
            |body| resource.parse_entity(body),
        )
    }
}
