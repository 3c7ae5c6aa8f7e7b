//! Two-tier response cache.
//!
//! Reads try the external key-value store (Redis in production) first and the
//! in-process map second; writes go to both. Any external failure is logged and
//! the in-process map takes over for that call. The caller never sees a cache
//! error.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use sha2::{Digest, Sha256};
use time::Date;

use crate::error::CacheError;
use crate::params::QueryParams;

/// Defines the behavior of the cache for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Read from the cache if a non-expired entry is present;
    /// otherwise, fetch from the network and write the response to the cache.
    #[default]
    Use,
    /// Always fetch from the network, bypassing any cached entry,
    /// and write the new response to the cache.
    Refresh,
    /// Always fetch from the network and do not read from or write to the cache.
    Bypass,
}

impl CacheMode {
    pub const fn reads(self) -> bool {
        matches!(self, Self::Use)
    }

    pub const fn writes(self) -> bool {
        !matches!(self, Self::Bypass)
    }
}

/// Per-call cache behavior: mode plus an optional TTL override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CachePolicy {
    pub mode: CacheMode,
    pub ttl: Option<Duration>,
}

impl CachePolicy {
    pub const fn bypass() -> Self {
        Self {
            mode: CacheMode::Bypass,
            ttl: None,
        }
    }

    pub const fn with_ttl(ttl: Duration) -> Self {
        Self {
            mode: CacheMode::Use,
            ttl: Some(ttl),
        }
    }

    /// TTL for a reporting window ending on `until`.
    ///
    /// Windows that reach today (or later) still change and get `live_ttl`;
    /// closed historical windows get `historical_ttl`.
    pub fn for_window(
        until: Date,
        today: Date,
        live_ttl: Duration,
        historical_ttl: Duration,
    ) -> Self {
        if until >= today {
            Self::with_ttl(live_ttl)
        } else {
            Self::with_ttl(historical_ttl)
        }
    }
}

/// Deterministic cache key for `(endpoint, params)`.
///
/// Shaped `{prefix}:{endpoint}:{sha256 hex}` so that invalidating by
/// `{prefix}:{endpoint}` drops every cached variant of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(prefix: &str, endpoint: &str, params: &QueryParams) -> Self {
        let endpoint = endpoint.trim_matches('/');
        let mut hasher = Sha256::new();
        hasher.update(endpoint.as_bytes());
        hasher.update(b"?");
        hasher.update(params.to_query_string().as_bytes());
        let digest = hex::encode(hasher.finalize());
        Self(format!("{prefix}:{endpoint}:{digest}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// External TTL-capable key-value store.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;
    fn keys(&self, prefix: &str) -> Result<Vec<String>, CacheError>;
    fn del(&self, keys: &[String]) -> Result<usize, CacheError>;
}

/// Keys found under a prefix, across both tiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheListing {
    pub total_found: usize,
    /// Sorted, at most `limit` long.
    pub keys: Vec<String>,
}

/// Snapshot of both cache tiers under one prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub default_ttl_secs: u64,
    pub local_entries: usize,
    pub external_configured: bool,
    pub external_reachable: bool,
    /// `None` when no external store is configured or it could not be reached.
    pub external_entries: Option<usize>,
    /// Distinct cached entries per endpoint, both tiers combined.
    pub endpoints: BTreeMap<String, usize>,
}

/// Endpoint segment of a `{prefix}:{endpoint}:{digest}` key.
fn endpoint_of(key: &str) -> Option<&str> {
    let (head, _digest) = key.rsplit_once(':')?;
    head.split_once(':').map(|(_, endpoint)| endpoint)
}

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct LocalTier {
    map: HashMap<String, CacheEntry>,
}

impl LocalTier {
    fn get(&mut self, key: &str) -> Option<String> {
        let now = Instant::now();
        match self.map.get(key) {
            Some(entry) if now <= entry.expires_at => Some(entry.payload.clone()),
            Some(_) => {
                self.map.remove(key);
                None
            }
            None => None,
        }
    }

    fn put(&mut self, key: String, payload: String, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        self.map.insert(key, CacheEntry { payload, expires_at });
    }

    fn live_keys(&self, prefix: &str) -> Vec<String> {
        let now = Instant::now();
        self.map
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && now <= entry.expires_at)
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn remove(&mut self, key: &str) -> bool {
        self.map.remove(key).is_some()
    }

    fn clear_prefix(&mut self, prefix: &str) -> Vec<String> {
        let removed = self
            .map
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect::<Vec<_>>();
        for key in &removed {
            self.map.remove(key);
        }
        removed
    }

    fn purge_expired(&mut self) {
        let now = Instant::now();
        self.map.retain(|_, entry| entry.expires_at > now);
    }
}

/// Thread-safe read-through/write-through cache shared by every fetch job.
#[derive(Clone)]
pub struct CacheStore {
    external: Option<Arc<dyn KvStore>>,
    local: Arc<Mutex<LocalTier>>,
    default_ttl: Duration,
}

impl CacheStore {
    /// In-process only store.
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            external: None,
            local: Arc::new(Mutex::new(LocalTier::default())),
            default_ttl,
        }
    }

    /// Store backed by `external`, falling back to the in-process map.
    pub fn with_external(external: Arc<dyn KvStore>, default_ttl: Duration) -> Self {
        Self {
            external: Some(external),
            ..Self::new(default_ttl)
        }
    }

    /// Create a cache store with a default TTL of 10 minutes.
    pub fn with_default_ttl() -> Self {
        Self::new(Duration::from_secs(600))
    }

    /// Disabled cache: reads always miss, writes are dropped.
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn is_disabled(&self) -> bool {
        self.default_ttl == Duration::ZERO
    }

    pub const fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn get(&self, key: &CacheKey) -> Option<String> {
        if self.is_disabled() {
            return None;
        }

        if let Some(external) = &self.external {
            match external.get(key.as_str()) {
                Ok(Some(payload)) => return Some(payload),
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(key = key.as_str(), %error, "external cache read failed; using local tier");
                }
            }
        }

        self.lock_local().get(key.as_str())
    }

    /// Stores `payload`; `ttl` overrides the default TTL when provided.
    pub fn put(&self, key: &CacheKey, payload: &str, ttl: Option<Duration>) {
        if self.is_disabled() {
            return;
        }
        let ttl = ttl.unwrap_or(self.default_ttl);
        if ttl.is_zero() {
            return;
        }

        if let Some(external) = &self.external {
            if let Err(error) = external.set_ex(key.as_str(), payload, ttl) {
                tracing::warn!(key = key.as_str(), %error, "external cache write failed; using local tier");
            }
        }

        self.lock_local()
            .put(key.as_str().to_owned(), payload.to_owned(), ttl);
    }

    /// Removes every entry whose key starts with `prefix`, in both tiers.
    ///
    /// Returns the number of distinct keys removed; an entry held by both
    /// tiers counts once.
    pub fn clear(&self, prefix: &str) -> usize {
        let mut removed = BTreeSet::new();

        if let Some(external) = &self.external {
            let result = external.keys(prefix).and_then(|keys| {
                if !keys.is_empty() {
                    external.del(&keys)?;
                }
                Ok(keys)
            });
            match result {
                Ok(keys) => removed.extend(keys),
                Err(error) => {
                    tracing::warn!(prefix, %error, "external cache clear failed");
                }
            }
        }

        removed.extend(self.lock_local().clear_prefix(prefix));
        tracing::info!(prefix, removed = removed.len(), "cache cleared");
        removed.len()
    }

    /// Removes one entry from both tiers. Returns whether any tier held it.
    pub fn delete(&self, key: &str) -> bool {
        let mut removed = false;

        if let Some(external) = &self.external {
            match external.del(&[key.to_owned()]) {
                Ok(count) => removed |= count > 0,
                Err(error) => {
                    tracing::warn!(key, %error, "external cache delete failed");
                }
            }
        }

        removed |= self.lock_local().remove(key);
        tracing::info!(key, removed, "cache key deleted");
        removed
    }

    /// Live keys starting with `prefix` in either tier, sorted, at most `limit`.
    pub fn keys(&self, prefix: &str, limit: usize) -> CacheListing {
        let (all, _) = self.collect_keys(prefix);
        CacheListing {
            total_found: all.len(),
            keys: all.into_iter().take(limit).collect(),
        }
    }

    /// Entry counts per tier and per endpoint for keys under `prefix`.
    pub fn stats(&self, prefix: &str) -> CacheStats {
        let (all, external_entries) = self.collect_keys(prefix);
        let local_entries = self.lock_local().live_keys(prefix).len();

        let mut endpoints = BTreeMap::new();
        for key in &all {
            if let Some(endpoint) = endpoint_of(key) {
                *endpoints.entry(endpoint.to_owned()).or_insert(0) += 1;
            }
        }

        CacheStats {
            default_ttl_secs: self.default_ttl.as_secs(),
            local_entries,
            external_configured: self.external.is_some(),
            external_reachable: external_entries.is_some(),
            external_entries,
            endpoints,
        }
    }

    /// Union of both tiers' keys, plus the external count when it answered.
    fn collect_keys(&self, prefix: &str) -> (BTreeSet<String>, Option<usize>) {
        let mut all = BTreeSet::new();
        let mut external_entries = None;

        if let Some(external) = &self.external {
            match external.keys(prefix) {
                Ok(keys) => {
                    external_entries = Some(keys.len());
                    all.extend(keys);
                }
                Err(error) => {
                    tracing::warn!(prefix, %error, "external cache key scan failed");
                }
            }
        }

        all.extend(self.lock_local().live_keys(prefix));
        (all, external_entries)
    }

    /// Remove expired entries from the in-process tier.
    pub fn purge_expired(&self) {
        self.lock_local().purge_expired();
    }

    /// Number of in-process entries (including expired ones not yet purged).
    pub fn local_len(&self) -> usize {
        self.lock_local().map.len()
    }

    /// Async-friendly [`CacheStore::get`]: external I/O runs on the blocking pool.
    pub async fn get_async(&self, key: &CacheKey) -> Option<String> {
        if self.external.is_none() {
            return self.get(key);
        }
        let store = self.clone();
        let key = key.clone();
        tokio::task::spawn_blocking(move || store.get(&key))
            .await
            .unwrap_or_else(|error| {
                tracing::warn!(%error, "cache read task failed");
                None
            })
    }

    /// Async-friendly [`CacheStore::put`].
    pub async fn put_async(&self, key: &CacheKey, payload: &str, ttl: Option<Duration>) {
        if self.external.is_none() {
            self.put(key, payload, ttl);
            return;
        }
        let store = self.clone();
        let key = key.clone();
        let payload = payload.to_owned();
        if let Err(error) =
            tokio::task::spawn_blocking(move || store.put(&key, &payload, ttl)).await
        {
            tracing::warn!(%error, "cache write task failed");
        }
    }

    fn lock_local(&self) -> std::sync::MutexGuard<'_, LocalTier> {
        self.local
            .lock()
            .expect("local cache tier should not be poisoned")
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("external", &self.external.is_some())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}
