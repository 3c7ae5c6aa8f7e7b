//! Redis implementation of the external cache tier.

use std::sync::Mutex;
use std::time::Duration;

use redis::{Commands, Connection};

use crate::cache::KvStore;
use crate::error::CacheError;

/// Redis-backed [`KvStore`] over a single lazily (re)opened connection.
///
/// A failed command drops the connection so the next call reconnects; every
/// socket operation is bounded by `timeout`.
pub struct RedisStore {
    client: redis::Client,
    connection: Mutex<Option<Connection>>,
    timeout: Duration,
}

impl RedisStore {
    /// Parses `url` without connecting.
    pub fn open(url: &str, timeout: Duration) -> Result<Self, CacheError> {
        Ok(Self {
            client: redis::Client::open(url)?,
            connection: Mutex::new(None),
            timeout,
        })
    }

    fn with_connection<T>(
        &self,
        command: impl FnOnce(&mut Connection) -> redis::RedisResult<T>,
    ) -> Result<T, CacheError> {
        let mut slot = self.connection.lock().map_err(|_| CacheError::Poisoned)?;

        let connection = match slot.take() {
            Some(connection) => connection,
            None => self.connect()?,
        };
        let connection = slot.insert(connection);

        match command(connection) {
            Ok(value) => Ok(value),
            Err(error) => {
                *slot = None;
                Err(error.into())
            }
        }
    }

    fn connect(&self) -> Result<Connection, CacheError> {
        let connection = self.client.get_connection_with_timeout(self.timeout)?;
        connection.set_read_timeout(Some(self.timeout))?;
        connection.set_write_timeout(Some(self.timeout))?;
        Ok(connection)
    }
}

impl KvStore for RedisStore {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.with_connection(|connection| connection.get(key))
    }

    fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let seconds = ttl.as_secs().max(1);
        self.with_connection(|connection| connection.set_ex(key, value, seconds))
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        let pattern = format!("{prefix}*");
        self.with_connection(|connection| connection.keys(pattern))
    }

    fn del(&self, keys: &[String]) -> Result<usize, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.with_connection(|connection| connection.del(keys))
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheKey, CacheStore};
    use crate::params::QueryParams;
    use std::sync::Arc;

    #[test]
    fn rejects_malformed_url() {
        assert!(RedisStore::open("not a url", Duration::from_millis(100)).is_err());
    }

    #[test]
    fn unreachable_server_degrades_to_local_tier() {
        // Port 1 on localhost refuses connections.
        let store = RedisStore::open("redis://127.0.0.1:1/", Duration::from_millis(200))
            .expect("url parses");
        let cache = CacheStore::with_external(Arc::new(store), Duration::from_secs(60));
        let key = CacheKey::new("crm", "leads", &QueryParams::new());

        cache.put(&key, "[]", None);

        assert_eq!(cache.get(&key).as_deref(), Some("[]"));
    }
}
