//! Redis-backed cache store.
//!
//! Redis cannot delete by wildcard atomically, so bulk invalidation goes
//! through `SCAN ... MATCH ... COUNT` (see `ResponseCache::invalidate_pattern`).

use std::sync::Arc;

use tracing::instrument;

use super::store::{CacheError, CacheStore};
use crate::redis_pool::ConnectionPool;

#[derive(Debug, Clone)]
pub struct RedisCacheStore {
    pool: Arc<ConnectionPool>,
}

impl RedisCacheStore {
    /// Create a store for the given Redis URL (e.g. `redis://localhost:6379`).
    ///
    /// Connections are opened lazily and reused across commands.
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, CacheError> {
        let pool = ConnectionPool::open(redis_url.as_ref()).map_err(|e| CacheError::Connection(e.to_string()))?;
        Ok(Self { pool: Arc::new(pool) })
    }

    fn query<T: redis::FromRedisValue>(&self, command: &'static str, cmd: &redis::Cmd) -> Result<T, CacheError> {
        self.pool
            .with(|conn| cmd.query(conn))
            .map_err(|e| CacheError::Connection(e.to_string()))?
            .map_err(|e| CacheError::Command(format!("{command} failed: {e}")))
    }
}

impl CacheStore for RedisCacheStore {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.query("GET", redis::cmd("GET").arg(key))
    }

    fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), CacheError> {
        self.query("SET", redis::cmd("SET").arg(key).arg(value).arg("EX").arg(ttl_secs.max(1)))
    }

    fn delete(&self, keys: &[String]) -> Result<usize, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.query("DEL", redis::cmd("DEL").arg(keys))
    }

    #[instrument(skip(self), err)]
    fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>), CacheError> {
        self.query(
            "SCAN",
            redis::cmd("SCAN").arg(cursor).arg("MATCH").arg(pattern).arg("COUNT").arg(count.max(1)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_server_surfaces_as_connection_error() {
        let store = RedisCacheStore::new("redis://127.0.0.1:1/").unwrap();
        assert!(matches!(store.get("news:list:all"), Err(CacheError::Connection(_))));
    }
}
