//! Reusable Redis connections for the synchronous stores.
//!
//! Idle connections are kept on a free list and handed out one caller at a
//! time. A connection that reports itself closed after use is dropped, so
//! the next checkout reconnects.

use std::sync::Mutex;

use redis::ConnectionLike;

/// Idle connections kept per pool.
const DEFAULT_MAX_IDLE: usize = 8;

pub(crate) struct ConnectionPool {
    client: redis::Client,
    idle: Mutex<Vec<redis::Connection>>,
    max_idle: usize,
}

impl ConnectionPool {
    pub(crate) fn open(redis_url: &str) -> redis::RedisResult<Self> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
            idle: Mutex::new(Vec::new()),
            max_idle: DEFAULT_MAX_IDLE,
        })
    }

    /// Run `f` on an idle connection, or a new one when none is idle.
    /// The connection goes back on the free list afterwards if still open.
    pub(crate) fn with<T>(&self, f: impl FnOnce(&mut redis::Connection) -> T) -> redis::RedisResult<T> {
        let reused = self.idle.lock().ok().and_then(|mut idle| idle.pop());
        let mut conn = match reused {
            Some(conn) => conn,
            None => self.client.get_connection()?,
        };
        let out = f(&mut conn);
        self.put_back(conn);
        Ok(out)
    }

    fn put_back(&self, conn: redis::Connection) {
        if !conn.is_open() {
            return;
        }
        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < self.max_idle {
                idle.push(conn);
            }
        }
    }

    fn idle_count(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("addr", &self.client.get_connection_info().addr)
            .field("idle", &self.idle_count())
            .field("max_idle", &self.max_idle)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_server_is_a_checkout_error_and_nothing_is_pooled() {
        let pool = ConnectionPool::open("redis://127.0.0.1:1/").unwrap();
        let ran = pool.with(|_| true);
        assert!(ran.is_err());
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn malformed_url_is_rejected_up_front() {
        assert!(ConnectionPool::open("not a url").is_err());
    }
}
