//! Cache store contract.

use std::sync::Arc;

/// Cursor value that starts a scan and signals its completion.
pub const SCAN_START: u64 = 0;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("cache connection error: {0}")]
    Connection(String),

    #[error("cache command error: {0}")]
    Command(String),
}

/// Key-value store with TTL and cursor-based key scanning.
///
/// Absence is a miss (`Ok(None)`), never an error.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Unconditional overwrite with an expiry; last writer wins.
    fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), CacheError>;

    /// Delete the given keys. Missing keys are ignored. Returns how many
    /// keys were removed.
    fn delete(&self, keys: &[String]) -> Result<usize, CacheError>;

    /// Examine roughly `count` keys starting at `cursor` and return the ones
    /// matching `pattern`, plus the cursor to continue from. A returned cursor
    /// of [`SCAN_START`] means the iteration is complete.
    fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>), CacheError>;
}

impl<S: CacheStore + ?Sized> CacheStore for Arc<S> {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), CacheError> {
        (**self).set(key, value, ttl_secs)
    }

    fn delete(&self, keys: &[String]) -> Result<usize, CacheError> {
        (**self).delete(keys)
    }

    fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>), CacheError> {
        (**self).scan(cursor, pattern, count)
    }
}
