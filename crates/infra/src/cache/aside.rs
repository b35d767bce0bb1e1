//! Cache-aside wrapper used by request handlers.
//!
//! ## Read path
//! Compute the deterministic key, `get`; on a hit return the stored payload
//! verbatim. On a miss load from the record store, `set` with the fixed TTL
//! and return the fresh payload. A failing cache is treated as a miss.
//!
//! ## Write path
//! Mutate the record store first; only after it succeeds invalidate the item
//! key and the list pattern. Invalidating before the write would let a reader
//! repopulate the cache with pre-write data in the gap.
//!
//! ## Consistency bound
//! Pattern invalidation is a cursor-driven scan, not an atomic delete. A key
//! set for an already-visited cursor position while the scan is running
//! survives the pass and is only removed by its TTL.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use super::store::{CacheError, CacheStore, SCAN_START};

/// Default TTL for cached responses.
pub const DEFAULT_TTL_SECS: u64 = 300;

/// Default number of keys examined per `SCAN` round.
pub const DEFAULT_SCAN_BATCH: usize = 100;

/// A serialized response payload, and whether it came from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedJson {
    pub body: String,
    pub hit: bool,
}

#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    ttl_secs: u64,
    scan_batch: usize,
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("ttl_secs", &self.ttl_secs)
            .field("scan_batch", &self.scan_batch)
            .finish_non_exhaustive()
    }
}

impl ResponseCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            ttl_secs: DEFAULT_TTL_SECS,
            scan_batch: DEFAULT_SCAN_BATCH,
        }
    }

    pub fn with_ttl_secs(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    pub fn with_scan_batch(mut self, scan_batch: usize) -> Self {
        self.scan_batch = scan_batch.max(1);
        self
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    /// Point lookup. Store failures degrade to a miss.
    pub fn get(&self, key: &str) -> Option<String> {
        match self.store.get(key) {
            Ok(hit) => hit,
            Err(e) => {
                warn!(key, error = %e, "cache read failed; treating as miss");
                None
            }
        }
    }

    /// Store a payload with the configured TTL. Failures are logged only.
    pub fn put(&self, key: &str, body: &str) {
        if let Err(e) = self.store.set(key, body, self.ttl_secs) {
            warn!(key, error = %e, "cache write failed");
        }
    }

    /// Cache-aside read: return the cached payload or load, store and return it.
    pub fn get_or_load<E>(
        &self,
        key: &str,
        load: impl FnOnce() -> Result<JsonValue, E>,
    ) -> Result<CachedJson, E> {
        if let Some(body) = self.get(key) {
            debug!(key, "cache hit");
            return Ok(CachedJson { body, hit: true });
        }

        debug!(key, "cache miss");
        let body = load()?.to_string();
        self.put(key, &body);
        Ok(CachedJson { body, hit: false })
    }

    /// Delete one key; a no-op if absent.
    pub fn invalidate(&self, key: &str) -> Result<(), CacheError> {
        self.store.delete(&[key.to_string()]).map(|_| ())
    }

    /// Delete every key matching `pattern`, one scan batch at a time, until
    /// the cursor returns to its start. Returns how many keys were removed.
    pub fn invalidate_pattern(&self, pattern: &str) -> Result<usize, CacheError> {
        let mut cursor = SCAN_START;
        let mut removed = 0;

        loop {
            let (next, keys) = self.store.scan(cursor, pattern, self.scan_batch)?;
            if !keys.is_empty() {
                removed += self.store.delete(&keys)?;
            }
            cursor = next;
            if cursor == SCAN_START {
                break;
            }
        }

        debug!(pattern, removed, "cache pattern invalidated");
        Ok(removed)
    }

    /// Post-write invalidation: the exact item key (if the write targeted one
    /// record), then every key matching `pattern`.
    ///
    /// Call only after the record-store mutation has succeeded. Failures are
    /// logged; entries that survive expire through their TTL.
    pub fn invalidate_after_write(&self, item_key: Option<&str>, pattern: &str) {
        if let Some(key) = item_key {
            if let Err(e) = self.invalidate(key) {
                warn!(key, error = %e, "cache item invalidation failed");
            }
        }
        if let Err(e) = self.invalidate_pattern(pattern) {
            warn!(pattern, error = %e, "cache pattern invalidation failed");
        }
    }
}
