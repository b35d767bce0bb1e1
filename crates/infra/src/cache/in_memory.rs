//! In-memory cache store for tests/dev.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};

use newsdesk_core::{Clock, SystemClock};

use super::pattern::glob_match;
use super::store::{CacheError, CacheStore, SCAN_START};

/// TTLs beyond ten years are clamped.
const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// In-memory cache with TTLs evaluated on an injected clock.
///
/// Scan cursors are insertion sequence numbers rather than positions, so a
/// delete issued between two `scan` calls never shifts a key past the cursor.
pub struct InMemoryCacheStore {
    inner: Mutex<Entries>,
    clock: Arc<dyn Clock>,
}

#[derive(Default)]
struct Entries {
    by_key: HashMap<String, Entry>,
    /// seq -> key, in insertion order.
    order: BTreeMap<u64, String>,
    next_seq: u64,
}

struct Entry {
    value: String,
    expires_at: DateTime<Utc>,
    seq: u64,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Entries {
                next_seq: 1,
                ..Default::default()
            }),
            clock,
        }
    }

    /// Number of live (unexpired) keys.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.lock()
            .map(|e| e.by_key.values().filter(|entry| entry.expires_at > now).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, Entries>, CacheError> {
        self.inner
            .lock()
            .map_err(|_| CacheError::Connection("cache lock poisoned".to_string()))
    }
}

impl Default for InMemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCacheStore").finish_non_exhaustive()
    }
}

impl Entries {
    fn remove(&mut self, key: &str) -> bool {
        match self.by_key.remove(key) {
            Some(entry) => {
                self.order.remove(&entry.seq);
                true
            }
            None => false,
        }
    }

    fn is_live(&self, key: &str, now: DateTime<Utc>) -> bool {
        self.by_key.get(key).is_some_and(|e| e.expires_at > now)
    }
}

impl CacheStore for InMemoryCacheStore {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = self.clock.now();
        let mut entries = self.lock()?;

        if !entries.is_live(key, now) {
            entries.remove(key);
            return Ok(None);
        }

        Ok(entries.by_key.get(key).map(|e| e.value.clone()))
    }

    fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), CacheError> {
        let expires_at = self.clock.now() + Duration::seconds(ttl_secs.min(MAX_TTL_SECS) as i64);
        let mut entries = self.lock()?;

        match entries.by_key.get_mut(key) {
            Some(entry) => {
                entry.value = value.to_string();
                entry.expires_at = expires_at;
            }
            None => {
                let seq = entries.next_seq;
                entries.next_seq += 1;
                entries.order.insert(seq, key.to_string());
                entries.by_key.insert(
                    key.to_string(),
                    Entry {
                        value: value.to_string(),
                        expires_at,
                        seq,
                    },
                );
            }
        }

        Ok(())
    }

    fn delete(&self, keys: &[String]) -> Result<usize, CacheError> {
        let mut entries = self.lock()?;
        Ok(keys.iter().filter(|k| entries.remove(k)).count())
    }

    fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>), CacheError> {
        let now = self.clock.now();
        let mut entries = self.lock()?;

        let examined: Vec<(u64, String)> = entries
            .order
            .range(cursor..)
            .take(count.max(1))
            .map(|(seq, key)| (*seq, key.clone()))
            .collect();

        let mut matched = Vec::new();
        for (_, key) in &examined {
            if !entries.is_live(key, now) {
                entries.remove(key);
            } else if glob_match(pattern, key) {
                matched.push(key.clone());
            }
        }

        let next = match examined.last() {
            Some((last_seq, _)) if entries.order.range(last_seq + 1..).next().is_some() => last_seq + 1,
            _ => SCAN_START,
        };

        Ok((next, matched))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use newsdesk_core::ManualClock;

    fn store() -> (InMemoryCacheStore, ManualClock) {
        let clock = ManualClock::starting_now();
        (InMemoryCacheStore::with_clock(Arc::new(clock.clone())), clock)
    }

    #[test]
    fn set_then_get_returns_value_until_ttl_elapses() {
        let (cache, clock) = store();
        cache.set("news:item:1", "{\"id\":1}", 300).unwrap();

        assert_eq!(cache.get("news:item:1").unwrap().as_deref(), Some("{\"id\":1}"));

        clock.advance(Duration::seconds(299));
        assert!(cache.get("news:item:1").unwrap().is_some());

        clock.advance(Duration::seconds(1));
        assert!(cache.get("news:item:1").unwrap().is_none());
    }

    #[test]
    fn missing_key_is_a_miss_not_an_error() {
        let (cache, _) = store();
        assert!(cache.get("nope").unwrap().is_none());
        assert_eq!(cache.delete(&["nope".to_string()]).unwrap(), 0);
    }

    #[test]
    fn overwrite_is_last_writer_wins_and_refreshes_ttl() {
        let (cache, clock) = store();
        cache.set("k", "v1", 10).unwrap();
        clock.advance(Duration::seconds(8));
        cache.set("k", "v2", 10).unwrap();
        clock.advance(Duration::seconds(8));

        assert_eq!(cache.get("k").unwrap().as_deref(), Some("v2"));
    }

    #[test]
    fn scan_walks_all_keys_in_batches() {
        let (cache, _) = store();
        for i in 0..25 {
            cache.set(&format!("news:list:page:{i}:limit:10"), "[]", 60).unwrap();
            cache.set(&format!("users:item:{i}"), "{}", 60).unwrap();
        }

        let mut cursor = SCAN_START;
        let mut found = Vec::new();
        let mut rounds = 0;
        loop {
            let (next, keys) = cache.scan(cursor, "news:list:*", 7).unwrap();
            found.extend(keys);
            rounds += 1;
            cursor = next;
            if cursor == SCAN_START {
                break;
            }
        }

        assert_eq!(found.len(), 25);
        assert!(rounds > 1);
    }

    #[test]
    fn deleting_between_scan_calls_does_not_skip_keys() {
        let (cache, _) = store();
        for i in 0..10 {
            cache.set(&format!("k:{i}"), "v", 60).unwrap();
        }

        let (cursor, first) = cache.scan(SCAN_START, "k:*", 3).unwrap();
        cache.delete(&first).unwrap();
        let (_, second) = cache.scan(cursor, "k:*", 3).unwrap();

        assert_eq!(second, vec!["k:3", "k:4", "k:5"]);
    }

    #[test]
    fn scan_drops_expired_keys() {
        let (cache, clock) = store();
        cache.set("short", "v", 1).unwrap();
        cache.set("long", "v", 100).unwrap();
        clock.advance(Duration::seconds(5));

        let (next, keys) = cache.scan(SCAN_START, "*", 10).unwrap();
        assert_eq!(next, SCAN_START);
        assert_eq!(keys, vec!["long"]);
        assert_eq!(cache.len(), 1);
    }
}
