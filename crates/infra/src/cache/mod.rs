//! Response cache: key-value store with TTL plus pattern invalidation.
//!
//! ## Components
//!
//! - `CacheStore`: get/set/delete/scan contract (in-memory or Redis)
//! - `ResponseCache`: cache-aside read path and post-write invalidation
//! - `keys`: deterministic key and pattern builders
//! - `glob_match`: Redis `MATCH` semantics for the in-memory store

pub mod aside;
pub mod in_memory;
pub mod keys;
pub mod pattern;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod store;

pub use aside::{CachedJson, ResponseCache, DEFAULT_SCAN_BATCH, DEFAULT_TTL_SECS};
pub use in_memory::InMemoryCacheStore;
pub use pattern::glob_match;
#[cfg(feature = "redis")]
pub use redis_store::RedisCacheStore;
pub use store::{CacheError, CacheStore, SCAN_START};
