//! Infrastructure layer: record storage, response cache, background jobs.

pub mod cache;
pub mod jobs;
pub mod records;

#[cfg(feature = "redis")]
mod redis_pool;
