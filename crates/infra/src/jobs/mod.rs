//! Background job system with retry, backoff, and retention.
//!
//! ## Design
//!
//! - Jobs live on named queues; one handler per queue
//! - Retry policy with exponential backoff (3 attempts, 1 s base)
//! - Failed jobs stay inspectable and can be re-queued
//! - Jobs left active by a dead worker are re-queued once their lease expires
//! - Finished jobs are pruned by a retention policy
//!
//! ## Components
//!
//! - `Job`: Core job abstraction with payload and metadata
//! - `JobStore`: Persistence for jobs (in-memory or Redis)
//! - `JobExecutor`: Worker threads that run jobs with retry logic
//! - `JobOutcome`: Per-attempt events for observability
//! - `email`: The email queue producer and handler

pub mod email;
pub mod executor;
pub mod outcome;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod store;
pub mod types;

pub use email::{
    email_handler, process_email_job, DeliveryError, DeliveryReport, EmailJobError, EmailMessage, EmailQueue,
    EmailTransport, LogTransport, EMAIL_QUEUE,
};
pub use executor::{ExecutorStats, JobExecutor, JobExecutorConfig, JobExecutorHandle};
pub use outcome::{spawn_outcome_logger, JobOutcome, OutcomeKind};
#[cfg(feature = "redis")]
pub use redis_store::RedisJobStore;
pub use store::{InMemoryJobStore, JobStats, JobStore, JobStoreError};
pub use types::{
    BackoffStrategy, Job, JobAttemptRecord, JobId, JobResult, JobState, JobStatus, KeepJobs, RetentionPolicy,
    RetryPolicy,
};
