//! Core job types and policies.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use newsdesk_core::UserId;

/// Unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Job execution status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum JobStatus {
    /// Recorded, waiting to be picked up
    Waiting,
    /// Currently being executed by a worker
    Active,
    /// Last attempt failed; waiting out the backoff before the next one
    Delayed { error: String, attempt: u32 },
    /// Finished without a job-level error
    Completed,
    /// Exhausted retries or rejected outright
    Failed { error: String, attempts: u32 },
}

impl JobStatus {
    pub fn state(&self) -> JobState {
        match self {
            JobStatus::Waiting => JobState::Waiting,
            JobStatus::Active => JobState::Active,
            JobStatus::Delayed { .. } => JobState::Delayed,
            JobStatus::Completed => JobState::Completed,
            JobStatus::Failed { .. } => JobState::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed { .. })
    }
}

/// Status without payload, for filtering and counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Active,
    Delayed,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Delayed => "delayed",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^(attempt - 1)
    #[default]
    Exponential,
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of executions allowed, first attempt included
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    /// 3 attempts, exponential backoff from 1 second.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            strategy: BackoffStrategy::Exponential,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with a single attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Create a policy with fixed delays.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
        }
    }

    /// Create a policy with exponential backoff.
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let delay = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Exponential => {
                let factor = 2u32.saturating_pow(attempt - 1);
                self.base_delay.saturating_mul(factor)
            }
        };

        delay.min(self.max_delay)
    }

    /// Check if another attempt is allowed after `attempt` executions.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// How many finished jobs to keep for inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepJobs {
    /// Keep at most this many (newest first)
    pub count: usize,
    /// Drop jobs that finished longer ago than this
    pub max_age: Option<Duration>,
}

/// Retention of terminal jobs; older ones are purged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub completed: KeepJobs,
    pub failed: KeepJobs,
}

impl Default for RetentionPolicy {
    /// Completed: 100 jobs for up to a day. Failed: the last 3.
    fn default() -> Self {
        Self {
            completed: KeepJobs {
                count: 100,
                max_age: Some(Duration::from_secs(24 * 60 * 60)),
            },
            failed: KeepJobs {
                count: 3,
                max_age: None,
            },
        }
    }
}

impl RetentionPolicy {
    pub fn for_state(&self, state: JobState) -> Option<&KeepJobs> {
        match state {
            JobState::Completed => Some(&self.completed),
            JobState::Failed => Some(&self.failed),
            _ => None,
        }
    }
}

/// A background job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,
    /// Queue the job was enqueued on (selects the handler)
    pub queue: String,
    /// JSON payload, passed to the handler untouched
    pub payload: serde_json::Value,
    /// Account that enqueued the job; only it may inspect or retry it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<UserId>,
    pub status: JobStatus,
    pub retry_policy: RetryPolicy,
    /// Number of attempts started so far
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Not claimable before this instant (backoff)
    pub scheduled_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state
    pub finished_at: Option<DateTime<Utc>>,
    /// Execution history (one record per attempt)
    pub history: Vec<JobAttemptRecord>,
}

/// Record of a job execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobAttemptRecord {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl Job {
    /// Create a new waiting job.
    pub fn new(queue: impl Into<String>, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            queue: queue.into(),
            payload,
            owner: None,
            status: JobStatus::Waiting,
            retry_policy: RetryPolicy::default(),
            attempt: 0,
            created_at: now,
            updated_at: now,
            scheduled_at: None,
            finished_at: None,
            history: Vec::new(),
        }
    }

    /// Whether `user` may see this job.
    pub fn is_owned_by(&self, user: UserId) -> bool {
        self.owner == Some(user)
    }

    /// Set a custom retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Check if the job's backoff (if any) has elapsed.
    pub fn is_ready(&self) -> bool {
        self.is_ready_at(Utc::now())
    }

    pub fn is_ready_at(&self, now: DateTime<Utc>) -> bool {
        match self.scheduled_at {
            Some(at) => now >= at,
            None => true,
        }
    }

    /// Whether a worker may claim the job.
    pub fn is_claimable_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, JobStatus::Waiting | JobStatus::Delayed { .. }) && self.is_ready_at(now)
    }

    /// Mark job as running.
    pub fn mark_running(&mut self) {
        self.status = JobStatus::Active;
        self.attempt += 1;
        self.updated_at = Utc::now();
    }

    /// Mark job as completed.
    pub fn mark_completed(&mut self, started_at: DateTime<Utc>) {
        let now = Utc::now();
        self.status = JobStatus::Completed;
        self.updated_at = now;
        self.finished_at = Some(now);
        self.scheduled_at = None;
        self.record_attempt(started_at, now, None);
    }

    /// Mark the current attempt as failed; schedule a retry with backoff or
    /// fail the job once attempts are exhausted.
    pub fn mark_failed(&mut self, error: String, started_at: DateTime<Utc>) {
        let now = Utc::now();
        self.updated_at = now;
        self.record_attempt(started_at, now, Some(error.clone()));

        if self.retry_policy.should_retry(self.attempt) {
            let delay = self.retry_policy.delay_for_attempt(self.attempt);
            self.scheduled_at = Some(now + chrono::Duration::from_std(delay).unwrap_or_default());
            self.status = JobStatus::Delayed {
                error,
                attempt: self.attempt,
            };
        } else {
            self.fail(error, now);
        }
    }

    /// Fail the job without retrying (structural rejection).
    pub fn mark_discarded(&mut self, error: String, started_at: DateTime<Utc>) {
        let now = Utc::now();
        self.updated_at = now;
        self.record_attempt(started_at, now, Some(error.clone()));
        self.fail(error, now);
    }

    /// Put a failed job back on the queue with a fresh attempt budget.
    pub fn reset_for_retry(&mut self) {
        self.status = JobStatus::Waiting;
        self.attempt = 0;
        self.scheduled_at = None;
        self.finished_at = None;
        self.updated_at = Utc::now();
        self.history.clear();
    }

    fn fail(&mut self, error: String, now: DateTime<Utc>) {
        self.scheduled_at = None;
        self.finished_at = Some(now);
        self.status = JobStatus::Failed {
            error,
            attempts: self.attempt,
        };
    }

    fn record_attempt(&mut self, started_at: DateTime<Utc>, finished_at: DateTime<Utc>, error: Option<String>) {
        self.history.push(JobAttemptRecord {
            attempt: self.attempt,
            started_at,
            finished_at,
            success: error.is_none(),
            error,
            duration_ms: (finished_at - started_at).num_milliseconds().max(0) as u64,
        });
    }
}

/// Result of job execution, as reported by a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    /// Job completed
    Success,
    /// Job-level failure; retried with backoff while attempts remain
    Failure(String),
    /// Structurally invalid job; failed immediately, never retried
    Discard(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_three_attempts_doubling_from_one_second() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let policy = RetryPolicy::exponential(10, Duration::from_millis(100), Duration::from_millis(500));

        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(500));
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(500));

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(500));
    }

    #[test]
    fn should_retry_respects_max_attempts() {
        let policy = RetryPolicy::default();

        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!RetryPolicy::no_retry().should_retry(1));
    }

    #[test]
    fn job_lifecycle() {
        let mut job = Job::new("email_queue", serde_json::json!([]));

        assert_eq!(job.status, JobStatus::Waiting);
        assert_eq!(job.attempt, 0);

        job.mark_running();
        assert_eq!(job.status, JobStatus::Active);
        assert_eq!(job.attempt, 1);

        job.mark_completed(Utc::now());
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.finished_at.is_some());
        assert_eq!(job.history.len(), 1);
        assert!(job.history[0].success);
    }

    #[test]
    fn failures_delay_with_backoff_then_fail() {
        let mut job = Job::new("email_queue", serde_json::json!([]));
        let mut delays = Vec::new();

        for _ in 0..2 {
            job.mark_running();
            let started = Utc::now();
            job.mark_failed("smtp down".to_string(), started);
            assert_eq!(job.status.state(), JobState::Delayed);
            let at = job.scheduled_at.unwrap();
            delays.push((at - job.updated_at).num_seconds());
            assert!(!job.is_ready());
        }
        assert_eq!(delays, vec![1, 2]);

        job.mark_running();
        job.mark_failed("smtp down".to_string(), Utc::now());

        assert_eq!(
            job.status,
            JobStatus::Failed {
                error: "smtp down".to_string(),
                attempts: 3
            }
        );
        assert!(job.scheduled_at.is_none());
        assert_eq!(job.history.len(), 3);
    }

    #[test]
    fn discard_fails_without_retry() {
        let mut job = Job::new("email_queue", serde_json::json!({"not": "a list"}));
        job.mark_running();
        job.mark_discarded("payload is not a list".to_string(), Utc::now());

        assert_eq!(job.status.state(), JobState::Failed);
        assert_eq!(job.attempt, 1);
    }

    #[test]
    fn reset_for_retry_restores_attempt_budget() {
        let mut job = Job::new("email_queue", serde_json::json!([]));
        job.mark_running();
        job.mark_discarded("boom".to_string(), Utc::now());

        job.reset_for_retry();

        assert_eq!(job.status, JobStatus::Waiting);
        assert_eq!(job.attempt, 0);
        assert!(job.history.is_empty());
        assert!(job.is_claimable_at(Utc::now()));
    }
}
