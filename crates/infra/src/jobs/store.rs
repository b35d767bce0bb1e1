//! Job storage implementations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::types::{Job, JobId, JobState, KeepJobs, RetentionPolicy};

/// Job store abstraction.
///
/// Every operation is scoped to a named queue; a job is only visible through
/// the queue it was enqueued on.
pub trait JobStore: Send + Sync {
    /// Enqueue a new job.
    fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError>;

    /// Get a job by ID.
    fn get(&self, queue: &str, job_id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Persist a job's current state.
    fn update(&self, job: &Job) -> Result<(), JobStoreError>;

    /// Claim the oldest claimable job on `queue` and mark it active.
    /// Returns None if no jobs are ready. A job is handed to one caller only.
    fn claim_next(&self, queue: &str) -> Result<Option<Job>, JobStoreError>;

    /// Return jobs claimed longer than `lease` ago to the queue, as a failed
    /// attempt (retried with backoff, or failed once attempts run out).
    /// Returns how many were recovered.
    fn requeue_stalled(&self, queue: &str, lease: Duration) -> Result<usize, JobStoreError>;

    /// List jobs, optionally filtered by state, oldest first.
    fn list_by_status(
        &self,
        queue: &str,
        state: Option<JobState>,
        limit: usize,
    ) -> Result<Vec<Job>, JobStoreError>;

    /// Move a failed job back to waiting with a fresh attempt budget.
    fn retry_failed(&self, queue: &str, job_id: JobId) -> Result<Job, JobStoreError>;

    /// Drop terminal jobs outside the retention policy. Returns how many were removed.
    fn prune(&self, queue: &str, retention: &RetentionPolicy) -> Result<usize, JobStoreError>;

    /// Get job counts per state.
    fn stats(&self, queue: &str) -> Result<JobStats, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("job {id} is {state}, expected {expected}")]
    InvalidState {
        id: JobId,
        state: &'static str,
        expected: &'static str,
    },
    #[error("storage error: {0}")]
    Storage(String),
}

/// Job statistics for one queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobStats {
    pub waiting: usize,
    pub active: usize,
    pub delayed: usize,
    pub completed: usize,
    pub failed: usize,
}

impl JobStats {
    pub(crate) fn count(&mut self, state: JobState) {
        match state {
            JobState::Waiting => self.waiting += 1,
            JobState::Active => self.active += 1,
            JobState::Delayed => self.delayed += 1,
            JobState::Completed => self.completed += 1,
            JobState::Failed => self.failed += 1,
        }
    }
}

/// Error recorded against an attempt whose worker never reported back.
pub(crate) const STALLED_ERROR: &str = "job stalled: worker lease expired";

/// Claims made at or before the returned instant have outlived `lease`.
pub(crate) fn lease_cutoff(now: DateTime<Utc>, lease: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(lease).ok().and_then(|lease| now.checked_sub_signed(lease))
}

/// Ids of terminal jobs that fall outside `keep`, given `(id, finished_at)`
/// pairs for one state.
pub(crate) fn expired_ids(
    mut finished: Vec<(JobId, DateTime<Utc>)>,
    keep: &KeepJobs,
    now: DateTime<Utc>,
) -> Vec<JobId> {
    finished.sort_by(|a, b| b.1.cmp(&a.1));

    let cutoff = keep
        .max_age
        .and_then(|age| chrono::Duration::from_std(age).ok())
        .map(|age| now - age);

    finished
        .into_iter()
        .enumerate()
        .filter(|(rank, (_, at))| *rank >= keep.count || cutoff.is_some_and(|c| *at < c))
        .map(|(_, (id, _))| id)
        .collect()
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<JobId, Job>>, JobStoreError> {
        self.jobs
            .read()
            .map_err(|_| JobStoreError::Storage("job store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<JobId, Job>>, JobStoreError> {
        self.jobs
            .write()
            .map_err(|_| JobStoreError::Storage("job store lock poisoned".to_string()))
    }
}

impl JobStore for InMemoryJobStore {
    fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError> {
        let mut jobs = self.write()?;
        if jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    fn get(&self, queue: &str, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        let jobs = self.read()?;
        Ok(jobs.get(&job_id).filter(|j| j.queue == queue).cloned())
    }

    fn update(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut jobs = self.write()?;
        match jobs.get_mut(&job.id) {
            Some(existing) => {
                *existing = job.clone();
                Ok(())
            }
            None => Err(JobStoreError::NotFound(job.id)),
        }
    }

    fn claim_next(&self, queue: &str) -> Result<Option<Job>, JobStoreError> {
        let mut jobs = self.write()?;
        let now = Utc::now();

        // Oldest ready job first (FIFO)
        let next = jobs
            .values()
            .filter(|j| j.queue == queue && j.is_claimable_at(now))
            .min_by_key(|j| (j.scheduled_at.unwrap_or(j.created_at), j.created_at))
            .map(|j| j.id);

        Ok(next.and_then(|id| jobs.get_mut(&id)).map(|job| {
            job.mark_running();
            job.clone()
        }))
    }

    fn requeue_stalled(&self, queue: &str, lease: Duration) -> Result<usize, JobStoreError> {
        let mut jobs = self.write()?;
        let Some(cutoff) = lease_cutoff(Utc::now(), lease) else {
            return Ok(0);
        };
        let mut recovered = 0;

        for job in jobs.values_mut() {
            if job.queue == queue && job.status.state() == JobState::Active && job.updated_at <= cutoff {
                let claimed_at = job.updated_at;
                job.mark_failed(STALLED_ERROR.to_string(), claimed_at);
                recovered += 1;
            }
        }

        Ok(recovered)
    }

    fn list_by_status(
        &self,
        queue: &str,
        state: Option<JobState>,
        limit: usize,
    ) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self.read()?;
        let mut result: Vec<_> = jobs
            .values()
            .filter(|j| j.queue == queue && state.is_none_or(|s| j.status.state() == s))
            .cloned()
            .collect();

        result.sort_by_key(|j| j.created_at);
        result.truncate(limit);
        Ok(result)
    }

    fn retry_failed(&self, queue: &str, job_id: JobId) -> Result<Job, JobStoreError> {
        let mut jobs = self.write()?;
        let job = jobs
            .get_mut(&job_id)
            .filter(|j| j.queue == queue)
            .ok_or(JobStoreError::NotFound(job_id))?;

        let state = job.status.state();
        if state != JobState::Failed {
            return Err(JobStoreError::InvalidState {
                id: job_id,
                state: state.as_str(),
                expected: JobState::Failed.as_str(),
            });
        }

        job.reset_for_retry();
        Ok(job.clone())
    }

    fn prune(&self, queue: &str, retention: &RetentionPolicy) -> Result<usize, JobStoreError> {
        let mut jobs = self.write()?;
        let now = Utc::now();
        let mut removed = 0;

        for state in [JobState::Completed, JobState::Failed] {
            let Some(keep) = retention.for_state(state) else {
                continue;
            };
            let finished: Vec<_> = jobs
                .values()
                .filter(|j| j.queue == queue && j.status.state() == state)
                .map(|j| (j.id, j.finished_at.unwrap_or(j.updated_at)))
                .collect();

            for id in expired_ids(finished, keep, now) {
                if jobs.remove(&id).is_some() {
                    removed += 1;
                }
            }
        }

        Ok(removed)
    }

    fn stats(&self, queue: &str) -> Result<JobStats, JobStoreError> {
        let jobs = self.read()?;
        let mut stats = JobStats::default();
        for job in jobs.values().filter(|j| j.queue == queue) {
            stats.count(job.status.state());
        }
        Ok(stats)
    }
}

impl<T: JobStore + ?Sized> JobStore for Arc<T> {
    fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError> {
        (**self).enqueue(job)
    }

    fn get(&self, queue: &str, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        (**self).get(queue, job_id)
    }

    fn update(&self, job: &Job) -> Result<(), JobStoreError> {
        (**self).update(job)
    }

    fn claim_next(&self, queue: &str) -> Result<Option<Job>, JobStoreError> {
        (**self).claim_next(queue)
    }

    fn requeue_stalled(&self, queue: &str, lease: Duration) -> Result<usize, JobStoreError> {
        (**self).requeue_stalled(queue, lease)
    }

    fn list_by_status(
        &self,
        queue: &str,
        state: Option<JobState>,
        limit: usize,
    ) -> Result<Vec<Job>, JobStoreError> {
        (**self).list_by_status(queue, state, limit)
    }

    fn retry_failed(&self, queue: &str, job_id: JobId) -> Result<Job, JobStoreError> {
        (**self).retry_failed(queue, job_id)
    }

    fn prune(&self, queue: &str, retention: &RetentionPolicy) -> Result<usize, JobStoreError> {
        (**self).prune(queue, retention)
    }

    fn stats(&self, queue: &str) -> Result<JobStats, JobStoreError> {
        (**self).stats(queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::{JobStatus, RetryPolicy};

    fn job(queue: &str) -> Job {
        Job::new(queue, serde_json::json!([]))
    }

    #[test]
    fn enqueue_and_claim() {
        let store = InMemoryJobStore::new();

        let job_id = store.enqueue(job("email_queue")).unwrap();

        let claimed = store.claim_next("email_queue").unwrap().unwrap();
        assert_eq!(claimed.id, job_id);
        assert_eq!(claimed.status, JobStatus::Active);
        assert_eq!(claimed.attempt, 1);

        // No more jobs
        assert!(store.claim_next("email_queue").unwrap().is_none());
    }

    #[test]
    fn queues_are_isolated() {
        let store = InMemoryJobStore::new();
        let job_id = store.enqueue(job("email_queue")).unwrap();

        assert!(store.get("other", job_id).unwrap().is_none());
        assert!(store.claim_next("other").unwrap().is_none());
        assert!(store.get("email_queue", job_id).unwrap().is_some());
    }

    #[test]
    fn enqueue_twice_is_rejected() {
        let store = InMemoryJobStore::new();
        let j = job("q");
        store.enqueue(j.clone()).unwrap();
        assert!(matches!(store.enqueue(j), Err(JobStoreError::AlreadyExists(_))));
    }

    #[test]
    fn delayed_job_is_not_claimed_before_backoff() {
        let store = InMemoryJobStore::new();
        store.enqueue(job("q")).unwrap();

        let mut claimed = store.claim_next("q").unwrap().unwrap();
        claimed.mark_failed("transient".to_string(), Utc::now());
        store.update(&claimed).unwrap();

        assert_eq!(store.stats("q").unwrap().delayed, 1);
        assert!(store.claim_next("q").unwrap().is_none());
    }

    #[test]
    fn elapsed_backoff_makes_job_claimable_again() {
        let store = InMemoryJobStore::new();
        store
            .enqueue(job("q").with_retry_policy(RetryPolicy::fixed(3, Duration::ZERO)))
            .unwrap();

        let mut claimed = store.claim_next("q").unwrap().unwrap();
        claimed.mark_failed("transient".to_string(), Utc::now());
        store.update(&claimed).unwrap();

        let again = store.claim_next("q").unwrap().unwrap();
        assert_eq!(again.id, claimed.id);
        assert_eq!(again.attempt, 2);
    }

    #[test]
    fn retry_failed_flow() {
        let store = InMemoryJobStore::new();
        let job_id = store.enqueue(job("q")).unwrap();

        assert!(matches!(
            store.retry_failed("q", job_id),
            Err(JobStoreError::InvalidState { .. })
        ));

        let mut claimed = store.claim_next("q").unwrap().unwrap();
        claimed.mark_discarded("bad payload".to_string(), Utc::now());
        store.update(&claimed).unwrap();

        let retried = store.retry_failed("q", job_id).unwrap();
        assert_eq!(retried.status, JobStatus::Waiting);
        assert_eq!(store.stats("q").unwrap().waiting, 1);

        assert!(matches!(
            store.retry_failed("q", JobId::new()),
            Err(JobStoreError::NotFound(_))
        ));
    }

    #[test]
    fn stats_tracking() {
        let store = InMemoryJobStore::new();

        for i in 0..5 {
            store.enqueue(Job::new("q", serde_json::json!({"i": i}))).unwrap();
        }

        let stats = store.stats("q").unwrap();
        assert_eq!(stats.waiting, 5);

        store.claim_next("q").unwrap();
        store.claim_next("q").unwrap();

        let stats = store.stats("q").unwrap();
        assert_eq!(stats.waiting, 3);
        assert_eq!(stats.active, 2);
    }

    #[test]
    fn prune_keeps_newest_terminal_jobs() {
        let store = InMemoryJobStore::new();
        let retention = RetentionPolicy {
            completed: KeepJobs {
                count: 2,
                max_age: None,
            },
            failed: KeepJobs {
                count: 1,
                max_age: None,
            },
        };

        for _ in 0..4 {
            store.enqueue(job("q")).unwrap();
            let mut j = store.claim_next("q").unwrap().unwrap();
            j.mark_completed(Utc::now());
            store.update(&j).unwrap();
        }
        for _ in 0..3 {
            store.enqueue(job("q")).unwrap();
            let mut j = store.claim_next("q").unwrap().unwrap();
            j.mark_discarded("nope".to_string(), Utc::now());
            store.update(&j).unwrap();
        }
        store.enqueue(job("q")).unwrap();

        assert_eq!(store.prune("q", &retention).unwrap(), 4);

        let stats = store.stats("q").unwrap();
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.waiting, 1);
    }

    #[test]
    fn expired_ids_applies_count_and_age() {
        let now = Utc::now();
        let a = JobId::new();
        let b = JobId::new();
        let c = JobId::new();
        let finished = vec![
            (a, now - chrono::Duration::hours(30)),
            (b, now - chrono::Duration::minutes(5)),
            (c, now),
        ];

        let keep = KeepJobs {
            count: 10,
            max_age: Some(Duration::from_secs(24 * 60 * 60)),
        };
        assert_eq!(expired_ids(finished.clone(), &keep, now), vec![a]);

        let keep = KeepJobs {
            count: 1,
            max_age: None,
        };
        assert_eq!(expired_ids(finished, &keep, now), vec![b, a]);
    }

    #[test]
    fn stalled_active_job_returns_to_the_queue() {
        let store = InMemoryJobStore::new();
        let id = store
            .enqueue(job("q").with_retry_policy(RetryPolicy::fixed(3, Duration::ZERO)))
            .unwrap();
        store.claim_next("q").unwrap().unwrap();

        assert_eq!(store.requeue_stalled("q", Duration::from_secs(300)).unwrap(), 0);
        assert_eq!(store.stats("q").unwrap().active, 1);

        assert_eq!(store.requeue_stalled("q", Duration::ZERO).unwrap(), 1);
        let stalled = store.get("q", id).unwrap().unwrap();
        assert_eq!(stalled.status.state(), JobState::Delayed);
        assert_eq!(stalled.history[0].error.as_deref(), Some(STALLED_ERROR));

        let again = store.claim_next("q").unwrap().unwrap();
        assert_eq!(again.id, id);
        assert_eq!(again.attempt, 2);
    }

    #[test]
    fn stalled_job_without_attempts_left_fails() {
        let store = InMemoryJobStore::new();
        let id = store.enqueue(job("q").with_retry_policy(RetryPolicy::no_retry())).unwrap();
        store.claim_next("q").unwrap().unwrap();

        assert_eq!(store.requeue_stalled("other", Duration::ZERO).unwrap(), 0);
        assert_eq!(store.requeue_stalled("q", Duration::ZERO).unwrap(), 1);

        let failed = store.get("q", id).unwrap().unwrap();
        assert_eq!(failed.status.state(), JobState::Failed);
        assert!(store.claim_next("q").unwrap().is_none());
    }
}
