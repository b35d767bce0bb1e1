//! Job executor with retry and backoff logic.

use std::collections::HashMap;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::outcome::JobOutcome;
use super::store::{JobStore, JobStoreError};
use super::types::{Job, JobResult, JobStatus, RetentionPolicy};

/// Job handler function type.
pub type JobHandler = Box<dyn Fn(&Job) -> JobResult + Send + Sync>;

/// Outcome events buffered before new ones are dropped.
const OUTCOME_BUFFER: usize = 1024;

/// Job executor configuration.
#[derive(Debug, Clone)]
pub struct JobExecutorConfig {
    /// How often to poll for new jobs
    pub poll_interval: Duration,
    /// Worker threads; each runs at most one job at a time
    pub concurrency: usize,
    /// Name for logging (and thread name prefix)
    pub name: String,
    /// Retention applied after every terminal transition
    pub retention: RetentionPolicy,
    /// A job active longer than this is treated as abandoned by its worker
    pub stalled_after: Duration,
    /// How often the first worker sweeps for stalled jobs
    pub stall_check_interval: Duration,
}

impl Default for JobExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            concurrency: 1,
            name: "job-executor".to_string(),
            retention: RetentionPolicy::default(),
            stalled_after: Duration::from_secs(5 * 60),
            stall_check_interval: Duration::from_secs(30),
        }
    }
}

impl JobExecutorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_concurrency(mut self, workers: usize) -> Self {
        self.concurrency = workers.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_stall_detection(mut self, stalled_after: Duration, check_interval: Duration) -> Self {
        self.stalled_after = stalled_after;
        self.stall_check_interval = check_interval;
        self
    }
}

/// Handle to control a running executor.
#[derive(Debug)]
pub struct JobExecutorHandle {
    shutdown: Arc<AtomicBool>,
    workers: Vec<thread::JoinHandle<()>>,
    stats: Arc<Mutex<ExecutorStats>>,
    outcomes: Option<Receiver<JobOutcome>>,
    started: Instant,
}

impl JobExecutorHandle {
    /// Request graceful shutdown and wait for in-flight jobs to finish.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }

    /// Get current executor statistics.
    pub fn stats(&self) -> ExecutorStats {
        let mut stats = self
            .stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone());
        stats.uptime_secs = self.started.elapsed().as_secs();
        stats
    }

    /// Take the receiving end of the outcome channel. Returns None after the
    /// first call.
    pub fn take_outcomes(&mut self) -> Option<Receiver<JobOutcome>> {
        self.outcomes.take()
    }
}

/// Executor runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ExecutorStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_retried: u64,
    pub jobs_failed: u64,
    pub current_running: usize,
    pub uptime_secs: u64,
}

/// Background job executor.
///
/// Polls a job store for ready jobs on the queues it has handlers for,
/// executes them, and handles retries and retention.
pub struct JobExecutor<S: JobStore> {
    store: S,
    handlers: HashMap<String, JobHandler>,
    retention: RetentionPolicy,
}

impl<S: JobStore + 'static> JobExecutor<S> {
    /// Create a new executor with the given store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            handlers: HashMap::new(),
            retention: RetentionPolicy::default(),
        }
    }

    /// Register the handler for a queue.
    pub fn register_handler<F>(&mut self, queue: impl Into<String>, handler: F)
    where
        F: Fn(&Job) -> JobResult + Send + Sync + 'static,
    {
        self.handlers.insert(queue.into(), Box::new(handler));
    }

    fn queues(&self) -> Vec<String> {
        let mut queues: Vec<_> = self.handlers.keys().cloned().collect();
        queues.sort();
        queues
    }

    /// Spawn `config.concurrency` worker threads.
    pub fn spawn(mut self, config: JobExecutorConfig) -> io::Result<JobExecutorHandle>
    where
        S: Send,
    {
        self.retention = config.retention;
        let shutdown = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(Mutex::new(ExecutorStats::default()));
        let (outcome_tx, outcome_rx) = mpsc::sync_channel(OUTCOME_BUFFER);
        let executor = Arc::new(self);

        let mut workers = Vec::with_capacity(config.concurrency.max(1));
        for n in 0..config.concurrency.max(1) {
            let worker = Worker {
                name: format!("{}-{}", config.name, n),
                executor: executor.clone(),
                poll_interval: config.poll_interval,
                stall_sweep: (n == 0).then_some(StallSweep {
                    stalled_after: config.stalled_after,
                    every: config.stall_check_interval,
                }),
                shutdown: shutdown.clone(),
                stats: stats.clone(),
                outcomes: outcome_tx.clone(),
            };
            let spawned = thread::Builder::new()
                .name(worker.name.clone())
                .spawn(move || worker.run());

            match spawned {
                Ok(join) => workers.push(join),
                Err(e) => {
                    shutdown.store(true, Ordering::SeqCst);
                    for join in workers {
                        let _ = join.join();
                    }
                    return Err(e);
                }
            }
        }

        info!(executor = %config.name, workers = workers.len(), queues = ?executor.queues(), "job executor started");

        Ok(JobExecutorHandle {
            shutdown,
            workers,
            stats,
            outcomes: Some(outcome_rx),
            started: Instant::now(),
        })
    }

    /// Execute a claimed job (for testing or synchronous use) and persist
    /// the resulting state.
    pub fn execute_one(&self, job: &mut Job) -> Result<JobOutcome, JobStoreError> {
        let started = Utc::now();

        let result = match self.handlers.get(&job.queue) {
            Some(handler) => {
                let snapshot: &Job = job;
                panic::catch_unwind(AssertUnwindSafe(|| handler(snapshot))).unwrap_or_else(|payload| {
                    let message = panic_message(payload.as_ref());
                    error!(job_id = %job.id, queue = %job.queue, panic = %message, "job handler panicked");
                    JobResult::Failure(format!("handler panicked: {message}"))
                })
            }
            None => {
                warn!(job_id = %job.id, queue = %job.queue, "no handler for queue");
                JobResult::Discard(format!("no handler for queue: {}", job.queue))
            }
        };

        match result {
            JobResult::Success => job.mark_completed(started),
            JobResult::Failure(error) => job.mark_failed(error, started),
            JobResult::Discard(error) => job.mark_discarded(error, started),
        }
        self.store.update(job)?;

        if job.status.is_terminal() {
            match self.store.prune(&job.queue, &self.retention) {
                Ok(0) => {}
                Ok(removed) => debug!(queue = %job.queue, removed, "pruned finished jobs"),
                Err(e) => warn!(queue = %job.queue, error = %e, "failed to prune finished jobs"),
            }
        }

        Ok(JobOutcome::from_job(job))
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

struct StallSweep {
    stalled_after: Duration,
    every: Duration,
}

struct Worker<S: JobStore> {
    name: String,
    executor: Arc<JobExecutor<S>>,
    poll_interval: Duration,
    stall_sweep: Option<StallSweep>,
    shutdown: Arc<AtomicBool>,
    stats: Arc<Mutex<ExecutorStats>>,
    outcomes: SyncSender<JobOutcome>,
}

impl<S: JobStore + 'static> Worker<S> {
    fn run(self) {
        debug!(worker = %self.name, "worker started");
        let queues = self.executor.queues();
        let mut last_sweep: Option<Instant> = None;

        while !self.shutdown.load(Ordering::SeqCst) {
            if let Some(sweep) = &self.stall_sweep {
                if last_sweep.is_none_or(|at| at.elapsed() >= sweep.every) {
                    self.requeue_stalled(&queues, sweep.stalled_after);
                    last_sweep = Some(Instant::now());
                }
            }

            let mut worked = false;

            for queue in &queues {
                match self.executor.store.claim_next(queue) {
                    Ok(Some(mut job)) => {
                        worked = true;
                        self.process(&mut job);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!(worker = %self.name, queue = %queue, error = %e, "failed to claim job");
                    }
                }
            }

            if !worked {
                thread::sleep(self.poll_interval);
            }
        }

        debug!(worker = %self.name, "worker stopped");
    }

    fn requeue_stalled(&self, queues: &[String], stalled_after: Duration) {
        for queue in queues {
            match self.executor.store.requeue_stalled(queue, stalled_after) {
                Ok(0) => {}
                Ok(recovered) => warn!(worker = %self.name, queue = %queue, recovered, "requeued stalled jobs"),
                Err(e) => error!(worker = %self.name, queue = %queue, error = %e, "failed to sweep stalled jobs"),
            }
        }
    }

    fn process(&self, job: &mut Job) {
        debug!(worker = %self.name, job_id = %job.id, queue = %job.queue, attempt = job.attempt, "claimed job");
        self.update_stats(|s| s.current_running += 1);

        let outcome = self.executor.execute_one(job);

        self.update_stats(|s| {
            s.current_running = s.current_running.saturating_sub(1);
            s.jobs_processed += 1;
            match job.status {
                JobStatus::Completed => s.jobs_succeeded += 1,
                JobStatus::Delayed { .. } => s.jobs_retried += 1,
                _ => s.jobs_failed += 1,
            }
        });

        match outcome {
            Ok(outcome) => self.publish(outcome),
            Err(e) => error!(worker = %self.name, job_id = %job.id, error = %e, "failed to persist job state"),
        }
    }

    fn publish(&self, outcome: JobOutcome) {
        match self.outcomes.try_send(outcome) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(outcome)) => {
                warn!(worker = %self.name, job_id = %outcome.job_id, "outcome buffer full; dropping event");
            }
        }
    }

    fn update_stats(&self, f: impl FnOnce(&mut ExecutorStats)) {
        let mut stats = self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut *stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::outcome::OutcomeKind;
    use crate::jobs::store::InMemoryJobStore;
    use crate::jobs::types::{JobState, RetryPolicy};
    use std::sync::atomic::AtomicUsize;

    fn quick_retries(attempts: u32) -> RetryPolicy {
        RetryPolicy::fixed(attempts, Duration::ZERO)
    }

    #[test]
    fn execute_successful_job() {
        let store = Arc::new(InMemoryJobStore::new());
        let mut executor = JobExecutor::new(store.clone());

        executor.register_handler("test", |_job| JobResult::Success);

        store.enqueue(Job::new("test", serde_json::json!({}))).unwrap();

        let mut claimed = store.claim_next("test").unwrap().unwrap();
        let outcome = executor.execute_one(&mut claimed).unwrap();

        assert_eq!(outcome.kind, OutcomeKind::Completed);
        assert_eq!(claimed.status, JobStatus::Completed);
        assert_eq!(store.stats("test").unwrap().completed, 1);
    }

    #[test]
    fn execute_failing_job_with_retry() {
        let store = Arc::new(InMemoryJobStore::new());
        let mut executor = JobExecutor::new(store.clone());

        executor.register_handler("test", |_job| JobResult::Failure("test error".to_string()));

        store
            .enqueue(Job::new("test", serde_json::json!({})).with_retry_policy(quick_retries(2)))
            .unwrap();

        // First attempt
        let mut claimed = store.claim_next("test").unwrap().unwrap();
        let outcome = executor.execute_one(&mut claimed).unwrap();
        assert!(!outcome.is_final());
        assert_eq!(claimed.status.state(), JobState::Delayed);

        // Second attempt
        let mut claimed = store.claim_next("test").unwrap().unwrap();
        let outcome = executor.execute_one(&mut claimed).unwrap();
        assert!(outcome.is_final());
        assert_eq!(
            claimed.status,
            JobStatus::Failed {
                error: "test error".to_string(),
                attempts: 2
            }
        );
    }

    #[test]
    fn discard_skips_remaining_attempts() {
        let store = Arc::new(InMemoryJobStore::new());
        let mut executor = JobExecutor::new(store.clone());
        executor.register_handler("test", |_job| JobResult::Discard("malformed".to_string()));

        store.enqueue(Job::new("test", serde_json::json!({}))).unwrap();
        let mut claimed = store.claim_next("test").unwrap().unwrap();
        executor.execute_one(&mut claimed).unwrap();

        assert_eq!(claimed.status.state(), JobState::Failed);
        assert_eq!(claimed.attempt, 1);
        assert!(store.claim_next("test").unwrap().is_none());
    }

    #[test]
    fn missing_handler_fails_job() {
        let store = Arc::new(InMemoryJobStore::new());
        let executor = JobExecutor::new(store.clone());

        store.enqueue(Job::new("orphan", serde_json::json!({}))).unwrap();
        let mut claimed = store.claim_next("orphan").unwrap().unwrap();
        executor.execute_one(&mut claimed).unwrap();

        assert_eq!(claimed.status.state(), JobState::Failed);
    }

    #[test]
    fn spawned_workers_drain_queue_and_report_outcomes() {
        let store = Arc::new(InMemoryJobStore::new());
        let mut executor = JobExecutor::new(store.clone());
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        executor.register_handler("test", move |_job| {
            counter.fetch_add(1, Ordering::SeqCst);
            JobResult::Success
        });

        for i in 0..6 {
            store.enqueue(Job::new("test", serde_json::json!({"i": i}))).unwrap();
        }

        let config = JobExecutorConfig::default()
            .with_name("test-executor")
            .with_concurrency(3)
            .with_poll_interval(Duration::from_millis(5));
        let mut handle = executor.spawn(config).unwrap();
        let outcomes = handle.take_outcomes().unwrap();
        assert!(handle.take_outcomes().is_none());

        let mut received = Vec::new();
        while received.len() < 6 {
            received.push(outcomes.recv_timeout(Duration::from_secs(5)).unwrap());
        }
        let stats = handle.stats();
        handle.shutdown();

        assert_eq!(runs.load(Ordering::SeqCst), 6);
        assert!(received.iter().all(|o| o.kind == OutcomeKind::Completed));
        assert_eq!(stats.jobs_succeeded, 6);
        assert_eq!(store.stats("test").unwrap().completed, 6);
    }

    #[test]
    fn transient_failure_is_retried_until_success() {
        let store = Arc::new(InMemoryJobStore::new());
        let mut executor = JobExecutor::new(store.clone());
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        executor.register_handler("test", move |_job| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                JobResult::Failure("transport unavailable".to_string())
            } else {
                JobResult::Success
            }
        });

        let id = store
            .enqueue(Job::new("test", serde_json::json!([])).with_retry_policy(quick_retries(3)))
            .unwrap();

        let config = JobExecutorConfig::default().with_poll_interval(Duration::from_millis(5));
        let mut handle = executor.spawn(config).unwrap();
        let outcomes = handle.take_outcomes().unwrap();

        let first = outcomes.recv_timeout(Duration::from_secs(5)).unwrap();
        let second = outcomes.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.shutdown();

        assert!(matches!(first.kind, OutcomeKind::Retrying { .. }));
        assert_eq!(second.kind, OutcomeKind::Completed);
        assert_eq!(second.attempt, 2);
        assert_eq!(store.get("test", id).unwrap().unwrap().history.len(), 2);
    }

    #[test]
    fn terminal_jobs_are_pruned_by_retention() {
        let store = Arc::new(InMemoryJobStore::new());
        let mut executor = JobExecutor::new(store.clone());
        executor.register_handler("test", |_job| JobResult::Discard("bad".to_string()));

        for _ in 0..5 {
            store.enqueue(Job::new("test", serde_json::json!({}))).unwrap();
            let mut claimed = store.claim_next("test").unwrap().unwrap();
            executor.execute_one(&mut claimed).unwrap();
        }

        // Default retention keeps the last 3 failed jobs.
        assert_eq!(store.stats("test").unwrap().failed, 3);
    }

    #[test]
    fn panicking_handler_is_recorded_as_a_failed_attempt() {
        let store = Arc::new(InMemoryJobStore::new());
        let mut executor = JobExecutor::new(store.clone());
        executor.register_handler("test", |_job| panic!("smtp client bug"));

        let id = store
            .enqueue(Job::new("test", serde_json::json!({})).with_retry_policy(quick_retries(2)))
            .unwrap();

        let mut claimed = store.claim_next("test").unwrap().unwrap();
        let outcome = executor.execute_one(&mut claimed).unwrap();
        assert!(!outcome.is_final());
        assert_eq!(store.get("test", id).unwrap().unwrap().status.state(), JobState::Delayed);

        let mut claimed = store.claim_next("test").unwrap().unwrap();
        executor.execute_one(&mut claimed).unwrap();
        assert_eq!(
            claimed.status,
            JobStatus::Failed {
                error: "handler panicked: smtp client bug".to_string(),
                attempts: 2
            }
        );
    }

    #[test]
    fn worker_survives_a_panicking_handler() {
        let store = Arc::new(InMemoryJobStore::new());
        let mut executor = JobExecutor::new(store.clone());
        executor.register_handler("test", |job| {
            if job.payload["explode"].as_bool().unwrap_or(false) {
                panic!("boom");
            }
            JobResult::Success
        });

        let bad = store
            .enqueue(Job::new("test", serde_json::json!({"explode": true})).with_retry_policy(quick_retries(1)))
            .unwrap();
        let good = store.enqueue(Job::new("test", serde_json::json!({}))).unwrap();

        let config = JobExecutorConfig::default().with_poll_interval(Duration::from_millis(5));
        let mut handle = executor.spawn(config).unwrap();
        let outcomes = handle.take_outcomes().unwrap();
        let received: Vec<_> = (0..2)
            .map(|_| outcomes.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        handle.shutdown();

        assert!(received.iter().any(|o| o.job_id == bad && matches!(o.kind, OutcomeKind::Failed { .. })));
        assert!(received.iter().any(|o| o.job_id == good && o.kind == OutcomeKind::Completed));
        assert_eq!(store.get("test", bad).unwrap().unwrap().status.state(), JobState::Failed);
        assert_eq!(store.get("test", good).unwrap().unwrap().status.state(), JobState::Completed);
    }

    #[test]
    fn abandoned_active_job_is_picked_up_again() {
        let store = Arc::new(InMemoryJobStore::new());
        let id = store
            .enqueue(Job::new("test", serde_json::json!({})).with_retry_policy(quick_retries(3)))
            .unwrap();
        // Claimed by a worker that never reports back.
        store.claim_next("test").unwrap().unwrap();

        let mut executor = JobExecutor::new(store.clone());
        executor.register_handler("test", |_job| JobResult::Success);
        let config = JobExecutorConfig::default()
            .with_poll_interval(Duration::from_millis(5))
            .with_stall_detection(Duration::ZERO, Duration::from_millis(5));
        let mut handle = executor.spawn(config).unwrap();
        let outcomes = handle.take_outcomes().unwrap();

        let outcome = outcomes.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.shutdown();

        assert_eq!(outcome.job_id, id);
        assert_eq!(outcome.kind, OutcomeKind::Completed);
        assert_eq!(outcome.attempt, 2);
        let job = store.get("test", id).unwrap().unwrap();
        assert_eq!(job.history[0].error.as_deref(), Some(crate::jobs::store::STALLED_ERROR));
    }
}
