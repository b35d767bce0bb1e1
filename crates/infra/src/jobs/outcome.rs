//! Job outcome events and their consumer.
//!
//! Workers publish one [`JobOutcome`] per attempt. The receiving side is
//! observability only; dropping it does not affect job processing.

use std::io;
use std::sync::mpsc::Receiver;
use std::thread;

use serde::Serialize;
use tracing::{error, info, warn};

use super::types::{Job, JobId, JobStatus};

/// What happened to a job at the end of one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum OutcomeKind {
    Completed,
    /// Attempt failed; another one is scheduled
    Retrying { error: String, retry_in_ms: u64 },
    /// No attempts left, or the job was rejected outright
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub queue: String,
    pub attempt: u32,
    pub kind: OutcomeKind,
}

impl JobOutcome {
    /// Describe the job's state right after an attempt was recorded.
    pub fn from_job(job: &Job) -> Self {
        let kind = match &job.status {
            JobStatus::Delayed { error, .. } => OutcomeKind::Retrying {
                error: error.clone(),
                retry_in_ms: job
                    .scheduled_at
                    .map(|at| (at - job.updated_at).num_milliseconds().max(0) as u64)
                    .unwrap_or(0),
            },
            JobStatus::Failed { error, .. } => OutcomeKind::Failed { error: error.clone() },
            _ => OutcomeKind::Completed,
        };

        Self {
            job_id: job.id,
            queue: job.queue.clone(),
            attempt: job.attempt,
            kind,
        }
    }

    /// Whether the job will not run again on its own.
    pub fn is_final(&self) -> bool {
        !matches!(self.kind, OutcomeKind::Retrying { .. })
    }
}

/// Log every outcome from `outcomes` on a dedicated thread until the
/// sending side is gone.
pub fn spawn_outcome_logger(outcomes: Receiver<JobOutcome>) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("job-outcomes".to_string())
        .spawn(move || {
            for outcome in outcomes {
                log_outcome(&outcome);
            }
        })
}

fn log_outcome(outcome: &JobOutcome) {
    match &outcome.kind {
        OutcomeKind::Completed => info!(
            job_id = %outcome.job_id,
            queue = %outcome.queue,
            attempt = outcome.attempt,
            "job completed"
        ),
        OutcomeKind::Retrying { error, retry_in_ms } => warn!(
            job_id = %outcome.job_id,
            queue = %outcome.queue,
            attempt = outcome.attempt,
            retry_in_ms,
            error = %error,
            "job attempt failed; retrying"
        ),
        OutcomeKind::Failed { error } => error!(
            job_id = %outcome.job_id,
            queue = %outcome.queue,
            attempt = outcome.attempt,
            error = %error,
            "job failed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::mpsc;

    #[test]
    fn outcome_reflects_job_state() {
        let mut job = Job::new("email_queue", serde_json::json!([]));
        job.mark_running();
        job.mark_failed("smtp down".to_string(), Utc::now());

        let outcome = JobOutcome::from_job(&job);
        assert_eq!(outcome.attempt, 1);
        assert!(!outcome.is_final());
        assert!(matches!(
            outcome.kind,
            OutcomeKind::Retrying { retry_in_ms: 1000, .. }
        ));

        job.mark_running();
        job.mark_discarded("bad".to_string(), Utc::now());
        let outcome = JobOutcome::from_job(&job);
        assert!(outcome.is_final());
        assert_eq!(outcome.kind, OutcomeKind::Failed { error: "bad".to_string() });
    }

    #[test]
    fn logger_exits_when_senders_drop() {
        let (tx, rx) = mpsc::sync_channel(4);
        let handle = spawn_outcome_logger(rx).unwrap();

        let job = Job::new("email_queue", serde_json::json!([]));
        tx.send(JobOutcome::from_job(&job)).unwrap();
        drop(tx);

        handle.join().unwrap();
    }
}
