//! Redis-backed job store.
//!
//! ## Layout (per queue)
//!
//! - `{prefix}:{queue}:job:{id}`: job JSON
//! - `{prefix}:{queue}:pending`: ZSET of waiting/delayed ids scored by ready time (ms)
//! - `{prefix}:{queue}:active`: ZSET of claimed ids scored by claim time (ms)
//! - `{prefix}:{queue}:completed` / `:failed`: ZSETs scored by finish time (ms)
//!
//! A claim moves the oldest ready id from `pending` to `active` in one Lua
//! script, so an id is always in exactly one index and concurrent workers
//! never run the same attempt twice. Ids left in `active` by a dead worker
//! are recovered by [`JobStore::requeue_stalled`].

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{instrument, warn};

use super::store::{expired_ids, lease_cutoff, JobStats, JobStore, JobStoreError, STALLED_ERROR};
use super::types::{Job, JobId, JobState, RetentionPolicy};
use crate::redis_pool::ConnectionPool;

/// Default key prefix.
const DEFAULT_PREFIX: &str = "newsdesk:jobs";

/// Ids tried per `claim_next` call before giving up on broken entries.
const CLAIM_BATCH: usize = 16;

/// KEYS: pending, active. ARGV: now (ms). Returns the claimed id or nil.
static CLAIM_SCRIPT: LazyLock<redis::Script> = LazyLock::new(|| {
    redis::Script::new(
        r"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 1)
if #ids == 0 then
  return false
end
redis.call('ZREM', KEYS[1], ids[1])
redis.call('ZADD', KEYS[2], ARGV[1], ids[1])
return ids[1]
",
    )
});

#[derive(Debug, Clone)]
pub struct RedisJobStore {
    pool: Arc<ConnectionPool>,
    prefix: String,
}

impl RedisJobStore {
    /// Create a store for the given Redis URL (e.g. `redis://localhost:6379`).
    pub fn new(redis_url: impl AsRef<str>, prefix: Option<String>) -> Result<Self, JobStoreError> {
        let pool = ConnectionPool::open(redis_url.as_ref())
            .map_err(|e| JobStoreError::Storage(format!("redis connection error: {e}")))?;
        Ok(Self {
            pool: Arc::new(pool),
            prefix: prefix.unwrap_or_else(|| DEFAULT_PREFIX.to_string()),
        })
    }

    fn run<T>(&self, f: impl FnOnce(&mut redis::Connection) -> Result<T, JobStoreError>) -> Result<T, JobStoreError> {
        self.pool
            .with(f)
            .map_err(|e| JobStoreError::Storage(format!("redis connection error: {e}")))?
    }

    fn job_key(&self, queue: &str, id: JobId) -> String {
        format!("{}:{}:job:{}", self.prefix, queue, id)
    }

    fn index_key(&self, queue: &str, index: &str) -> String {
        format!("{}:{}:{}", self.prefix, queue, index)
    }

    fn load(&self, conn: &mut redis::Connection, queue: &str, id: JobId) -> Result<Option<Job>, JobStoreError> {
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.job_key(queue, id))
            .query(conn)
            .map_err(command_error("GET"))?;
        raw.map(|json| decode(&json)).transpose()
    }

    fn load_many(&self, conn: &mut redis::Connection, queue: &str, ids: &[String]) -> Result<Vec<Job>, JobStoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = ids
            .iter()
            .map(|id| format!("{}:{}:job:{}", self.prefix, queue, id))
            .collect();
        let raw: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query(conn)
            .map_err(command_error("MGET"))?;
        raw.into_iter().flatten().map(|json| decode(&json)).collect()
    }

    /// Write the job and move its id into the index matching its status.
    fn save(&self, conn: &mut redis::Connection, job: &Job) -> Result<(), JobStoreError> {
        let json = serde_json::to_string(job)
            .map_err(|e| JobStoreError::Storage(format!("serialization error: {e}")))?;
        let id = job.id.to_string();
        let pending = self.index_key(&job.queue, "pending");
        let active = self.index_key(&job.queue, "active");
        let completed = self.index_key(&job.queue, "completed");
        let failed = self.index_key(&job.queue, "failed");

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("SET").arg(self.job_key(&job.queue, job.id)).arg(json).ignore()
            .cmd("ZREM").arg(&pending).arg(&id).ignore()
            .cmd("ZREM").arg(&active).arg(&id).ignore()
            .cmd("ZREM").arg(&completed).arg(&id).ignore()
            .cmd("ZREM").arg(&failed).arg(&id).ignore();

        match job.status.state() {
            JobState::Waiting | JobState::Delayed => {
                let ready = job.scheduled_at.unwrap_or(job.created_at);
                pipe.cmd("ZADD").arg(&pending).arg(millis(ready)).arg(&id).ignore();
            }
            JobState::Active => {
                pipe.cmd("ZADD").arg(&active).arg(millis(job.updated_at)).arg(&id).ignore();
            }
            JobState::Completed => {
                pipe.cmd("ZADD").arg(&completed).arg(millis(finished(job))).arg(&id).ignore();
            }
            JobState::Failed => {
                pipe.cmd("ZADD").arg(&failed).arg(millis(finished(job))).arg(&id).ignore();
            }
        }

        pipe.query::<()>(conn).map_err(command_error("MULTI"))
    }

    fn index_members(&self, conn: &mut redis::Connection, queue: &str, state: JobState) -> Result<Vec<String>, JobStoreError> {
        match state {
            JobState::Active => self.zset_members(conn, queue, "active"),
            JobState::Waiting | JobState::Delayed => self.zset_members(conn, queue, "pending"),
            JobState::Completed => self.zset_members(conn, queue, "completed"),
            JobState::Failed => self.zset_members(conn, queue, "failed"),
        }
    }

    fn zset_members(&self, conn: &mut redis::Connection, queue: &str, index: &str) -> Result<Vec<String>, JobStoreError> {
        redis::cmd("ZRANGE")
            .arg(self.index_key(queue, index))
            .arg(0)
            .arg(-1)
            .query(conn)
            .map_err(command_error("ZRANGE"))
    }

    /// Put a claimed id back on `pending`, ready now.
    fn unclaim(&self, conn: &mut redis::Connection, queue: &str, id: &str) {
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("ZREM").arg(self.index_key(queue, "active")).arg(id).ignore()
            .cmd("ZADD").arg(self.index_key(queue, "pending")).arg(millis(Utc::now())).arg(id).ignore();
        if let Err(e) = pipe.query::<()>(conn) {
            warn!(queue, id, error = %e, "failed to return claimed job to pending; left for the stalled sweep");
        }
    }

    fn claim_in(&self, conn: &mut redis::Connection, queue: &str) -> Result<Option<Job>, JobStoreError> {
        let pending = self.index_key(queue, "pending");
        let active = self.index_key(queue, "active");

        for _ in 0..CLAIM_BATCH {
            let claimed: Option<String> = CLAIM_SCRIPT
                .key(&pending)
                .key(&active)
                .arg(millis(Utc::now()))
                .invoke(conn)
                .map_err(command_error("EVALSHA"))?;
            let Some(raw_id) = claimed else {
                return Ok(None);
            };

            let Ok(id) = raw_id.parse::<JobId>() else {
                warn!(queue, id = %raw_id, "dropping malformed job id from active index");
                self.forget(conn, queue, &raw_id);
                continue;
            };

            let mut job = match self.load(conn, queue, id) {
                Ok(Some(job)) => job,
                Ok(None) => {
                    warn!(queue, %id, "claimed job has no stored body");
                    self.forget(conn, queue, &raw_id);
                    continue;
                }
                Err(e) => {
                    self.unclaim(conn, queue, &raw_id);
                    return Err(e);
                }
            };

            job.mark_running();
            if let Err(e) = self.save(conn, &job) {
                self.unclaim(conn, queue, &raw_id);
                return Err(e);
            }
            return Ok(Some(job));
        }

        Ok(None)
    }

    fn forget(&self, conn: &mut redis::Connection, queue: &str, id: &str) {
        let removed: Result<i64, _> = redis::cmd("ZREM").arg(self.index_key(queue, "active")).arg(id).query(conn);
        if let Err(e) = removed {
            warn!(queue, id, error = %e, "failed to drop broken entry from active index");
        }
    }

    fn requeue_stalled_in(
        &self,
        conn: &mut redis::Connection,
        queue: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, JobStoreError> {
        let active = self.index_key(queue, "active");
        let stalled: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(&active)
            .arg("-inf")
            .arg(millis(cutoff))
            .query(conn)
            .map_err(command_error("ZRANGEBYSCORE"))?;

        let mut recovered = 0;
        for raw_id in stalled {
            let Ok(id) = raw_id.parse::<JobId>() else {
                self.forget(conn, queue, &raw_id);
                continue;
            };
            let Some(mut job) = self.load(conn, queue, id)? else {
                self.forget(conn, queue, &raw_id);
                continue;
            };

            // The id may sit in `active` after a failed unclaim without the
            // body ever having been marked running.
            if job.status.state() == JobState::Active {
                let claimed_at = job.updated_at;
                job.mark_failed(STALLED_ERROR.to_string(), claimed_at);
            }
            self.save(conn, &job)?;
            warn!(queue, %id, state = job.status.state().as_str(), "recovered stalled job");
            recovered += 1;
        }

        Ok(recovered)
    }
}

impl JobStore for RedisJobStore {
    fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError> {
        self.run(|conn| {
            if self.load(conn, &job.queue, job.id)?.is_some() {
                return Err(JobStoreError::AlreadyExists(job.id));
            }
            self.save(conn, &job)?;
            Ok(job.id)
        })
    }

    fn get(&self, queue: &str, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        self.run(|conn| self.load(conn, queue, job_id))
    }

    fn update(&self, job: &Job) -> Result<(), JobStoreError> {
        self.run(|conn| {
            if self.load(conn, &job.queue, job.id)?.is_none() {
                return Err(JobStoreError::NotFound(job.id));
            }
            self.save(conn, job)
        })
    }

    #[instrument(skip(self), err)]
    fn claim_next(&self, queue: &str) -> Result<Option<Job>, JobStoreError> {
        self.run(|conn| self.claim_in(conn, queue))
    }

    #[instrument(skip(self), err)]
    fn requeue_stalled(&self, queue: &str, lease: Duration) -> Result<usize, JobStoreError> {
        let Some(cutoff) = lease_cutoff(Utc::now(), lease) else {
            return Ok(0);
        };
        self.run(|conn| self.requeue_stalled_in(conn, queue, cutoff))
    }

    fn list_by_status(
        &self,
        queue: &str,
        state: Option<JobState>,
        limit: usize,
    ) -> Result<Vec<Job>, JobStoreError> {
        self.run(|conn| {
            let states = match state {
                Some(s) => vec![s],
                None => vec![JobState::Waiting, JobState::Active, JobState::Completed, JobState::Failed],
            };

            let mut jobs = Vec::new();
            for s in states {
                let ids = self.index_members(conn, queue, s)?;
                jobs.extend(self.load_many(conn, queue, &ids)?);
            }

            let mut result: Vec<_> = jobs
                .into_iter()
                .filter(|j| state.is_none_or(|s| j.status.state() == s))
                .collect();
            result.sort_by_key(|j| j.created_at);
            result.truncate(limit);
            Ok(result)
        })
    }

    fn retry_failed(&self, queue: &str, job_id: JobId) -> Result<Job, JobStoreError> {
        self.run(|conn| {
            let mut job = self
                .load(conn, queue, job_id)?
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
            self.save(conn, &job)?;
            Ok(job)
        })
    }

    fn prune(&self, queue: &str, retention: &RetentionPolicy) -> Result<usize, JobStoreError> {
        self.run(|conn| {
            let now = Utc::now();
            let mut removed = 0;

            for (state, index) in [(JobState::Completed, "completed"), (JobState::Failed, "failed")] {
                let Some(keep) = retention.for_state(state) else {
                    continue;
                };
                let index_key = self.index_key(queue, index);
                let scored: Vec<(String, f64)> = redis::cmd("ZRANGE")
                    .arg(&index_key)
                    .arg(0)
                    .arg(-1)
                    .arg("WITHSCORES")
                    .query(conn)
                    .map_err(command_error("ZRANGE"))?;

                let finished: Vec<(JobId, DateTime<Utc>)> = scored
                    .into_iter()
                    .filter_map(|(id, ms)| Some((id.parse().ok()?, DateTime::from_timestamp_millis(ms as i64)?)))
                    .collect();

                for id in expired_ids(finished, keep, now) {
                    let mut pipe = redis::pipe();
                    pipe.atomic()
                        .cmd("DEL").arg(self.job_key(queue, id)).ignore()
                        .cmd("ZREM").arg(&index_key).arg(id.to_string()).ignore();
                    pipe.query::<()>(conn).map_err(command_error("MULTI"))?;
                    removed += 1;
                }
            }

            Ok(removed)
        })
    }

    fn stats(&self, queue: &str) -> Result<JobStats, JobStoreError> {
        self.run(|conn| {
            // Waiting and delayed share the pending index; split them by status.
            let pending = self.zset_members(conn, queue, "pending")?;
            let mut stats = JobStats::default();
            for job in self.load_many(conn, queue, &pending)? {
                stats.count(job.status.state());
            }

            stats.active = redis::cmd("ZCARD")
                .arg(self.index_key(queue, "active"))
                .query(conn)
                .map_err(command_error("ZCARD"))?;
            stats.completed = redis::cmd("ZCARD")
                .arg(self.index_key(queue, "completed"))
                .query(conn)
                .map_err(command_error("ZCARD"))?;
            stats.failed = redis::cmd("ZCARD")
                .arg(self.index_key(queue, "failed"))
                .query(conn)
                .map_err(command_error("ZCARD"))?;

            Ok(stats)
        })
    }
}

fn decode(json: &str) -> Result<Job, JobStoreError> {
    serde_json::from_str(json).map_err(|e| JobStoreError::Storage(format!("deserialization error: {e}")))
}

fn command_error(command: &'static str) -> impl Fn(redis::RedisError) -> JobStoreError {
    move |e| JobStoreError::Storage(format!("{command} failed: {e}"))
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn finished(job: &Job) -> DateTime<Utc> {
    job.finished_at.unwrap_or(job.updated_at)
}
