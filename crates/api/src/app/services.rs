//! Service wiring: stores, cache, job queue and sessions, built once per
//! process and shared by every handler.

use std::io;
use std::sync::Arc;

use tracing::info;

use newsdesk_auth::{SessionManager, TokenCodec};
use newsdesk_core::{Clock, News, RecordStore, SystemClock, User};
use newsdesk_infra::cache::{CacheStore, InMemoryCacheStore, ResponseCache};
use newsdesk_infra::jobs::{
    email_handler, spawn_outcome_logger, EmailQueue, EmailTransport, InMemoryJobStore, JobExecutor,
    JobExecutorConfig, JobExecutorHandle, JobStore, LogTransport, EMAIL_QUEUE,
};
use newsdesk_infra::records::InMemoryRecordStore;

use crate::config::AppConfig;
use crate::cookies::CookiePolicy;

pub type UserStore = Arc<dyn RecordStore<User>>;
pub type NewsStore = Arc<dyn RecordStore<News>>;

pub struct AppServices {
    pub config: AppConfig,
    pub users: UserStore,
    pub news: NewsStore,
    pub sessions: SessionManager<UserStore>,
    pub cache: ResponseCache,
    pub jobs: Arc<dyn JobStore>,
    pub emails: EmailQueue,
    pub cookies: CookiePolicy,
}

impl std::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppServices")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl AppServices {
    /// Build services from configuration, choosing Redis-backed cache and
    /// queue when `REDIS_URL` is set.
    pub fn build(config: AppConfig) -> anyhow::Result<Self> {
        let (cache, jobs) = backends(&config)?;
        Ok(Self::assemble(config, Arc::new(SystemClock), cache, jobs))
    }

    /// In-memory backends on an injected clock (tests, local runs).
    pub fn in_memory(config: AppConfig, clock: Arc<dyn Clock>) -> Self {
        let cache: Arc<dyn CacheStore> = Arc::new(InMemoryCacheStore::with_clock(clock.clone()));
        Self::assemble(config, clock, cache, InMemoryJobStore::arc())
    }

    fn assemble(config: AppConfig, clock: Arc<dyn Clock>, cache: Arc<dyn CacheStore>, jobs: Arc<dyn JobStore>) -> Self {
        let users: UserStore = Arc::new(InMemoryRecordStore::<User>::new());
        let news: NewsStore = Arc::new(InMemoryRecordStore::<News>::new());

        let codec = TokenCodec::new(&config.tokens, clock);
        let sessions = SessionManager::new(users.clone(), codec);
        let cache = ResponseCache::new(cache)
            .with_ttl_secs(config.cache_ttl_secs)
            .with_scan_batch(config.cache_scan_batch);
        let cookies = CookiePolicy {
            secure: config.production,
            access_max_age_secs: config.tokens.access_ttl_secs,
            refresh_max_age_secs: config.tokens.refresh_ttl_secs,
        };

        Self {
            emails: EmailQueue::new(jobs.clone()),
            config,
            users,
            news,
            sessions,
            cache,
            jobs,
            cookies,
        }
    }

    /// Start the email workers and the outcome logger. The returned handle
    /// stops the workers on `shutdown`.
    pub fn spawn_email_workers<T: EmailTransport + 'static>(&self, transport: T) -> io::Result<JobExecutorHandle> {
        let mut executor = JobExecutor::new(self.jobs.clone());
        executor.register_handler(EMAIL_QUEUE, email_handler(transport));

        let config = JobExecutorConfig::default()
            .with_name("email-worker")
            .with_concurrency(self.config.email_workers);
        let mut handle = executor.spawn(config)?;

        if let Some(outcomes) = handle.take_outcomes() {
            spawn_outcome_logger(outcomes)?;
        }
        Ok(handle)
    }

    /// Workers with the logging transport.
    pub fn spawn_default_email_workers(&self) -> io::Result<JobExecutorHandle> {
        self.spawn_email_workers(LogTransport)
    }
}

#[cfg(feature = "redis")]
fn backends(config: &AppConfig) -> anyhow::Result<(Arc<dyn CacheStore>, Arc<dyn JobStore>)> {
    use anyhow::Context;
    use newsdesk_infra::cache::RedisCacheStore;
    use newsdesk_infra::jobs::RedisJobStore;

    match &config.redis_url {
        Some(url) => {
            let cache: Arc<dyn CacheStore> =
                Arc::new(RedisCacheStore::new(url).context("failed to open Redis cache client")?);
            let jobs: Arc<dyn JobStore> =
                Arc::new(RedisJobStore::new(url, None).context("failed to open Redis job store")?);
            info!("using Redis cache and job queue");
            Ok((cache, jobs))
        }
        None => Ok(in_memory_backends()),
    }
}

#[cfg(not(feature = "redis"))]
fn backends(config: &AppConfig) -> anyhow::Result<(Arc<dyn CacheStore>, Arc<dyn JobStore>)> {
    if config.redis_url.is_some() {
        tracing::warn!("REDIS_URL set but the redis feature is disabled; using in-memory backends");
    }
    Ok(in_memory_backends())
}

fn in_memory_backends() -> (Arc<dyn CacheStore>, Arc<dyn JobStore>) {
    info!("using in-memory cache and job queue");
    let cache: Arc<dyn CacheStore> = Arc::new(InMemoryCacheStore::new());
    let jobs: Arc<dyn JobStore> = InMemoryJobStore::arc();
    (cache, jobs)
}
