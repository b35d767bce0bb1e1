//! Email delivery jobs.
//!
//! A job payload is a JSON array of [`EmailMessage`]s. Items are sent in
//! order, and every item is attempted. A delivery error or an undecodable
//! item is logged and counted against that item only; the job still
//! completes. Only a payload that is not a list fails the job.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use newsdesk_core::UserId;

use super::store::{JobStore, JobStoreError};
use super::types::{Job, JobId, JobResult, RetryPolicy};

/// Queue name for email jobs.
pub const EMAIL_QUEUE: &str = "email_queue";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailMessage {
    pub to_email: String,
    pub subject: String,
    pub body: String,
}

impl EmailMessage {
    pub fn new(to_email: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to_email: to_email.into(),
            subject: subject.into(),
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// This recipient could not be served; other items are unaffected
    #[error("message to {to} rejected: {reason}")]
    Rejected { to: String, reason: String },

    /// The transport itself is down
    #[error("email transport unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EmailJobError {
    #[error("email job payload is not a list")]
    NotAList,
}

/// Outbound mail transport.
pub trait EmailTransport: Send + Sync {
    fn send(&self, message: &EmailMessage) -> Result<(), DeliveryError>;
}

impl<T: EmailTransport + ?Sized> EmailTransport for Arc<T> {
    fn send(&self, message: &EmailMessage) -> Result<(), DeliveryError> {
        (**self).send(message)
    }
}

/// Transport that only logs what it would send.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTransport;

impl EmailTransport for LogTransport {
    fn send(&self, message: &EmailMessage) -> Result<(), DeliveryError> {
        info!(to = %message.to_email, subject = %message.subject, bytes = message.body.len(), "email sent");
        Ok(())
    }
}

/// Per-job delivery counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub delivered: usize,
    /// Items that did not decode as a message.
    pub skipped: usize,
    /// Items the transport failed to deliver.
    pub failed: usize,
}

/// Deliver every message in `payload`.
pub fn process_email_job(payload: &JsonValue, transport: &dyn EmailTransport) -> Result<DeliveryReport, EmailJobError> {
    let items = payload.as_array().ok_or(EmailJobError::NotAList)?;
    let mut report = DeliveryReport::default();

    for (index, item) in items.iter().enumerate() {
        let message = match EmailMessage::deserialize(item) {
            Ok(message) => message,
            Err(e) => {
                warn!(index, error = %e, "skipping undecodable email item");
                report.skipped += 1;
                continue;
            }
        };

        match transport.send(&message) {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                warn!(index, to = %message.to_email, error = %e, "email delivery failed");
                report.failed += 1;
            }
        }
    }

    debug!(
        delivered = report.delivered,
        skipped = report.skipped,
        failed = report.failed,
        "email job processed"
    );
    Ok(report)
}

/// Job handler for [`EMAIL_QUEUE`].
pub fn email_handler<T>(transport: T) -> impl Fn(&Job) -> JobResult + Send + Sync + 'static
where
    T: EmailTransport + 'static,
{
    move |job| match process_email_job(&job.payload, &transport) {
        Ok(_) => JobResult::Success,
        Err(e @ EmailJobError::NotAList) => JobResult::Discard(e.to_string()),
    }
}

/// Producer side of the email queue.
#[derive(Clone)]
pub struct EmailQueue {
    store: Arc<dyn JobStore>,
    retry_policy: RetryPolicy,
}

impl std::fmt::Debug for EmailQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailQueue")
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

impl EmailQueue {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Record a batch as one waiting job; returns once it is stored.
    pub fn enqueue(&self, messages: &[EmailMessage]) -> Result<JobId, JobStoreError> {
        self.store_batch(messages, None)
    }

    /// Like [`EmailQueue::enqueue`], recording `owner` as the submitter.
    pub fn enqueue_for(&self, owner: UserId, messages: &[EmailMessage]) -> Result<JobId, JobStoreError> {
        self.store_batch(messages, Some(owner))
    }

    fn store_batch(&self, messages: &[EmailMessage], owner: Option<UserId>) -> Result<JobId, JobStoreError> {
        let payload = serde_json::to_value(messages)
            .map_err(|e| JobStoreError::Storage(format!("serialization error: {e}")))?;
        let mut job = Job::new(EMAIL_QUEUE, payload).with_retry_policy(self.retry_policy.clone());
        job.owner = owner;
        let id = self.store.enqueue(job)?;
        debug!(job_id = %id, count = messages.len(), "email job enqueued");
        Ok(id)
    }
}
