//! Job Lifecycle Tracker
//!
//! Deferred work is correlated purely through its job ID: a handler replies
//! with `{"jobId": ..}` right away and later publishes notifications on
//! `soren.cpu.<plugin>.<jobId>.<command>`. The tracker keeps no per-job state.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::Value;
use soren_types::{JobAccepted, JobCommand, JobNotification, JobProgress};
use tracing::{debug, warn};

use crate::error::{PluginError, PluginResult};
use crate::retry::{RetryPolicy, retry_async};
use crate::subjects::Subjects;
use crate::transport::{Headers, SharedTransport, with_deadline};

// ─────────────────────────────────────────────────────────────────────────────
// Tracker
// ─────────────────────────────────────────────────────────────────────────────

/// Issues job IDs and publishes job notifications
pub struct JobTracker {
    transport: SharedTransport,
    subjects: Subjects,
    transport_timeout: Duration,
    /// When set, each notification waits for an acknowledgment
    ack_timeout: Option<Duration>,
    retry: RetryPolicy,
}

impl JobTracker {
    pub fn new(
        transport: SharedTransport,
        subjects: Subjects,
        transport_timeout: Duration,
        ack_timeout: Option<Duration>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            subjects,
            transport_timeout,
            ack_timeout,
            retry,
        }
    }

    /// Fresh correlation ID, no side effects
    pub fn new_job_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }

    pub async fn progress(&self, job_id: &str, payload: Value) -> PluginResult<()> {
        self.notify(job_id, JobCommand::Progress, payload).await
    }

    pub async fn done(&self, job_id: &str, result: Value) -> PluginResult<()> {
        self.notify(job_id, JobCommand::Done, result).await
    }

    pub async fn error(&self, job_id: &str, info: Value) -> PluginResult<()> {
        self.notify(job_id, JobCommand::Error, info).await
    }

    async fn notify(&self, job_id: &str, command: JobCommand, payload: Value) -> PluginResult<()> {
        let subject = self.subjects.job(job_id, command);
        let notification = JobNotification {
            job_id: job_id.to_string(),
            command,
            payload,
        };
        let body = Bytes::from(serde_json::to_vec(&notification)?);

        let sent = retry_async("job_notification", self.retry, || {
            let subject = subject.as_str();
            let body = body.clone();
            async move {
                match self.ack_timeout {
                    Some(timeout) => self
                        .transport
                        .request(subject, Headers::new(), body, timeout)
                        .await
                        .map(|_| ()),
                    None => {
                        with_deadline(
                            subject,
                            self.transport_timeout,
                            self.transport.publish(subject, body),
                        )
                        .await
                    }
                }
            }
        })
        .await;

        match sent {
            Ok(()) => {
                debug!(job_id, command = %command, "Job notification sent");
                Ok(())
            }
            Err(e) => {
                warn!(job_id, command = %command, error = %e, "Job notification failed");
                Err(PluginError::Publish(e))
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Job Handle
// ─────────────────────────────────────────────────────────────────────────────

/// One deferred piece of work
///
/// `done` and `error` consume the handle, so at most one terminal notification
/// can be sent for a job created through [`Job::new`].
pub struct Job {
    id: String,
    method: String,
    created_at: DateTime<Utc>,
    tracker: Arc<JobTracker>,
}

impl Job {
    pub fn new(tracker: Arc<JobTracker>, method: impl Into<String>) -> Self {
        Self {
            id: tracker.new_job_id(),
            method: method.into(),
            created_at: Utc::now(),
            tracker,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Operation that started the job
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The immediate reply telling the caller which job to watch
    pub fn accepted(&self) -> Value {
        serde_json::to_value(JobAccepted {
            job_id: self.id.clone(),
        })
        .unwrap_or(Value::Null)
    }

    pub async fn progress(&self, payload: Value) -> PluginResult<()> {
        self.tracker.progress(&self.id, payload).await
    }

    /// Send a typed progress frame
    pub async fn report(&self, progress: JobProgress) -> PluginResult<()> {
        self.progress(serde_json::to_value(progress)?).await
    }

    pub async fn done(self, result: Value) -> PluginResult<()> {
        self.tracker.done(&self.id, result).await
    }

    pub async fn error(self, info: Value) -> PluginResult<()> {
        self.tracker.error(&self.id, info).await
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("created_at", &self.created_at)
            .finish()
    }
}
