//! Core job types and lifecycle transitions.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use reportforge_core::TenantId;

use crate::retry::BackoffPolicy;

/// Unique job identifier.
///
/// UUIDv7, so the derived ordering follows creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
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

/// Job kind, used as the handler-registry key.
///
/// Handlers are registered per kind once at startup; the payload schema for
/// each kind is owned by the component that enqueues it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Ad-hoc report export requested through the API surface.
    Export,
    /// A recurring report occurrence enqueued by the scheduler.
    ScheduledReport,
    /// Periodic usage counter rollup.
    UsageRollup,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Export => "export",
            JobKind::ScheduledReport => "scheduled_report",
            JobKind::UsageRollup => "usage_rollup",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job execution status.
///
/// `Failed` is terminal: it is reached only after retries are exhausted or a
/// permanent (non-retryable) error. A retryable failure transitions back to
/// `Pending` with a backoff `run_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued, waiting to become eligible and be claimed.
    Pending,
    /// Leased by exactly one worker.
    Running,
    /// Completed successfully.
    Completed,
    /// Exhausted retries or failed permanently.
    Failed { error: String, attempts: u32 },
    /// Cancelled by an external request; never retried.
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed { .. } | JobStatus::Cancelled
        )
    }

    /// Short name for logs and stats keys.
    pub fn name(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed { .. } => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

/// Worker lease on a running job.
///
/// A job in `Running` state is held by exactly one lease at a time; once
/// `expires_at` passes the queue may reclaim the job for re-delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub worker_id: String,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Record of a single execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAttemptRecord {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// A unit of asynchronous work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID.
    pub id: JobId,
    /// Tenant scope.
    pub tenant_id: TenantId,
    /// Kind for handler routing.
    pub kind: JobKind,
    /// Opaque payload; schema owned by the enqueuing component.
    pub payload: serde_json::Value,
    /// Current status.
    pub status: JobStatus,
    /// Ordering hint: higher priority is claimed first.
    pub priority: i16,
    /// Delivery attempts so far (incremented on claim).
    pub attempts: u32,
    /// Ceiling on delivery attempts.
    pub max_attempts: u32,
    /// Backoff policy applied when a retryable failure is re-queued.
    pub backoff: BackoffPolicy,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// Earliest time the job may be claimed.
    pub run_at: DateTime<Utc>,
    /// When the current/last attempt started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
    /// Progress 0-100 for long-running jobs.
    pub progress: Option<u8>,
    /// Lease held while `Running`.
    pub lease: Option<Lease>,
    /// Errors/durations from previous attempts.
    pub history: Vec<JobAttemptRecord>,
}

impl Job {
    /// Create a job eligible to run immediately.
    pub fn new(tenant_id: TenantId, kind: JobKind, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            tenant_id,
            kind,
            payload,
            status: JobStatus::Pending,
            priority: 0,
            attempts: 0,
            max_attempts: 5,
            backoff: BackoffPolicy::default(),
            created_at: now,
            run_at: now,
            started_at: None,
            finished_at: None,
            last_error: None,
            progress: None,
            lease: None,
            history: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: i16) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Schedule the job for a specific time.
    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.run_at = at;
        self
    }

    /// Schedule the job with a delay from now.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.run_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
        self
    }

    /// Whether the job is eligible to be claimed at `now`.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, JobStatus::Pending) && self.run_at <= now
    }

    /// Transition `Pending -> Running` under a fresh lease.
    pub(crate) fn mark_running(&mut self, worker_id: &str, lease_duration: Duration, now: DateTime<Utc>) {
        self.status = JobStatus::Running;
        self.attempts += 1;
        self.started_at = Some(now);
        self.lease = Some(Lease {
            worker_id: worker_id.to_string(),
            expires_at: now + chrono::Duration::from_std(lease_duration).unwrap_or_default(),
        });
    }

    /// Transition `Running -> Completed`.
    pub(crate) fn mark_completed(&mut self, now: DateTime<Utc>) {
        let started = self.started_at.unwrap_or(now);
        self.status = JobStatus::Completed;
        self.finished_at = Some(now);
        self.lease = None;
        self.history.push(JobAttemptRecord {
            attempt: self.attempts,
            started_at: started,
            finished_at: now,
            success: true,
            error: None,
            duration_ms: (now - started).num_milliseconds().max(0) as u64,
        });
    }

    /// Transition `Running -> Pending` for a retryable failure, with the
    /// backoff delay applied to `run_at`.
    pub(crate) fn mark_retrying(&mut self, error: String, delay: Duration, now: DateTime<Utc>) {
        self.push_failure_record(&error, now);
        self.status = JobStatus::Pending;
        self.run_at = now + chrono::Duration::from_std(delay).unwrap_or_default();
        self.last_error = Some(error);
        self.lease = None;
    }

    /// Transition `Running -> Failed` (terminal).
    pub(crate) fn mark_failed(&mut self, error: String, now: DateTime<Utc>) {
        self.push_failure_record(&error, now);
        self.status = JobStatus::Failed {
            error: error.clone(),
            attempts: self.attempts,
        };
        self.finished_at = Some(now);
        self.last_error = Some(error);
        self.lease = None;
    }

    /// Transition `Pending|Running -> Cancelled` (terminal).
    pub(crate) fn mark_cancelled(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Cancelled;
        self.finished_at = Some(now);
        self.lease = None;
    }

    fn push_failure_record(&mut self, error: &str, now: DateTime<Utc>) {
        let started = self.started_at.unwrap_or(now);
        self.history.push(JobAttemptRecord {
            attempt: self.attempts,
            started_at: started,
            finished_at: now,
            success: false,
            error: Some(error.to_string()),
            duration_ms: (now - started).num_milliseconds().max(0) as u64,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_tenant() -> TenantId {
        TenantId::new()
    }

    #[test]
    fn new_job_is_immediately_ready() {
        let job = Job::new(test_tenant(), JobKind::Export, serde_json::json!({}));
        assert!(matches!(job.status, JobStatus::Pending));
        assert_eq!(job.attempts, 0);
        assert!(job.is_ready(Utc::now()));
    }

    #[test]
    fn delayed_job_honors_run_at() {
        let job = Job::new(test_tenant(), JobKind::Export, serde_json::json!({}))
            .delayed(Duration::from_secs(60));
        assert!(!job.is_ready(Utc::now()));
        assert!(job.is_ready(Utc::now() + chrono::Duration::seconds(61)));
    }

    #[test]
    fn lifecycle_to_completed() {
        let mut job = Job::new(test_tenant(), JobKind::UsageRollup, serde_json::json!({}));
        let now = Utc::now();

        job.mark_running("w1", Duration::from_secs(30), now);
        assert!(matches!(job.status, JobStatus::Running));
        assert_eq!(job.attempts, 1);
        let lease = job.lease.as_ref().unwrap();
        assert_eq!(lease.worker_id, "w1");
        assert!(!lease.is_expired(now));
        assert!(lease.is_expired(now + chrono::Duration::seconds(31)));

        job.mark_completed(now + chrono::Duration::seconds(1));
        assert!(matches!(job.status, JobStatus::Completed));
        assert!(job.lease.is_none());
        assert_eq!(job.history.len(), 1);
        assert!(job.history[0].success);
    }

    #[test]
    fn retryable_failure_returns_to_pending_with_backoff() {
        let mut job = Job::new(test_tenant(), JobKind::Export, serde_json::json!({}));
        let now = Utc::now();

        job.mark_running("w1", Duration::from_secs(30), now);
        job.mark_retrying("boom".to_string(), Duration::from_secs(10), now);

        assert!(matches!(job.status, JobStatus::Pending));
        assert!(!job.is_ready(now));
        assert!(job.is_ready(now + chrono::Duration::seconds(11)));
        assert_eq!(job.last_error.as_deref(), Some("boom"));
        assert_eq!(job.history.len(), 1);
        assert!(!job.history[0].success);
    }

    #[test]
    fn terminal_failure_records_attempts() {
        let mut job = Job::new(test_tenant(), JobKind::Export, serde_json::json!({}));
        let now = Utc::now();

        job.mark_running("w1", Duration::from_secs(30), now);
        job.mark_failed("fatal".to_string(), now);

        match &job.status {
            JobStatus::Failed { error, attempts } => {
                assert_eq!(error, "fatal");
                assert_eq!(*attempts, 1);
            }
            other => panic!("expected failed, got {other:?}"),
        }
        assert!(job.status.is_terminal());
        assert!(job.finished_at.is_some());
    }
}
