//! Durable job queue abstraction and in-memory implementation.
//!
//! All state transitions (claim/ack/nack/cancel/reclaim) are atomic with
//! respect to concurrent callers; the queue's store is the only shared
//! mutable state between workers.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};

use reportforge_core::TenantId;

use crate::types::{Job, JobId, JobStatus};

/// Queue operation error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobQueueError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("tenant isolation violation")]
    TenantIsolation,
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("lease on job {0} is not held by this worker")]
    LeaseNotHeld(JobId),
    #[error("illegal {action} for job {job_id} in state {from}")]
    InvalidTransition {
        job_id: JobId,
        from: &'static str,
        action: &'static str,
    },
    #[error("storage error: {0}")]
    Storage(String),
}

/// Aggregate queue counts for observability endpoints.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Durable queue contract.
///
/// `claim_next` + `ack`/`nack` form the lease protocol: a claimed job is held
/// by exactly one worker until acknowledged, failed, or its lease expires and
/// [`JobQueue::reclaim_expired`] makes it eligible again.
pub trait JobQueue: Send + Sync {
    /// Enqueue a new job. `run_at`/priority/attempt ceiling are carried on
    /// the [`Job`] itself (builder-style).
    fn enqueue(&self, job: Job) -> Result<JobId, JobQueueError>;

    /// Fetch a job snapshot, enforcing the tenant boundary.
    fn get(&self, tenant_id: TenantId, job_id: JobId) -> Result<Option<Job>, JobQueueError>;

    /// Atomically claim the oldest eligible pending job (`run_at <= now`),
    /// ordered by priority (desc) then `created_at` (asc). Marks it
    /// `Running` under a lease for `lease_duration`.
    fn claim_next(
        &self,
        worker_id: &str,
        lease_duration: Duration,
        tenant_id: Option<TenantId>,
    ) -> Result<Option<Job>, JobQueueError>;

    /// `Running -> Completed`. Rejects callers that no longer hold the lease
    /// (a late ack after reclaim) and jobs already terminal.
    fn ack(&self, job_id: JobId, worker_id: &str) -> Result<(), JobQueueError>;

    /// Report a failed attempt. Retryable failures with attempts remaining go
    /// back to `Pending` with the job's backoff delay applied to `run_at`;
    /// everything else is terminal `Failed`. Returns the resulting status.
    ///
    /// A job cancelled while running reports its `Cancelled` status unchanged.
    fn nack(
        &self,
        job_id: JobId,
        worker_id: &str,
        error: String,
        retryable: bool,
    ) -> Result<JobStatus, JobQueueError>;

    /// Cancel a job. Legal from `Pending` (immediate) and `Running` (the
    /// handler observes the flag at its next chunk boundary).
    fn cancel(&self, job_id: JobId) -> Result<JobStatus, JobQueueError>;

    /// Update progress (0-100) on a running job. No-op once terminal.
    fn set_progress(&self, job_id: JobId, progress: u8) -> Result<(), JobQueueError>;

    /// Cheap cancellation poll for cooperative handlers.
    fn is_cancelled(&self, job_id: JobId) -> Result<bool, JobQueueError>;

    /// Re-queue every `Running` job whose lease expired (implicit nack with
    /// the queue's fixed reclaim delay); jobs out of attempts become
    /// `Failed`. Returns the ids touched.
    fn reclaim_expired(&self, now: DateTime<Utc>) -> Result<Vec<JobId>, JobQueueError>;

    /// Move a terminally failed job back to `Pending` for a fresh run.
    fn requeue_failed(&self, tenant_id: TenantId, job_id: JobId) -> Result<Job, JobQueueError>;

    /// List jobs by status (same-variant match), oldest first.
    fn list_by_status(
        &self,
        tenant_id: TenantId,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, JobQueueError>;

    /// Aggregate counts, optionally scoped to a tenant.
    fn stats(&self, tenant_id: Option<TenantId>) -> Result<QueueStats, JobQueueError>;
}

/// In-memory queue for tests/dev and single-process deployments.
#[derive(Debug)]
pub struct InMemoryJobQueue {
    jobs: RwLock<HashMap<JobId, Job>>,
    reclaim_delay: Duration,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            reclaim_delay: Duration::from_secs(30),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Fixed delay applied when an expired lease is reclaimed.
    pub fn with_reclaim_delay(mut self, delay: Duration) -> Self {
        self.reclaim_delay = delay;
        self
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue for InMemoryJobQueue {
    fn enqueue(&self, job: Job) -> Result<JobId, JobQueueError> {
        let mut jobs = self.jobs.write().unwrap();
        if jobs.contains_key(&job.id) {
            return Err(JobQueueError::AlreadyExists(job.id));
        }
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    fn get(&self, tenant_id: TenantId, job_id: JobId) -> Result<Option<Job>, JobQueueError> {
        let jobs = self.jobs.read().unwrap();
        match jobs.get(&job_id) {
            Some(job) if job.tenant_id == tenant_id => Ok(Some(job.clone())),
            Some(_) => Err(JobQueueError::TenantIsolation),
            None => Ok(None),
        }
    }

    fn claim_next(
        &self,
        worker_id: &str,
        lease_duration: Duration,
        tenant_id: Option<TenantId>,
    ) -> Result<Option<Job>, JobQueueError> {
        let mut jobs = self.jobs.write().unwrap();
        let now = Utc::now();

        let mut candidates: Vec<_> = jobs
            .values()
            .filter(|j| j.is_ready(now) && tenant_id.is_none_or(|t| j.tenant_id == t))
            .map(|j| (std::cmp::Reverse(j.priority), j.created_at, j.id))
            .collect();
        candidates.sort();

        if let Some(&(_, _, job_id)) = candidates.first() {
            if let Some(job) = jobs.get_mut(&job_id) {
                job.mark_running(worker_id, lease_duration, now);
                return Ok(Some(job.clone()));
            }
        }

        Ok(None)
    }

    fn ack(&self, job_id: JobId, worker_id: &str) -> Result<(), JobQueueError> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs.get_mut(&job_id).ok_or(JobQueueError::NotFound(job_id))?;

        match &job.status {
            JobStatus::Running => {
                let holds_lease = job
                    .lease
                    .as_ref()
                    .is_some_and(|l| l.worker_id == worker_id);
                if !holds_lease {
                    return Err(JobQueueError::LeaseNotHeld(job_id));
                }
                job.mark_completed(Utc::now());
                Ok(())
            }
            other => Err(JobQueueError::InvalidTransition {
                job_id,
                from: other.name(),
                action: "ack",
            }),
        }
    }

    fn nack(
        &self,
        job_id: JobId,
        worker_id: &str,
        error: String,
        retryable: bool,
    ) -> Result<JobStatus, JobQueueError> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs.get_mut(&job_id).ok_or(JobQueueError::NotFound(job_id))?;
        let now = Utc::now();

        match &job.status {
            // Cancelled mid-run: the cancellation outcome wins.
            JobStatus::Cancelled => Ok(JobStatus::Cancelled),
            JobStatus::Running => {
                let holds_lease = job
                    .lease
                    .as_ref()
                    .is_some_and(|l| l.worker_id == worker_id);
                if !holds_lease {
                    return Err(JobQueueError::LeaseNotHeld(job_id));
                }

                if retryable && job.attempts < job.max_attempts {
                    let delay = job.backoff.next_delay(job.attempts + 1);
                    job.mark_retrying(error, delay, now);
                } else {
                    job.mark_failed(error, now);
                }
                Ok(job.status.clone())
            }
            other => Err(JobQueueError::InvalidTransition {
                job_id,
                from: other.name(),
                action: "nack",
            }),
        }
    }

    fn cancel(&self, job_id: JobId) -> Result<JobStatus, JobQueueError> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs.get_mut(&job_id).ok_or(JobQueueError::NotFound(job_id))?;

        match &job.status {
            JobStatus::Pending | JobStatus::Running => {
                job.mark_cancelled(Utc::now());
                Ok(job.status.clone())
            }
            other => Err(JobQueueError::InvalidTransition {
                job_id,
                from: other.name(),
                action: "cancel",
            }),
        }
    }

    fn set_progress(&self, job_id: JobId, progress: u8) -> Result<(), JobQueueError> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs.get_mut(&job_id).ok_or(JobQueueError::NotFound(job_id))?;

        if matches!(job.status, JobStatus::Running) {
            job.progress = Some(progress.min(100));
        }
        Ok(())
    }

    fn is_cancelled(&self, job_id: JobId) -> Result<bool, JobQueueError> {
        let jobs = self.jobs.read().unwrap();
        let job = jobs.get(&job_id).ok_or(JobQueueError::NotFound(job_id))?;
        Ok(matches!(job.status, JobStatus::Cancelled))
    }

    fn reclaim_expired(&self, now: DateTime<Utc>) -> Result<Vec<JobId>, JobQueueError> {
        let mut jobs = self.jobs.write().unwrap();
        let mut touched = Vec::new();

        for job in jobs.values_mut() {
            let expired = matches!(job.status, JobStatus::Running)
                && job.lease.as_ref().is_some_and(|l| l.is_expired(now));
            if !expired {
                continue;
            }

            if job.attempts < job.max_attempts {
                job.mark_retrying("lease expired (worker lost)".to_string(), self.reclaim_delay, now);
            } else {
                job.mark_failed("lease expired (worker lost)".to_string(), now);
            }
            touched.push(job.id);
        }

        Ok(touched)
    }

    fn requeue_failed(&self, tenant_id: TenantId, job_id: JobId) -> Result<Job, JobQueueError> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs.get_mut(&job_id).ok_or(JobQueueError::NotFound(job_id))?;

        if job.tenant_id != tenant_id {
            return Err(JobQueueError::TenantIsolation);
        }

        match &job.status {
            JobStatus::Failed { .. } => {
                job.status = JobStatus::Pending;
                job.attempts = 0;
                job.run_at = Utc::now();
                job.started_at = None;
                job.finished_at = None;
                job.progress = None;
                job.history.clear();
                Ok(job.clone())
            }
            other => Err(JobQueueError::InvalidTransition {
                job_id,
                from: other.name(),
                action: "requeue",
            }),
        }
    }

    fn list_by_status(
        &self,
        tenant_id: TenantId,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, JobQueueError> {
        let jobs = self.jobs.read().unwrap();
        let mut result: Vec<_> = jobs
            .values()
            .filter(|j| {
                j.tenant_id == tenant_id
                    && status.as_ref().is_none_or(|s| {
                        std::mem::discriminant(&j.status) == std::mem::discriminant(s)
                    })
            })
            .cloned()
            .collect();

        result.sort_by_key(|j| j.created_at);
        result.truncate(limit);
        Ok(result)
    }

    fn stats(&self, tenant_id: Option<TenantId>) -> Result<QueueStats, JobQueueError> {
        let jobs = self.jobs.read().unwrap();
        let mut stats = QueueStats::default();

        for job in jobs.values() {
            if tenant_id.is_some_and(|t| job.tenant_id != t) {
                continue;
            }
            match &job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed { .. } => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
        }

        Ok(stats)
    }
}

impl JobQueue for Arc<InMemoryJobQueue> {
    fn enqueue(&self, job: Job) -> Result<JobId, JobQueueError> {
        (**self).enqueue(job)
    }

    fn get(&self, tenant_id: TenantId, job_id: JobId) -> Result<Option<Job>, JobQueueError> {
        (**self).get(tenant_id, job_id)
    }

    fn claim_next(
        &self,
        worker_id: &str,
        lease_duration: Duration,
        tenant_id: Option<TenantId>,
    ) -> Result<Option<Job>, JobQueueError> {
        (**self).claim_next(worker_id, lease_duration, tenant_id)
    }

    fn ack(&self, job_id: JobId, worker_id: &str) -> Result<(), JobQueueError> {
        (**self).ack(job_id, worker_id)
    }

    fn nack(
        &self,
        job_id: JobId,
        worker_id: &str,
        error: String,
        retryable: bool,
    ) -> Result<JobStatus, JobQueueError> {
        (**self).nack(job_id, worker_id, error, retryable)
    }

    fn cancel(&self, job_id: JobId) -> Result<JobStatus, JobQueueError> {
        (**self).cancel(job_id)
    }

    fn set_progress(&self, job_id: JobId, progress: u8) -> Result<(), JobQueueError> {
        (**self).set_progress(job_id, progress)
    }

    fn is_cancelled(&self, job_id: JobId) -> Result<bool, JobQueueError> {
        (**self).is_cancelled(job_id)
    }

    fn reclaim_expired(&self, now: DateTime<Utc>) -> Result<Vec<JobId>, JobQueueError> {
        (**self).reclaim_expired(now)
    }

    fn requeue_failed(&self, tenant_id: TenantId, job_id: JobId) -> Result<Job, JobQueueError> {
        (**self).requeue_failed(tenant_id, job_id)
    }

    fn list_by_status(
        &self,
        tenant_id: TenantId,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, JobQueueError> {
        (**self).list_by_status(tenant_id, status, limit)
    }

    fn stats(&self, tenant_id: Option<TenantId>) -> Result<QueueStats, JobQueueError> {
        (**self).stats(tenant_id)
    }
}
