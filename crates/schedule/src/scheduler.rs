//! Recurrence scheduler: arms each occurrence as a durable delayed queue
//! entry and re-arms the chain after every successful run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use reportforge_core::{DomainError, ReportId, ScheduleId, TenantId};
use reportforge_jobs::{Job, JobId, JobKind, JobQueue, JobQueueError, JobStatus};

use crate::spec::{compute_next_run, ScheduleSpec};
use crate::store::{Schedule, ScheduleStore, ScheduleStoreError};

/// Payload carried by every `ScheduledReport` queue entry.
///
/// The scheduler owns this schema; the report handler deserializes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledReportPayload {
    pub schedule_id: ScheduleId,
    pub report_id: ReportId,
    pub recipients: Vec<String>,
}

/// Scheduler operation error.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Queue(#[from] JobQueueError),
    #[error(transparent)]
    Store(#[from] ScheduleStoreError),
    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("schedule not found: {0}")]
    NotFound(ScheduleId),
}

/// Manages recurring report schedules on top of the job queue.
///
/// Every armed occurrence is a durable `run_at` queue entry, so pending
/// delayed work survives a process restart.
pub struct RecurrenceScheduler<Q, S> {
    queue: Q,
    store: S,
}

impl<Q: JobQueue, S: ScheduleStore> RecurrenceScheduler<Q, S> {
    pub fn new(queue: Q, store: S) -> Self {
        Self { queue, store }
    }

    /// Validate the spec, persist the schedule, and arm its first occurrence.
    pub fn create_schedule(
        &self,
        tenant_id: TenantId,
        report_id: ReportId,
        spec: ScheduleSpec,
        recipients: Vec<String>,
    ) -> Result<ScheduleId, SchedulerError> {
        spec.validate()?;

        let mut schedule = Schedule::new(tenant_id, report_id, spec, recipients);
        let id = self.store.insert(schedule.clone())?;

        let next = compute_next_run(&schedule.spec, Utc::now())?;
        self.arm(&mut schedule, next)?;

        info!(schedule_id = %id, next_run = %next, "schedule created");
        Ok(id)
    }

    /// Replace the spec and/or recipients, cancelling the queued occurrence
    /// and re-arming from the new spec.
    pub fn update_schedule(
        &self,
        tenant_id: TenantId,
        id: ScheduleId,
        spec: ScheduleSpec,
        recipients: Option<Vec<String>>,
    ) -> Result<(), SchedulerError> {
        spec.validate()?;

        let mut schedule = self
            .store
            .get(tenant_id, id)?
            .ok_or(SchedulerError::NotFound(id))?;

        self.cancel_queued_occurrence(&schedule);
        schedule.spec = spec;
        if let Some(recipients) = recipients {
            schedule.recipients = recipients;
        }

        let next = compute_next_run(&schedule.spec, Utc::now())?;
        self.arm(&mut schedule, next)?;

        info!(schedule_id = %id, next_run = %next, "schedule updated");
        Ok(())
    }

    /// Stop the chain. The queued future occurrence is cancelled best-effort;
    /// an occurrence already running finishes but is not re-armed.
    pub fn deactivate(&self, tenant_id: TenantId, id: ScheduleId) -> Result<(), SchedulerError> {
        let mut schedule = self
            .store
            .get(tenant_id, id)?
            .ok_or(SchedulerError::NotFound(id))?;

        self.cancel_queued_occurrence(&schedule);
        schedule.active = false;
        schedule.queued_job = None;
        schedule.next_run_at = None;
        schedule.updated_at = Utc::now();
        self.store.update(&schedule)?;

        info!(schedule_id = %id, "schedule deactivated");
        Ok(())
    }

    /// Deactivate and remove the schedule record.
    pub fn delete_schedule(&self, tenant_id: TenantId, id: ScheduleId) -> Result<(), SchedulerError> {
        self.deactivate(tenant_id, id)?;
        self.store.delete(tenant_id, id)?;
        Ok(())
    }

    /// Fetch a schedule snapshot.
    pub fn get_schedule(
        &self,
        tenant_id: TenantId,
        id: ScheduleId,
    ) -> Result<Option<Schedule>, SchedulerError> {
        Ok(self.store.get(tenant_id, id)?)
    }

    /// Re-arm the chain after a successful occurrence. Returns the next run
    /// time, or `None` when the schedule was deactivated in the meantime.
    pub fn on_run_completed(
        &self,
        tenant_id: TenantId,
        id: ScheduleId,
    ) -> Result<Option<DateTime<Utc>>, SchedulerError> {
        let mut schedule = self
            .store
            .get(tenant_id, id)?
            .ok_or(SchedulerError::NotFound(id))?;

        if !schedule.active {
            debug!(schedule_id = %id, "schedule inactive, chain not re-armed");
            schedule.queued_job = None;
            schedule.updated_at = Utc::now();
            self.store.update(&schedule)?;
            return Ok(None);
        }

        let next = compute_next_run(&schedule.spec, Utc::now())?;
        self.arm(&mut schedule, next)?;

        debug!(schedule_id = %id, next_run = %next, "chain re-armed");
        Ok(Some(next))
    }

    /// Enqueue the next occurrence as a delayed durable job and record it on
    /// the schedule.
    fn arm(&self, schedule: &mut Schedule, next: DateTime<Utc>) -> Result<JobId, SchedulerError> {
        let payload = ScheduledReportPayload {
            schedule_id: schedule.id,
            report_id: schedule.report_id,
            recipients: schedule.recipients.clone(),
        };

        let job = Job::new(
            schedule.tenant_id,
            JobKind::ScheduledReport,
            serde_json::to_value(&payload)?,
        )
        .scheduled_at(next);

        let job_id = self.queue.enqueue(job)?;
        schedule.queued_job = Some(job_id);
        schedule.next_run_at = Some(next);
        schedule.updated_at = Utc::now();
        self.store.update(schedule)?;

        Ok(job_id)
    }

    /// Cancel the armed occurrence if it is still pending. A leased/running
    /// occurrence is left to finish.
    fn cancel_queued_occurrence(&self, schedule: &Schedule) {
        let Some(job_id) = schedule.queued_job else {
            return;
        };

        match self.queue.get(schedule.tenant_id, job_id) {
            Ok(Some(job)) if matches!(job.status, JobStatus::Pending) => {
                if let Err(e) = self.queue.cancel(job_id) {
                    warn!(job_id = %job_id, error = %e, "failed to cancel queued occurrence");
                }
            }
            Ok(Some(job)) => {
                debug!(job_id = %job_id, status = job.status.name(), "occurrence not pending, leaving it");
            }
            Ok(None) => {}
            Err(e) => warn!(job_id = %job_id, error = %e, "failed to look up queued occurrence"),
        }
    }
}
