//! Explicit runtime context.
//!
//! Everything lives on one [`JobRuntime`] constructed at process start and
//! passed by handle; there are no module-level singletons. Shutdown drains
//! in-flight leases before returning.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;

use reportforge_core::{ReportId, ScheduleId, TenantId};
use reportforge_export::{ArtifactSink, DataSource};
use reportforge_jobs::{
    AuditSink, CompletionHook, HandlerRegistry, InMemoryJobQueue, Job, JobId, JobKind, JobQueue,
    JobQueueError, NoopAuditSink, NoopCompletionHook, PoolStats, QueueStats, WorkerPool,
    WorkerPoolConfig, WorkerPoolHandle,
};
use reportforge_jobs::retry::policies;
use reportforge_schedule::{
    InMemoryScheduleStore, RecurrenceScheduler, ScheduleSpec, SchedulerError,
};

use crate::handlers::{export_handler, scheduled_report_handler, usage_rollup_handler, ExportPayload};
use crate::report_store::ReportConfigStore;

type Scheduler = RecurrenceScheduler<Arc<InMemoryJobQueue>, Arc<InMemoryScheduleStore>>;

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct JobRuntimeConfig {
    pub worker: WorkerPoolConfig,
    /// Rows per export chunk.
    pub chunk_size: usize,
}

impl Default for JobRuntimeConfig {
    fn default() -> Self {
        Self {
            worker: WorkerPoolConfig::default(),
            chunk_size: 1000,
        }
    }
}

/// Enqueue-time options for ad-hoc jobs.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub delay: Option<Duration>,
    pub priority: i16,
    pub max_attempts: Option<u32>,
}

/// Builds a [`JobRuntime`] from its collaborators.
pub struct JobRuntimeBuilder {
    reports: Arc<dyn ReportConfigStore>,
    source: Arc<dyn DataSource>,
    sink: Arc<dyn ArtifactSink>,
    hook: Arc<dyn CompletionHook>,
    audit: Arc<dyn AuditSink>,
    config: JobRuntimeConfig,
}

impl JobRuntimeBuilder {
    pub fn new(
        reports: Arc<dyn ReportConfigStore>,
        source: Arc<dyn DataSource>,
        sink: Arc<dyn ArtifactSink>,
    ) -> Self {
        Self {
            reports,
            source,
            sink,
            hook: Arc::new(NoopCompletionHook),
            audit: Arc::new(NoopAuditSink),
            config: JobRuntimeConfig::default(),
        }
    }

    pub fn with_completion_hook(mut self, hook: Arc<dyn CompletionHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_config(mut self, config: JobRuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Wire the handler registry, start the worker pool, and hand back the
    /// running context.
    pub fn start(self) -> JobRuntime {
        let queue = InMemoryJobQueue::arc();
        let schedules = InMemoryScheduleStore::arc();
        let scheduler = Arc::new(RecurrenceScheduler::new(queue.clone(), schedules.clone()));

        let mut registry = HandlerRegistry::new();
        registry.register(
            JobKind::Export,
            policies::database(),
            export_handler(
                self.reports.clone(),
                self.source.clone(),
                self.sink.clone(),
                self.config.chunk_size,
            ),
        );
        registry.register(
            JobKind::ScheduledReport,
            policies::database(),
            scheduled_report_handler(
                scheduler.clone(),
                self.reports.clone(),
                self.source.clone(),
                self.sink.clone(),
                self.config.chunk_size,
            ),
        );
        registry.register(
            JobKind::UsageRollup,
            policies::database(),
            usage_rollup_handler(queue.clone() as Arc<dyn JobQueue>, self.audit.clone()),
        );

        let pool = WorkerPool::new(queue.clone(), registry)
            .with_completion_hook(self.hook)
            .with_audit_sink(self.audit)
            .spawn(self.config.worker.clone());

        info!(
            concurrency = self.config.worker.concurrency,
            chunk_size = self.config.chunk_size,
            "job runtime started"
        );

        JobRuntime {
            queue,
            scheduler,
            pool: Some(pool),
        }
    }
}

/// The running job core: queue, worker pool, and recurrence scheduler.
pub struct JobRuntime {
    queue: Arc<InMemoryJobQueue>,
    scheduler: Arc<Scheduler>,
    pool: Option<WorkerPoolHandle>,
}

impl JobRuntime {
    /// Start an ad-hoc export job.
    pub fn enqueue_export(
        &self,
        tenant_id: TenantId,
        payload: ExportPayload,
        opts: EnqueueOptions,
    ) -> Result<JobId, JobQueueError> {
        let payload = serde_json::to_value(&payload)
            .map_err(|e| JobQueueError::Storage(e.to_string()))?;

        let mut job = Job::new(tenant_id, JobKind::Export, payload).with_priority(opts.priority);
        if let Some(delay) = opts.delay {
            job = job.delayed(delay);
        }
        if let Some(max_attempts) = opts.max_attempts {
            job = job.with_max_attempts(max_attempts);
        }

        self.queue.enqueue(job)
    }

    /// Job snapshot for status endpoints (state, progress, error).
    pub fn status(&self, tenant_id: TenantId, job_id: JobId) -> Result<Option<Job>, JobQueueError> {
        self.queue.get(tenant_id, job_id)
    }

    /// Request cancellation; returns whether the request was accepted.
    pub fn cancel(&self, job_id: JobId) -> bool {
        self.queue.cancel(job_id).is_ok()
    }

    pub fn create_schedule(
        &self,
        tenant_id: TenantId,
        report_id: ReportId,
        spec: ScheduleSpec,
        recipients: Vec<String>,
    ) -> Result<ScheduleId, SchedulerError> {
        self.scheduler
            .create_schedule(tenant_id, report_id, spec, recipients)
    }

    pub fn update_schedule(
        &self,
        tenant_id: TenantId,
        id: ScheduleId,
        spec: ScheduleSpec,
        recipients: Option<Vec<String>>,
    ) -> Result<(), SchedulerError> {
        self.scheduler.update_schedule(tenant_id, id, spec, recipients)
    }

    pub fn delete_schedule(&self, tenant_id: TenantId, id: ScheduleId) -> Result<(), SchedulerError> {
        self.scheduler.delete_schedule(tenant_id, id)
    }

    pub fn get_schedule(
        &self,
        tenant_id: TenantId,
        id: ScheduleId,
    ) -> Result<Option<reportforge_schedule::Schedule>, SchedulerError> {
        self.scheduler.get_schedule(tenant_id, id)
    }

    pub fn queue_stats(&self, tenant_id: Option<TenantId>) -> Result<QueueStats, JobQueueError> {
        self.queue.stats(tenant_id)
    }

    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.pool.as_ref().map(|p| p.stats())
    }

    /// Direct queue access for components living alongside the runtime.
    pub fn queue(&self) -> Arc<InMemoryJobQueue> {
        self.queue.clone()
    }

    pub fn scheduler(&self) -> Arc<Scheduler> {
        self.scheduler.clone()
    }

    /// Reclaim leases that expired at `now`; normally the workers do this,
    /// exposed for operational tooling.
    pub fn reclaim_expired(&self, now: DateTime<Utc>) -> Result<Vec<JobId>, JobQueueError> {
        self.queue.reclaim_expired(now)
    }

    /// Drain in-flight leases and stop the workers.
    pub fn shutdown(mut self) {
        if let Some(pool) = self.pool.take() {
            pool.shutdown();
        }
        info!("job runtime stopped");
    }
}
