//! Worker pool: leases jobs from the queue and dispatches them to registered
//! handlers with bounded concurrency.
//!
//! Per-job state machine: `leased -> running -> {retry-wait -> running}* ->
//! terminal`. Handler errors are translated into queue transitions here and
//! never propagate past the pool boundary.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

use reportforge_core::TenantId;

use crate::error::JobError;
use crate::hooks::{AuditEvent, AuditSink, CompletionHook, JobOutcome, NoopAuditSink, NoopCompletionHook};
use crate::queue::{JobQueue, JobQueueError};
use crate::retry::{BackoffPolicy, RetryExecutor};
use crate::types::{Job, JobKind, JobStatus};

/// Cap on jobs started within a rolling window.
#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    pub max_starts: u32,
    pub per: Duration,
}

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Name prefix for worker threads and logs.
    pub name: String,
    /// Number of worker threads (simultaneously active jobs).
    pub concurrency: usize,
    /// Sleep between polls when the queue is empty.
    pub poll_interval: Duration,
    /// Lease attached to each claim; must exceed the slowest handler.
    pub lease_duration: Duration,
    /// Optional cap on job starts per rolling window.
    pub rate_limit: Option<RateLimit>,
    /// Optional tenant filter (single-tenant worker).
    pub tenant_id: Option<TenantId>,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            name: "worker".to_string(),
            concurrency: 4,
            poll_interval: Duration::from_millis(100),
            lease_duration: Duration::from_secs(300),
            rate_limit: None,
            tenant_id: None,
        }
    }
}

impl WorkerPoolConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_lease_duration(mut self, lease: Duration) -> Self {
        self.lease_duration = lease;
        self
    }

    pub fn with_rate_limit(mut self, limit: RateLimit) -> Self {
        self.rate_limit = Some(limit);
        self
    }

    pub fn with_tenant(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }
}

/// Handler function: receives the job context, returns a classified error on
/// failure.
pub type HandlerFn = Box<dyn Fn(&JobContext<'_>) -> Result<(), JobError> + Send + Sync>;

struct RegisteredHandler {
    handler: HandlerFn,
    policy: BackoffPolicy,
}

/// Maps each [`JobKind`] to its handler and in-process retry policy.
/// Built once at startup; no stringly-typed dispatch.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobKind, RegisteredHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a job kind, replacing any previous one.
    pub fn register<F>(&mut self, kind: JobKind, policy: BackoffPolicy, handler: F)
    where
        F: Fn(&JobContext<'_>) -> Result<(), JobError> + Send + Sync + 'static,
    {
        self.handlers.insert(
            kind,
            RegisteredHandler {
                handler: Box::new(handler),
                policy,
            },
        );
    }

    fn get(&self, kind: JobKind) -> Option<&RegisteredHandler> {
        self.handlers.get(&kind)
    }
}

/// What a handler sees while running: its job snapshot plus progress and
/// cancellation access backed by the live queue.
pub struct JobContext<'a> {
    job: &'a Job,
    queue: &'a dyn JobQueue,
}

impl<'a> JobContext<'a> {
    pub fn new(job: &'a Job, queue: &'a dyn JobQueue) -> Self {
        Self { job, queue }
    }

    pub fn job(&self) -> &Job {
        self.job
    }

    /// Deserialize the payload into the kind's typed schema.
    /// A malformed payload is a permanent failure.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, JobError> {
        serde_json::from_value(self.job.payload.clone())
            .map_err(|e| JobError::permanent(format!("malformed payload: {e}")))
    }

    /// Best-effort progress update (0-100).
    pub fn set_progress(&self, progress: u8) {
        if let Err(e) = self.queue.set_progress(self.job.id, progress) {
            debug!(job_id = %self.job.id, error = %e, "progress update failed");
        }
    }

    /// Cooperative cancellation poll; handlers check this at chunk boundaries.
    pub fn is_cancelled(&self) -> bool {
        self.queue.is_cancelled(self.job.id).unwrap_or(false)
    }
}

/// Pool runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PoolStats {
    pub claimed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// In-process retry waits (not queue-level redeliveries).
    pub retried: u64,
    pub in_flight: usize,
}

struct RateLimiter {
    window: Mutex<VecDeque<Instant>>,
    limit: RateLimit,
}

impl RateLimiter {
    fn new(limit: RateLimit) -> Self {
        Self {
            window: Mutex::new(VecDeque::new()),
            limit,
        }
    }

    /// Take a start slot if the rolling window has room.
    fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut window = self.window.lock().unwrap();
        while let Some(front) = window.front() {
            if now.duration_since(*front) >= self.limit.per {
                window.pop_front();
            } else {
                break;
            }
        }
        if (window.len() as u32) < self.limit.max_starts {
            window.push_back(now);
            true
        } else {
            false
        }
    }

    /// Give back a slot that did not result in a job start.
    fn release(&self) {
        self.window.lock().unwrap().pop_back();
    }
}

struct PoolShared<Q> {
    queue: Arc<Q>,
    registry: Arc<HandlerRegistry>,
    hook: Arc<dyn CompletionHook>,
    audit: Arc<dyn AuditSink>,
    stats: Arc<Mutex<PoolStats>>,
    shutdown: Arc<AtomicBool>,
    limiter: Option<RateLimiter>,
    config: WorkerPoolConfig,
}

/// Handle to a running pool: request graceful shutdown, read stats.
pub struct WorkerPoolHandle {
    shutdown: Arc<AtomicBool>,
    joins: Vec<thread::JoinHandle<()>>,
    stats: Arc<Mutex<PoolStats>>,
}

impl WorkerPoolHandle {
    /// Signal shutdown and wait for every worker to drain its in-flight job.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        for join in self.joins.drain(..) {
            let _ = join.join();
        }
    }

    pub fn stats(&self) -> PoolStats {
        self.stats.lock().unwrap().clone()
    }
}

/// Bounded-concurrency job processor.
pub struct WorkerPool<Q: JobQueue + 'static> {
    queue: Arc<Q>,
    registry: Arc<HandlerRegistry>,
    hook: Arc<dyn CompletionHook>,
    audit: Arc<dyn AuditSink>,
}

impl<Q: JobQueue + 'static> WorkerPool<Q> {
    pub fn new(queue: Q, registry: HandlerRegistry) -> Self {
        Self {
            queue: Arc::new(queue),
            registry: Arc::new(registry),
            hook: Arc::new(NoopCompletionHook),
            audit: Arc::new(NoopAuditSink),
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

    /// Shared queue handle, for enqueuers living alongside the pool.
    pub fn queue(&self) -> Arc<Q> {
        self.queue.clone()
    }

    /// Spawn `config.concurrency` worker threads.
    pub fn spawn(self, config: WorkerPoolConfig) -> WorkerPoolHandle {
        let shutdown = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(Mutex::new(PoolStats::default()));

        let shared = Arc::new(PoolShared {
            queue: self.queue,
            registry: self.registry,
            hook: self.hook,
            audit: self.audit,
            stats: stats.clone(),
            shutdown: shutdown.clone(),
            limiter: config.rate_limit.map(RateLimiter::new),
            config,
        });

        let mut joins = Vec::with_capacity(shared.config.concurrency);
        for i in 0..shared.config.concurrency {
            let worker_id = format!("{}-{}", shared.config.name, i);
            let shared = shared.clone();
            let join = thread::Builder::new()
                .name(worker_id.clone())
                .spawn(move || worker_loop(shared, worker_id))
                .expect("failed to spawn worker thread");
            joins.push(join);
        }

        WorkerPoolHandle {
            shutdown,
            joins,
            stats,
        }
    }
}

fn worker_loop<Q: JobQueue>(shared: Arc<PoolShared<Q>>, worker_id: String) {
    info!(worker = %worker_id, "worker started");

    loop {
        if shared.shutdown.load(Ordering::Relaxed) {
            break;
        }

        match shared.queue.reclaim_expired(Utc::now()) {
            Ok(ids) if !ids.is_empty() => {
                warn!(worker = %worker_id, count = ids.len(), "reclaimed expired job leases");
            }
            Err(e) => error!(worker = %worker_id, error = %e, "lease reclaim failed"),
            _ => {}
        }

        if let Some(limiter) = &shared.limiter {
            if !limiter.try_acquire() {
                thread::sleep(shared.config.poll_interval.min(Duration::from_millis(25)));
                continue;
            }
        }

        match shared.queue.claim_next(
            &worker_id,
            shared.config.lease_duration,
            shared.config.tenant_id,
        ) {
            Ok(Some(job)) => {
                {
                    let mut stats = shared.stats.lock().unwrap();
                    stats.claimed += 1;
                    stats.in_flight += 1;
                }
                debug!(worker = %worker_id, job_id = %job.id, kind = %job.kind, "claimed job");

                run_one(&shared, &worker_id, &job);

                shared.stats.lock().unwrap().in_flight -= 1;
            }
            Ok(None) => {
                if let Some(limiter) = &shared.limiter {
                    limiter.release();
                }
                thread::sleep(shared.config.poll_interval);
            }
            Err(e) => {
                if let Some(limiter) = &shared.limiter {
                    limiter.release();
                }
                error!(worker = %worker_id, error = %e, "failed to claim job");
                thread::sleep(shared.config.poll_interval);
            }
        }
    }

    info!(worker = %worker_id, "worker stopped");
}

fn run_one<Q: JobQueue>(shared: &PoolShared<Q>, worker_id: &str, job: &Job) {
    let span = tracing::info_span!("job", job_id = %job.id, kind = %job.kind);
    let _guard = span.enter();

    let Some(registered) = shared.registry.get(job.kind) else {
        warn!("no handler registered");
        let reason = format!("no handler registered for kind {}", job.kind);
        match shared.queue.nack(job.id, worker_id, reason.clone(), false) {
            Ok(JobStatus::Failed { .. }) => {
                finalize(shared, job, JobOutcome::Failed, Some(reason));
            }
            Ok(JobStatus::Cancelled) => finalize(shared, job, JobOutcome::Cancelled, None),
            Ok(_) => {}
            Err(e) => error!(error = %e, "nack failed"),
        }
        return;
    };

    let ctx = JobContext::new(job, &*shared.queue);
    let retry_stats = shared.stats.clone();
    let result = RetryExecutor::new(registered.policy.clone())
        .retry_if(|e: &JobError| e.is_retryable())
        .on_retry(move |e: &JobError, attempt| {
            retry_stats.lock().unwrap().retried += 1;
            warn!(error = %e, attempt, "handler failed, retrying in-process");
        })
        .execute(|| (registered.handler)(&ctx));

    match result {
        Ok(outcome) => match shared.queue.ack(job.id, worker_id) {
            Ok(()) => {
                debug!(attempts = outcome.attempts, "job completed");
                finalize(shared, job, JobOutcome::Completed, None);
            }
            Err(JobQueueError::InvalidTransition { .. })
                if shared.queue.is_cancelled(job.id).unwrap_or(false) =>
            {
                // Cancelled between the last chunk and the ack; the
                // cancellation outcome wins.
                finalize(shared, job, JobOutcome::Cancelled, None);
            }
            Err(e) => {
                // Lease lost (reclaimed); another worker owns the redelivery.
                warn!(error = %e, "ack failed, job will be redelivered");
            }
        },
        Err(failure) => match failure.error {
            JobError::Cancelled => finalize(shared, job, JobOutcome::Cancelled, None),
            err => {
                let retryable = err.is_retryable();
                match shared
                    .queue
                    .nack(job.id, worker_id, err.to_string(), retryable)
                {
                    Ok(JobStatus::Pending) => {
                        debug!(error = %err, "requeued with backoff");
                    }
                    Ok(JobStatus::Failed { .. }) => {
                        warn!(error = %err, attempts = failure.attempts, "job failed terminally");
                        finalize(shared, job, JobOutcome::Failed, Some(err.to_string()));
                    }
                    Ok(JobStatus::Cancelled) => {
                        finalize(shared, job, JobOutcome::Cancelled, None);
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "nack failed, job will be redelivered"),
                }
            }
        },
    }
}

/// Terminal bookkeeping: stats, completion hook (exactly once, errors are the
/// hook's own problem), best-effort audit record.
fn finalize<Q: JobQueue>(
    shared: &PoolShared<Q>,
    job: &Job,
    outcome: JobOutcome,
    detail: Option<String>,
) {
    {
        let mut stats = shared.stats.lock().unwrap();
        match outcome {
            JobOutcome::Completed => stats.succeeded += 1,
            JobOutcome::Failed => stats.failed += 1,
            JobOutcome::Cancelled => stats.cancelled += 1,
        }
    }
    shared.hook.notify(job, outcome);
    shared
        .audit
        .record(AuditEvent::for_job(job, outcome.as_str(), detail));
}
