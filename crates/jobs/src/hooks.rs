//! Side-effect collaborator interfaces invoked by the worker pool.
//!
//! Both hooks are fire-and-forget from the core's perspective: implementations
//! must not block for long, and their failures never alter job state.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use reportforge_core::TenantId;

use crate::types::{Job, JobId, JobKind};

/// Terminal outcome passed to the notification hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Completed,
    Failed,
    Cancelled,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Completed => "completed",
            JobOutcome::Failed => "failed",
            JobOutcome::Cancelled => "cancelled",
        }
    }
}

/// Invoked exactly once per job reaching a terminal state.
///
/// Recipient resolution (e.g. schedule recipients for completion emails) is
/// the implementation's concern; the payload carries whatever it needs.
pub trait CompletionHook: Send + Sync {
    fn notify(&self, job: &Job, outcome: JobOutcome);
}

/// Hook that does nothing.
#[derive(Debug, Default)]
pub struct NoopCompletionHook;

impl CompletionHook for NoopCompletionHook {
    fn notify(&self, _job: &Job, _outcome: JobOutcome) {}
}

/// Hook that records invocations; used by tests to assert exactly-once
/// delivery.
#[derive(Debug, Default)]
pub struct RecordingCompletionHook {
    notified: Mutex<Vec<(JobId, JobOutcome)>>,
}

impl RecordingCompletionHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<(JobId, JobOutcome)> {
        self.notified.lock().unwrap().clone()
    }
}

impl CompletionHook for RecordingCompletionHook {
    fn notify(&self, job: &Job, outcome: JobOutcome) {
        self.notified.lock().unwrap().push((job.id, outcome));
    }
}

/// A best-effort audit trail entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub at: DateTime<Utc>,
    pub tenant_id: TenantId,
    pub job_id: JobId,
    pub kind: JobKind,
    pub what: String,
    pub detail: Option<String>,
}

impl AuditEvent {
    pub fn for_job(job: &Job, what: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            at: Utc::now(),
            tenant_id: job.tenant_id,
            job_id: job.id,
            kind: job.kind,
            what: what.into(),
            detail,
        }
    }
}

/// Best-effort audit sink; never blocks job processing.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Sink that drops everything.
#[derive(Debug, Default)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: AuditEvent) {}
}

/// In-memory sink for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events.lock().unwrap().push(event);
    }
}
