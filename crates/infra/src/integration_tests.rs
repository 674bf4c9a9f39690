//! End-to-end tests for the assembled job core.
//!
//! Exercises: enqueue → worker lease → chunked export → progress/cancellation
//! → completion hook, plus the scheduled-report re-arm chain.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reportforge_core::{ReportId, TenantId};
use reportforge_export::{
    ArtifactSink, DataQuery, DataSource, ExportFormat, InMemoryArtifactSink, InMemoryDataSource,
    Row,
};
use reportforge_jobs::{
    InMemoryAuditSink, Job, JobKind, JobOutcome, JobQueue, JobStatus, RecordingCompletionHook,
    WorkerPoolConfig,
};
use reportforge_schedule::{ScheduleSpec, ScheduledReportPayload};

use crate::context::{EnqueueOptions, JobRuntime, JobRuntimeBuilder, JobRuntimeConfig};
use crate::handlers::ExportPayload;
use crate::report_store::{InMemoryReportConfigStore, ReportConfig, ReportConfigStore};

fn wait_until(timeout: Duration, f: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if f() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    f()
}

fn fast_config(chunk_size: usize) -> JobRuntimeConfig {
    JobRuntimeConfig {
        worker: WorkerPoolConfig::default()
            .with_name("itest")
            .with_concurrency(2)
            .with_poll_interval(Duration::from_millis(5)),
        chunk_size,
    }
}

struct Fixture {
    tenant: TenantId,
    report_id: ReportId,
    sink: Arc<InMemoryArtifactSink>,
    hook: Arc<RecordingCompletionHook>,
    audit: Arc<InMemoryAuditSink>,
    runtime: JobRuntime,
}

fn setup(rows: usize, chunk_size: usize) -> Fixture {
    setup_with_source(Arc::new(InMemoryDataSource::numbered(rows)), chunk_size)
}

fn setup_with_source(source: Arc<dyn DataSource>, chunk_size: usize) -> Fixture {
    let tenant = TenantId::new();
    let reports = InMemoryReportConfigStore::arc();
    let report_id = reports
        .insert(ReportConfig {
            id: ReportId::new(),
            tenant_id: tenant,
            name: "invoices".to_string(),
            query: DataQuery::default(),
            columns: vec!["id".to_string(), "name".to_string()],
            format: ExportFormat::Csv,
        })
        .unwrap();

    let sink = Arc::new(InMemoryArtifactSink::new());
    let hook = Arc::new(RecordingCompletionHook::new());
    let audit = Arc::new(InMemoryAuditSink::new());

    let runtime = JobRuntimeBuilder::new(reports, source, sink.clone())
        .with_completion_hook(hook.clone())
        .with_audit_sink(audit.clone())
        .with_config(fast_config(chunk_size))
        .start();

    Fixture {
        tenant,
        report_id,
        sink,
        hook,
        audit,
        runtime,
    }
}

fn export_payload(report_id: ReportId) -> ExportPayload {
    ExportPayload {
        report_id,
        format: None,
        requested_by: None,
        recipients: vec!["ops@example.com".to_string()],
    }
}

#[test]
fn export_job_end_to_end() {
    let fx = setup(2500, 1000);

    let job_id = fx
        .runtime
        .enqueue_export(fx.tenant, export_payload(fx.report_id), EnqueueOptions::default())
        .unwrap();

    assert!(wait_until(Duration::from_secs(10), || {
        matches!(
            fx.runtime.status(fx.tenant, job_id).unwrap().unwrap().status,
            JobStatus::Completed
        )
    }));

    let job = fx.runtime.status(fx.tenant, job_id).unwrap().unwrap();
    assert_eq!(job.progress, Some(100));
    assert!(job.finished_at.is_some());

    // Exactly one artifact: header + 2500 rows, chunks cleaned up.
    let paths = fx.sink.paths();
    assert_eq!(paths.len(), 1);
    let text = String::from_utf8(fx.sink.read(&paths[0]).unwrap()).unwrap();
    assert_eq!(text.lines().count(), 2501);
    assert!(text.starts_with("id,name\n"));

    assert_eq!(fx.hook.notifications(), vec![(job_id, JobOutcome::Completed)]);

    let stats = fx.runtime.queue_stats(Some(fx.tenant)).unwrap();
    assert_eq!(stats.completed, 1);

    fx.runtime.shutdown();
}

#[test]
fn scheduled_occurrence_exports_and_rearms_the_chain() {
    let fx = setup(120, 50);

    let schedule_id = fx
        .runtime
        .create_schedule(
            fx.tenant,
            fx.report_id,
            ScheduleSpec::daily(9, 0),
            vec!["ops@example.com".to_string()],
        )
        .unwrap();

    let armed = fx
        .runtime
        .get_schedule(fx.tenant, schedule_id)
        .unwrap()
        .unwrap();
    let future_job = armed.queued_job.unwrap();

    // Simulate the armed occurrence coming due without waiting a day.
    let payload = ScheduledReportPayload {
        schedule_id,
        report_id: fx.report_id,
        recipients: armed.recipients.clone(),
    };
    let due_job = fx
        .runtime
        .queue()
        .enqueue(Job::new(
            fx.tenant,
            JobKind::ScheduledReport,
            serde_json::to_value(&payload).unwrap(),
        ))
        .unwrap();

    assert!(wait_until(Duration::from_secs(10), || {
        matches!(
            fx.runtime.status(fx.tenant, due_job).unwrap().unwrap().status,
            JobStatus::Completed
        )
    }));

    // The run produced an artifact and re-armed a fresh occurrence.
    assert_eq!(fx.sink.paths().len(), 1);
    let rearmed = fx
        .runtime
        .get_schedule(fx.tenant, schedule_id)
        .unwrap()
        .unwrap();
    let next_job = rearmed.queued_job.unwrap();
    assert_ne!(next_job, future_job);
    assert_ne!(next_job, due_job);
    assert!(rearmed.next_run_at.unwrap() > chrono::Utc::now());

    let queued = fx.runtime.status(fx.tenant, next_job).unwrap().unwrap();
    assert!(matches!(queued.status, JobStatus::Pending));

    fx.runtime.shutdown();
}

/// Data source that takes its time per page so cancellation can land
/// mid-export.
struct SlowSource {
    inner: InMemoryDataSource,
    page_delay: Duration,
}

impl DataSource for SlowSource {
    fn count(&self, query: &DataQuery) -> anyhow::Result<usize> {
        self.inner.count(query)
    }

    fn page(&self, query: &DataQuery, offset: usize, limit: usize) -> anyhow::Result<Vec<Row>> {
        std::thread::sleep(self.page_delay);
        self.inner.page(query, offset, limit)
    }
}

#[test]
fn cancelled_export_leaves_no_artifacts() {
    let fx = setup_with_source(
        Arc::new(SlowSource {
            inner: InMemoryDataSource::numbered(500),
            page_delay: Duration::from_millis(15),
        }),
        10,
    );

    let job_id = fx
        .runtime
        .enqueue_export(fx.tenant, export_payload(fx.report_id), EnqueueOptions::default())
        .unwrap();

    // Wait until the export is demonstrably mid-flight.
    assert!(wait_until(Duration::from_secs(5), || {
        fx.runtime
            .status(fx.tenant, job_id)
            .unwrap()
            .unwrap()
            .progress
            .unwrap_or(0)
            > 0
    }));

    assert!(fx.runtime.cancel(job_id));

    assert!(wait_until(Duration::from_secs(10), || {
        fx.runtime
            .pool_stats()
            .map(|s| s.cancelled == 1)
            .unwrap_or(false)
    }));

    let job = fx.runtime.status(fx.tenant, job_id).unwrap().unwrap();
    assert!(matches!(job.status, JobStatus::Cancelled));
    assert!(fx.sink.paths().is_empty(), "leftovers: {:?}", fx.sink.paths());
    assert_eq!(fx.hook.notifications(), vec![(job_id, JobOutcome::Cancelled)]);

    fx.runtime.shutdown();
}

#[test]
fn missing_report_fails_without_retries() {
    let fx = setup(10, 10);

    let job_id = fx
        .runtime
        .enqueue_export(
            fx.tenant,
            export_payload(ReportId::new()),
            EnqueueOptions {
                max_attempts: Some(5),
                ..Default::default()
            },
        )
        .unwrap();

    assert!(wait_until(Duration::from_secs(10), || {
        matches!(
            fx.runtime.status(fx.tenant, job_id).unwrap().unwrap().status,
            JobStatus::Failed { .. }
        )
    }));

    let job = fx.runtime.status(fx.tenant, job_id).unwrap().unwrap();
    match &job.status {
        JobStatus::Failed { error, attempts } => {
            assert!(error.contains("report not found"));
            assert_eq!(*attempts, 1, "permanent errors must not retry");
        }
        other => panic!("expected failed, got {other:?}"),
    }
    assert_eq!(fx.hook.notifications(), vec![(job_id, JobOutcome::Failed)]);

    fx.runtime.shutdown();
}

#[test]
fn usage_rollup_lands_in_the_audit_trail() {
    let fx = setup(10, 10);

    let job_id = fx
        .runtime
        .queue()
        .enqueue(Job::new(fx.tenant, JobKind::UsageRollup, serde_json::json!({})))
        .unwrap();

    assert!(wait_until(Duration::from_secs(10), || {
        matches!(
            fx.runtime.status(fx.tenant, job_id).unwrap().unwrap().status,
            JobStatus::Completed
        )
    }));
    fx.runtime.shutdown();

    let events = fx.audit.events();
    assert!(events.iter().any(|e| e.what == "usage_rollup"));
    assert!(events.iter().any(|e| e.what == "completed"));
}

#[test]
fn delayed_export_waits_for_run_at() {
    let fx = setup(10, 10);

    let job_id = fx
        .runtime
        .enqueue_export(
            fx.tenant,
            export_payload(fx.report_id),
            EnqueueOptions {
                delay: Some(Duration::from_secs(3600)),
                ..Default::default()
            },
        )
        .unwrap();

    // Give the workers a few poll cycles; the job must stay pending.
    std::thread::sleep(Duration::from_millis(100));
    let job = fx.runtime.status(fx.tenant, job_id).unwrap().unwrap();
    assert!(matches!(job.status, JobStatus::Pending));
    assert_eq!(job.attempts, 0);

    fx.runtime.shutdown();
}
