//! Job handlers: the glue between queue jobs and the export/schedule
//! subsystems.
//!
//! Collaborator failures are classified here, at the boundary: data-source
//! errors by their database signature, sink errors by their filesystem
//! signature. The pipeline and queue stay domain-agnostic.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use reportforge_core::{ReportId, UserId};
use reportforge_export::{
    Artifact, ArtifactSink, DataSource, ExportError, ExportFormat, ExportPipeline, ExportRequest,
};
use reportforge_jobs::error::{classify_database, classify_filesystem};
use reportforge_jobs::{AuditEvent, AuditSink, JobContext, JobError, JobQueue};
use reportforge_schedule::{RecurrenceScheduler, ScheduleStore, ScheduledReportPayload};

use crate::report_store::{ReportConfig, ReportConfigStore, ReportStoreError};

/// Payload of an ad-hoc `Export` job, owned by the API-facing enqueuer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportPayload {
    pub report_id: ReportId,
    /// Overrides the report's configured format when set.
    #[serde(default)]
    pub format: Option<ExportFormat>,
    #[serde(default)]
    pub requested_by: Option<UserId>,
    /// Notified on completion; resolved by the notification hook.
    #[serde(default)]
    pub recipients: Vec<String>,
}

/// Payload of a `UsageRollup` job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageRollupPayload {
    /// Days of history to fold into the rollup.
    #[serde(default = "default_window_days")]
    pub window_days: u32,
}

fn default_window_days() -> u32 {
    1
}

/// Handler for ad-hoc exports.
pub fn export_handler(
    reports: Arc<dyn ReportConfigStore>,
    source: Arc<dyn DataSource>,
    sink: Arc<dyn ArtifactSink>,
    chunk_size: usize,
) -> impl Fn(&JobContext<'_>) -> Result<(), JobError> + Send + Sync + 'static {
    move |ctx| {
        let payload: ExportPayload = ctx.payload()?;
        let config = load_report(reports.as_ref(), ctx, payload.report_id)?;
        run_report_export(
            ctx,
            &config,
            payload.format,
            source.as_ref(),
            sink.as_ref(),
            chunk_size,
        )
        .map(|_| ())
    }
}

/// Handler for scheduled report occurrences: export, then re-arm the chain.
pub fn scheduled_report_handler<Q, S>(
    scheduler: Arc<RecurrenceScheduler<Q, S>>,
    reports: Arc<dyn ReportConfigStore>,
    source: Arc<dyn DataSource>,
    sink: Arc<dyn ArtifactSink>,
    chunk_size: usize,
) -> impl Fn(&JobContext<'_>) -> Result<(), JobError> + Send + Sync + 'static
where
    Q: JobQueue + 'static,
    S: ScheduleStore + 'static,
{
    move |ctx| {
        let payload: ScheduledReportPayload = ctx.payload()?;
        let config = load_report(reports.as_ref(), ctx, payload.report_id)?;
        run_report_export(ctx, &config, None, source.as_ref(), sink.as_ref(), chunk_size)?;

        // The export succeeded; a re-arm failure must not fail (and re-run)
        // the occurrence. It is logged and left to the next schedule edit.
        match scheduler.on_run_completed(ctx.job().tenant_id, payload.schedule_id) {
            Ok(Some(next)) => debug!(schedule_id = %payload.schedule_id, next_run = %next, "chain re-armed"),
            Ok(None) => debug!(schedule_id = %payload.schedule_id, "schedule inactive, chain stopped"),
            Err(e) => {
                warn!(schedule_id = %payload.schedule_id, error = %e, "failed to re-arm schedule");
            }
        }
        Ok(())
    }
}

/// Handler for periodic usage rollups: folds queue counts into the audit
/// trail.
pub fn usage_rollup_handler(
    queue: Arc<dyn JobQueue>,
    audit: Arc<dyn AuditSink>,
) -> impl Fn(&JobContext<'_>) -> Result<(), JobError> + Send + Sync + 'static {
    move |ctx| {
        let payload: UsageRollupPayload = ctx.payload()?;
        let stats = queue
            .stats(Some(ctx.job().tenant_id))
            .map_err(|e| JobError::transient(e.to_string()))?;

        let detail = serde_json::to_string(&stats).ok();
        audit.record(AuditEvent::for_job(ctx.job(), "usage_rollup", detail));
        debug!(window_days = payload.window_days, "usage rollup recorded");
        Ok(())
    }
}

fn load_report(
    reports: &dyn ReportConfigStore,
    ctx: &JobContext<'_>,
    report_id: ReportId,
) -> Result<ReportConfig, JobError> {
    reports
        .get(ctx.job().tenant_id, report_id)
        .map_err(|e| match e {
            ReportStoreError::Storage(msg) => classify_database(&anyhow::anyhow!(msg)),
            other => JobError::permanent(other.to_string()),
        })?
        .ok_or_else(|| JobError::permanent(format!("report not found: {report_id}")))
}

/// Run the chunked pipeline for one report, wiring progress and cancellation
/// to the job context.
///
/// The artifact prefix includes the delivery attempt, so a redelivery after a
/// lease reclaim starts from chunk 0 in a fresh namespace.
fn run_report_export(
    ctx: &JobContext<'_>,
    config: &ReportConfig,
    format_override: Option<ExportFormat>,
    source: &dyn DataSource,
    sink: &dyn ArtifactSink,
    chunk_size: usize,
) -> Result<Artifact, JobError> {
    let job = ctx.job();
    let format = format_override.unwrap_or(config.format);
    let request = ExportRequest {
        prefix: format!("exports/{}/{}-a{}", job.tenant_id, job.id, job.attempts),
        query: config.query.clone(),
        columns: config.columns.clone(),
    };

    let progress = |percent: u8| ctx.set_progress(percent);
    let cancel = || ctx.is_cancelled();

    ExportPipeline::new(format)
        .with_chunk_size(chunk_size)
        .run(source, sink, &request, &progress, &cancel)
        .map_err(map_export_error)
}

fn map_export_error(err: ExportError) -> JobError {
    match err {
        ExportError::Cancelled => JobError::Cancelled,
        ExportError::InvalidChunkSize => JobError::permanent(err.to_string()),
        ExportError::Source(e) => classify_database(&e),
        ExportError::Sink(e) => classify_filesystem(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report_store::InMemoryReportConfigStore;
    use reportforge_core::TenantId;
    use reportforge_export::{DataQuery, InMemoryArtifactSink, InMemoryDataSource};
    use reportforge_jobs::{InMemoryJobQueue, Job, JobKind};
    use std::time::Duration;

    fn report_for(tenant: TenantId) -> ReportConfig {
        ReportConfig {
            id: ReportId::new(),
            tenant_id: tenant,
            name: "invoices".to_string(),
            query: DataQuery::default(),
            columns: vec!["id".to_string(), "name".to_string()],
            format: ExportFormat::Csv,
        }
    }

    #[test]
    fn export_handler_produces_artifact_and_progress() {
        let queue = InMemoryJobQueue::arc();
        let tenant = TenantId::new();
        let reports = InMemoryReportConfigStore::arc();
        let sink = Arc::new(InMemoryArtifactSink::new());

        let config = report_for(tenant);
        let report_id = reports.insert(config).unwrap();

        let payload = ExportPayload {
            report_id,
            format: None,
            requested_by: None,
            recipients: vec![],
        };
        let job_id = queue
            .enqueue(Job::new(
                tenant,
                JobKind::Export,
                serde_json::to_value(&payload).unwrap(),
            ))
            .unwrap();
        let job = queue
            .claim_next("w1", Duration::from_secs(30), None)
            .unwrap()
            .unwrap();

        let handler = export_handler(
            reports,
            Arc::new(InMemoryDataSource::numbered(25)),
            sink.clone(),
            10,
        );
        let ctx = JobContext::new(&job, &queue);
        handler(&ctx).unwrap();

        let job = queue.get(tenant, job_id).unwrap().unwrap();
        assert_eq!(job.progress, Some(100));
        assert_eq!(sink.paths().len(), 1, "chunks cleaned, one final artifact");
    }

    #[test]
    fn missing_report_is_a_permanent_failure() {
        let queue = InMemoryJobQueue::arc();
        let tenant = TenantId::new();

        let payload = ExportPayload {
            report_id: ReportId::new(),
            format: None,
            requested_by: None,
            recipients: vec![],
        };
        queue
            .enqueue(Job::new(
                tenant,
                JobKind::Export,
                serde_json::to_value(&payload).unwrap(),
            ))
            .unwrap();
        let job = queue
            .claim_next("w1", Duration::from_secs(30), None)
            .unwrap()
            .unwrap();

        let handler = export_handler(
            InMemoryReportConfigStore::arc(),
            Arc::new(InMemoryDataSource::numbered(5)),
            Arc::new(InMemoryArtifactSink::new()),
            10,
        );
        let ctx = JobContext::new(&job, &queue);
        let err = handler(&ctx).unwrap_err();

        assert!(matches!(err, JobError::Permanent(_)));
    }

    #[test]
    fn malformed_payload_is_permanent() {
        let queue = InMemoryJobQueue::arc();
        let tenant = TenantId::new();

        queue
            .enqueue(Job::new(
                tenant,
                JobKind::Export,
                serde_json::json!({"report_id": 42}),
            ))
            .unwrap();
        let job = queue
            .claim_next("w1", Duration::from_secs(30), None)
            .unwrap()
            .unwrap();

        let handler = export_handler(
            InMemoryReportConfigStore::arc(),
            Arc::new(InMemoryDataSource::numbered(5)),
            Arc::new(InMemoryArtifactSink::new()),
            10,
        );
        let ctx = JobContext::new(&job, &queue);
        let err = handler(&ctx).unwrap_err();

        assert!(matches!(err, JobError::Permanent(_)));
    }
}
