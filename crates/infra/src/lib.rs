//! Runtime wiring: explicit context object, report configuration store, and
//! the job handlers that connect the queue, scheduler, and export pipeline.

pub mod context;
pub mod handlers;
pub mod report_store;

#[cfg(test)]
mod integration_tests;

pub use context::{EnqueueOptions, JobRuntime, JobRuntimeBuilder, JobRuntimeConfig};
pub use handlers::{ExportPayload, UsageRollupPayload};
pub use report_store::{InMemoryReportConfigStore, ReportConfig, ReportConfigStore, ReportStoreError};
