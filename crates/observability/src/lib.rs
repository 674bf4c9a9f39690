//! Observability wiring for ReportForge services.

pub mod tracing;

pub use tracing::{init, init_with, LogFormat};
