//! Tracing/logging initialization.
//!
//! Workers log structured fields (job_id, kind, worker, attempt) on every
//! state decision; this module only decides how those end up on stdout.

use tracing_subscriber::EnvFilter;

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// JSON lines, for log shippers.
    #[default]
    Json,
    /// Human-readable, for local development.
    Pretty,
}

/// Initialize tracing with the default (JSON) format.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    init_with(LogFormat::default());
}

/// Initialize tracing with an explicit format.
///
/// The filter comes from `RUST_LOG`, defaulting to `info`.
pub fn init_with(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false);

    let _ = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
}
