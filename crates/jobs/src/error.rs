//! Handler error taxonomy and per-domain retryability predicates.
//!
//! Handlers classify failures into transient (retry with backoff) and
//! permanent (fail immediately: validation, auth, malformed payload,
//! not-found). Cancellation is not an error class; it is a distinct terminal
//! outcome that is never retried.

use thiserror::Error;

/// Error returned by a job handler.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobError {
    /// Retryable: network blips, timeouts, deadlocks, contention.
    #[error("{0}")]
    Transient(String),

    /// Non-retryable: validation, auth, malformed payload, not-found.
    #[error("{0}")]
    Permanent(String),

    /// The job was cancelled; the handler unwound at a chunk boundary.
    #[error("job cancelled")]
    Cancelled,
}

impl JobError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, JobError::Transient(_))
    }
}

/// Does the message carry a transient network signature?
///
/// Connection resets, timeouts, upstream 5xx, and 429 rate limiting all
/// clear on their own; everything else is treated as permanent.
pub fn is_transient_network(message: &str) -> bool {
    let m = message.to_ascii_lowercase();
    m.contains("connection")
        || m.contains("timeout")
        || m.contains("timed out")
        || m.contains("429")
        || m.contains("too many requests")
        || m.contains("500")
        || m.contains("502")
        || m.contains("503")
        || m.contains("504")
}

/// Does the message carry a transient database signature?
pub fn is_transient_database(message: &str) -> bool {
    let m = message.to_ascii_lowercase();
    m.contains("connection")
        || m.contains("deadlock")
        || m.contains("lock timeout")
        || m.contains("lock wait")
        || m.contains("could not obtain lock")
}

/// Does the message carry a transient filesystem signature?
pub fn is_transient_filesystem(message: &str) -> bool {
    let m = message.to_ascii_lowercase();
    m.contains("resource busy")
        || m.contains("busy")
        || m.contains("too many open files")
        || m.contains("temporarily unavailable")
}

/// Classify a collaborator error by its network signature.
pub fn classify_network(err: &anyhow::Error) -> JobError {
    let msg = err.to_string();
    if is_transient_network(&msg) {
        JobError::Transient(msg)
    } else {
        JobError::Permanent(msg)
    }
}

/// Classify a collaborator error by its database signature.
pub fn classify_database(err: &anyhow::Error) -> JobError {
    let msg = err.to_string();
    if is_transient_database(&msg) {
        JobError::Transient(msg)
    } else {
        JobError::Permanent(msg)
    }
}

/// Classify a collaborator error by its filesystem signature.
pub fn classify_filesystem(err: &anyhow::Error) -> JobError {
    let msg = err.to_string();
    if is_transient_filesystem(&msg) {
        JobError::Transient(msg)
    } else {
        JobError::Permanent(msg)
    }
}
