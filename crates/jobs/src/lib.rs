//! Background job system: durable queue, worker pool, retry/backoff.
//!
//! ## Design
//!
//! - Jobs are tenant-scoped and typed; handlers are resolved from a registry
//!   keyed by [`JobKind`] (no stringly-typed dispatch)
//! - Delayed work is a durable queue entry with a `run_at` timestamp, never a
//!   bare in-process timer
//! - Claiming is lease-based: a crashed worker's lease expires and the job
//!   becomes eligible for re-claim (at-least-once delivery)
//! - Retry policy with exponential backoff, jitter, and per-domain
//!   retryability predicates
//!
//! ## Components
//!
//! - [`Job`]: job record with payload, lifecycle state, and attempt history
//! - [`JobQueue`]: persistence + atomic state transitions (lease/ack/nack/cancel)
//! - [`WorkerPool`]: bounded-concurrency dispatch with rate limiting
//! - [`RetryExecutor`]: generic retry-with-backoff around any operation

pub mod error;
pub mod hooks;
pub mod queue;
pub mod retry;
pub mod types;
pub mod worker;

pub use error::JobError;
pub use hooks::{
    AuditEvent, AuditSink, CompletionHook, InMemoryAuditSink, JobOutcome, NoopAuditSink,
    NoopCompletionHook, RecordingCompletionHook,
};
pub use queue::{InMemoryJobQueue, JobQueue, JobQueueError, QueueStats};
pub use retry::{BackoffKind, BackoffPolicy, RetryError, RetryExecutor, RetryOutcome};
pub use types::{Job, JobAttemptRecord, JobId, JobKind, JobStatus, Lease};
pub use worker::{
    HandlerRegistry, JobContext, PoolStats, RateLimit, WorkerPool, WorkerPoolConfig,
    WorkerPoolHandle,
};
