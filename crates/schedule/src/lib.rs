//! Recurring report schedules.
//!
//! ## Design
//!
//! - [`ScheduleSpec`] describes a recurrence (daily/weekly/monthly/quarterly
//!   at a time of day in a fixed UTC offset)
//! - [`compute_next_run`] turns a spec plus "now" into the next occurrence,
//!   always strictly in the future
//! - [`RecurrenceScheduler`] arms each occurrence as a durable delayed queue
//!   entry and re-arms after every successful run, producing a
//!   self-perpetuating chain that survives restarts

pub mod scheduler;
pub mod spec;
pub mod store;

pub use scheduler::{RecurrenceScheduler, ScheduledReportPayload, SchedulerError};
pub use spec::{compute_next_run, Frequency, ScheduleSpec, TimeOfDay};
pub use store::{InMemoryScheduleStore, Schedule, ScheduleStore, ScheduleStoreError};
