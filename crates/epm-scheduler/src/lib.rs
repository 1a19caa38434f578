//! # EPM Scheduler
//!
//! Time-triggered jobs that start, stop or restart managed processes, or
//! run arbitrary async callbacks.
//!
//! ```text
//! Scheduler::run ──sleep until earliest next_run_at (or poll interval)──┐
//!      ^                                                                 │
//!      └──── take_due(now): due jobs in (next_run_at, id) order <────────┘
//!                 │
//!                 └── tokio::spawn per job ──> JobTarget / custom callback
//! ```
//!
//! Each firing runs on its own task so a hanging action never delays other
//! jobs. Recurring jobs are rescheduled from their last *scheduled* time,
//! not from when they actually ran, so load does not accumulate drift.

pub mod job;
pub mod scheduler;
pub mod target;
pub mod trigger;

pub use job::{CustomAction, JobAction, JobInfo};
pub use scheduler::{DueJob, Scheduler, SchedulerConfig};
pub use target::JobTarget;
pub use trigger::{parse_time_of_day, Trigger};
