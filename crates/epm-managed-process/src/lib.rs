//! # EPM Managed Process
//!
//! Records and collaborator interfaces for supervised processes.
//!
//! This crate provides:
//! - `ProcessRecord`, the static description of one managed executable
//! - `ProcessController`, the seam between the manager and the OS
//! - `EventSink`, notified on every lifecycle event
//! - `MetricsSource`, polled for cpu and memory numbers
//!
//! **Architecture:**
//! ```text
//! ExeProcessManager (orchestration, in epm-process-management)
//!       | uses
//!       +--> ProcessController trait --> OsProcessController / test mocks
//!       +--> EventSink trait         --> LogEventSink / MemoryEventSink / notifiers
//!       +--> MetricsSource trait     --> SysinfoMetrics (epm-resource-monitor)
//! ```

pub mod controller;
pub mod events;
pub mod metrics;
pub mod record;

pub use controller::{ExitOutcome, Liveness, ProcessController, ProcessHandle};
pub use events::{EventKind, EventSink, LogEventSink, MemoryEventSink, ProcessEvent};
pub use metrics::{MetricsSource, ResourceSample};
pub use record::ProcessRecord;
