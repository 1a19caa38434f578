//! # EPM Process Management
//!
//! Supervision engine for external executables.
//!
//! This crate provides:
//! - `ExeProcessManager` - registry, dependency-ordered start, stop/restart,
//!   the monitoring loop with auto-restart, group operations and shutdown
//! - `OsProcessController` - tokio-based `ProcessController` for real processes
//! - `RestartPolicy` - what the monitor does after a crash
//! - YAML configuration loading
//!
//! **Architecture:**
//! ```text
//! monitor loop ──┐                      ┌── OsProcessController (spawn / SIGTERM / SIGKILL)
//!                ├─> ExeProcessManager ─┼── EventSink (Started, Crashed, ...)
//! scheduler ─────┘   (lock per record)  └── MetricsSource (cpu, memory)
//! ```

pub mod config;
pub mod lifecycle;
pub mod manager;
pub mod process_control_impl;

// Re-export main types
pub use config::{ProcmanConfig, ProcessManagerOptions, ProcessConfig, ScheduleConfig};
pub use lifecycle::{RestartDecision, RestartPolicy};
pub use manager::{
    ExeProcessManager, GroupResult, ManagerOptions, ProcessSnapshot, ScheduledAction,
};
pub use process_control_impl::OsProcessController;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
