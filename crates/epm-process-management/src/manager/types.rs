//! Value types returned by and passed to the manager.

use crate::lifecycle::RestartPolicy;
use chrono::{DateTime, Utc};
use epm_common::ProcessError;
use epm_managed_process::{ProcessHandle, ProcessRecord, ResourceSample};
use epm_process_state::{DesiredState, ProcessState, ProcessStateMachine};
use std::path::PathBuf;
use std::time::Duration;

/// Manager-wide settings
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Monitor loop period
    pub check_interval: Duration,
    /// Overall bound for `shutdown`
    pub shutdown_timeout: Duration,
    /// Graceful stop window for records without their own
    pub graceful_timeout: Duration,
    pub restart_policy: RestartPolicy,
    /// Base for relative executable paths; also the child's cwd
    pub working_directory: Option<PathBuf>,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(30),
            graceful_timeout: Duration::from_secs(10),
            restart_policy: RestartPolicy::default(),
            working_directory: None,
        }
    }
}

/// Read-only copy of one record and its runtime state
#[derive(Debug, Clone)]
pub struct ProcessSnapshot {
    pub record: ProcessRecord,
    pub current_state: ProcessState,
    pub desired_state: DesiredState,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub restart_count: u32,
    pub last_exit_code: Option<i32>,
    /// Set while a crashed process waits out its backoff
    pub next_restart_at: Option<DateTime<Utc>>,
    pub resources: Option<ResourceSample>,
}

impl ProcessSnapshot {
    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn is_running(&self) -> bool {
        self.current_state == ProcessState::Running
    }
}

/// Per-process outcome of a bulk operation
#[derive(Debug, Default)]
pub struct GroupResult {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, ProcessError)>,
}

impl GroupResult {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub(crate) fn collect(results: Vec<(String, Result<(), ProcessError>)>) -> Self {
        let mut group = GroupResult::default();
        for (name, result) in results {
            match result {
                Ok(()) => group.succeeded.push(name),
                Err(e) => group.failed.push((name, e)),
            }
        }
        group
    }
}

/// Why a launch is happening; decides the event and failure handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StartCause {
    /// `start_process` by a caller
    Manual,
    /// `restart_process` by a caller
    Restart,
    /// Monitor loop bringing back a crashed process
    AutoRestart,
}

/// Mutable state of one record. Guarded by a `parking_lot::Mutex` that is
/// never held across an await.
#[derive(Debug)]
pub(crate) struct SlotRuntime {
    pub state: ProcessStateMachine,
    pub desired: DesiredState,
    pub handle: Option<ProcessHandle>,
    pub restart_count: u32,
    pub last_exit_code: Option<i32>,
    pub next_restart_at: Option<DateTime<Utc>>,
    pub last_sample: Option<ResourceSample>,
}

impl SlotRuntime {
    pub fn new(name: &str) -> Self {
        Self {
            state: ProcessStateMachine::new(name),
            desired: DesiredState::Stopped,
            handle: None,
            restart_count: 0,
            last_exit_code: None,
            next_restart_at: None,
            last_sample: None,
        }
    }

    pub fn current(&self) -> ProcessState {
        self.state.current_state()
    }
}
