//! Error types for the process manager.
//!
//! Every library operation returns [`ProcessResult`]. Variants are
//! struct-like so callers can pattern match on the name of the process (or
//! job) involved without parsing the message.
//!
//! ```rust
//! use epm_common::{ProcessError, ProcessResult};
//!
//! fn lookup(name: &str) -> ProcessResult<()> {
//!     Err(ProcessError::not_found(name))
//! }
//!
//! match lookup("worker") {
//!     Err(ProcessError::NotFound { id }) => assert_eq!(id, "worker"),
//!     _ => unreachable!(),
//! }
//! ```

use thiserror::Error;

/// Errors produced by the controller, the manager and the scheduler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    #[error("Process not found: {id}")]
    NotFound { id: String },

    /// A record with the same name is already registered.
    #[error("Process already registered: {id}")]
    DuplicateName { id: String },

    /// Spawning the OS process failed (missing executable, permission denied, ...).
    #[error("Process launch failed: {id} - {reason}")]
    LaunchFailed { id: String, reason: String },

    /// The OS refused both the graceful signal and the forced kill.
    #[error("Process terminate failed: {id} - {reason}")]
    TerminateFailed { id: String, reason: String },

    /// Dependency resolution found a cycle. `chain` lists the names in
    /// visiting order, ending with the name that closed the cycle.
    #[error("Dependency cycle detected: {}", chain.join(" -> "))]
    DependencyCycle { chain: Vec<String> },

    #[error("Dependency not running: {id} requires {dependency}")]
    DependencyNotRunning { id: String, dependency: String },

    /// The record is not stopped, so it cannot be removed.
    #[error("Process busy: {id} (state: {state})")]
    ProcessBusy { id: String, state: String },

    #[error("Invalid trigger: {reason}")]
    InvalidTrigger { reason: String },

    #[error("Job failed: {id} - {reason}")]
    JobFailed { id: String, reason: String },

    /// The OS refused to change the scheduling priority.
    #[error("Process priority change failed: {id} - {reason}")]
    PriorityFailed { id: String, reason: String },

    #[error("Process timeout: {id} - {operation}")]
    Timeout { id: String, operation: String },

    #[error("Process state error: {id} - expected {expected}, got {actual}")]
    InvalidState {
        id: String,
        expected: String,
        actual: String,
    },

    #[error("Process operation not allowed: {id} - {operation} (state: {state})")]
    OperationNotAllowed {
        id: String,
        operation: String,
        state: String,
    },

    #[error("Process configuration error: {id} - {reason}")]
    Configuration { id: String, reason: String },

    #[error("Process monitoring error: {id} - {reason}")]
    MonitoringError { id: String, reason: String },
}

impl ProcessError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    pub fn duplicate_name(id: impl Into<String>) -> Self {
        Self::DuplicateName { id: id.into() }
    }

    pub fn launch_failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::LaunchFailed {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn terminate_failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TerminateFailed {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn dependency_cycle(chain: Vec<String>) -> Self {
        Self::DependencyCycle { chain }
    }

    pub fn dependency_not_running(id: impl Into<String>, dependency: impl Into<String>) -> Self {
        Self::DependencyNotRunning {
            id: id.into(),
            dependency: dependency.into(),
        }
    }

    pub fn process_busy(id: impl Into<String>, state: impl Into<String>) -> Self {
        Self::ProcessBusy {
            id: id.into(),
            state: state.into(),
        }
    }

    pub fn invalid_trigger(reason: impl Into<String>) -> Self {
        Self::InvalidTrigger {
            reason: reason.into(),
        }
    }

    pub fn job_failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::JobFailed {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn priority_failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PriorityFailed {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn timeout(id: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Timeout {
            id: id.into(),
            operation: operation.into(),
        }
    }

    pub fn invalid_state(
        id: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            id: id.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn operation_not_allowed(
        id: impl Into<String>,
        operation: impl Into<String>,
        state: impl Into<String>,
    ) -> Self {
        Self::OperationNotAllowed {
            id: id.into(),
            operation: operation.into(),
            state: state.into(),
        }
    }

    pub fn configuration(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn monitoring(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MonitoringError {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for process operations.
pub type ProcessResult<T> = std::result::Result<T, ProcessError>;
