//! ProcessController trait - OS-level spawn, terminate and liveness checks
//!
//! The controller knows nothing about the registry, dependencies or
//! restart policy. None of its operations are idempotent at the OS level
//! (launching twice creates two processes); the manager enforces
//! idempotence one layer up.

use crate::record::ProcessRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use epm_common::ProcessResult;
use std::fmt;
use std::time::Duration;

/// How a process ended, as far as the OS told us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Code(i32),
    /// Killed by a signal, already reaped elsewhere, or never reported
    Unknown,
}

impl ExitOutcome {
    pub fn code(&self) -> Option<i32> {
        match self {
            ExitOutcome::Code(code) => Some(*code),
            ExitOutcome::Unknown => None,
        }
    }
}

impl From<Option<i32>> for ExitOutcome {
    fn from(code: Option<i32>) -> Self {
        code.map(ExitOutcome::Code).unwrap_or(ExitOutcome::Unknown)
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitOutcome::Code(code) => write!(f, "exit code {}", code),
            ExitOutcome::Unknown => write!(f, "unknown exit status"),
        }
    }
}

/// Result of a non-blocking liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Exited(ExitOutcome),
}

impl Liveness {
    pub fn is_alive(&self) -> bool {
        matches!(self, Liveness::Alive)
    }
}

/// Live handle to a launched process.
///
/// Controllers that spawn real children keep the `tokio::process::Child`
/// here so exit status can be reaped; test controllers leave it empty.
#[derive(Debug)]
pub struct ProcessHandle {
    pub name: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub child: Option<tokio::process::Child>,
}

impl ProcessHandle {
    pub fn new(name: impl Into<String>, pid: u32) -> Self {
        Self {
            name: name.into(),
            pid,
            started_at: Utc::now(),
            child: None,
        }
    }

    pub fn with_child(mut self, child: tokio::process::Child) -> Self {
        self.child = Some(child);
        self
    }

    pub fn uptime(&self) -> chrono::Duration {
        Utc::now() - self.started_at
    }
}

/// OS-level process operations for one record at a time.
#[async_trait]
pub trait ProcessController: Send + Sync {
    /// Spawn the executable described by `record`.
    ///
    /// Returns once the OS has confirmed the process exists. Fails with
    /// `ProcessError::LaunchFailed` when the path is missing, not
    /// executable, or the spawn itself fails.
    async fn launch(&self, record: &ProcessRecord) -> ProcessResult<ProcessHandle>;

    /// Stop the process behind `handle`.
    ///
    /// With `graceful`, sends a cooperative shutdown signal and waits up to
    /// `timeout` before escalating to a forceful kill. Fails with
    /// `ProcessError::TerminateFailed` only if the OS refuses both.
    async fn terminate(
        &self,
        handle: &mut ProcessHandle,
        graceful: bool,
        timeout: Duration,
    ) -> ProcessResult<ExitOutcome>;

    /// Non-blocking liveness check. Reaps the exit status when available.
    fn is_alive(&self, handle: &mut ProcessHandle) -> ProcessResult<Liveness>;
}
