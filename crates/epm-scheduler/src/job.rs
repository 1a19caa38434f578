//! What a job does when it fires.

use crate::trigger::Trigger;
use chrono::{DateTime, Utc};
use epm_common::{JobId, ProcessResult};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

type CustomFn = dyn Fn() -> BoxFuture<'static, ProcessResult<()>> + Send + Sync;

/// A named async callback.
#[derive(Clone)]
pub struct CustomAction {
    pub name: String,
    func: Arc<CustomFn>,
}

impl CustomAction {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, ProcessResult<()>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub(crate) fn invoke(&self) -> BoxFuture<'static, ProcessResult<()>> {
        (self.func)()
    }
}

impl fmt::Debug for CustomAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomAction").field("name", &self.name).finish()
    }
}

/// Action performed when a job fires.
///
/// Process actions carry the process name and are routed to the
/// scheduler's `JobTarget`. Only `Custom` holds code, and it is skipped
/// when serializing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", content = "process", rename_all = "snake_case")]
pub enum JobAction {
    StartProcess(String),
    StopProcess(String),
    RestartProcess(String),
    #[serde(skip)]
    Custom(CustomAction),
}

impl JobAction {
    pub fn custom<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, ProcessResult<()>> + Send + Sync + 'static,
    {
        JobAction::Custom(CustomAction::new(name, func))
    }

    /// Process the action targets, if any
    pub fn process_name(&self) -> Option<&str> {
        match self {
            JobAction::StartProcess(name)
            | JobAction::StopProcess(name)
            | JobAction::RestartProcess(name) => Some(name),
            JobAction::Custom(_) => None,
        }
    }
}

impl fmt::Display for JobAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobAction::StartProcess(name) => write!(f, "start {}", name),
            JobAction::StopProcess(name) => write!(f, "stop {}", name),
            JobAction::RestartProcess(name) => write!(f, "restart {}", name),
            JobAction::Custom(custom) => write!(f, "custom {}", custom.name),
        }
    }
}

/// A pending job held by the scheduler.
#[derive(Debug, Clone)]
pub(crate) struct ScheduledJob {
    pub id: JobId,
    pub action: JobAction,
    pub trigger: Trigger,
    pub next_run_at: DateTime<Utc>,
    pub fire_count: u64,
    pub last_fired_at: Option<DateTime<Utc>>,
}

impl ScheduledJob {
    pub fn info(&self) -> JobInfo {
        JobInfo {
            id: self.id,
            description: self.action.to_string(),
            trigger: self.trigger,
            next_run_at: self.next_run_at,
            fire_count: self.fire_count,
            last_fired_at: self.last_fired_at,
        }
    }
}

/// Read-only view of a pending job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobInfo {
    pub id: JobId,
    pub description: String,
    pub trigger: Trigger,
    pub next_run_at: DateTime<Utc>,
    pub fire_count: u64,
    pub last_fired_at: Option<DateTime<Utc>>,
}
