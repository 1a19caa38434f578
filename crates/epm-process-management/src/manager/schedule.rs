//! Scheduler glue: time-based process actions
//!
//! The manager is a `JobTarget`, so a `Scheduler` holding it routes
//! start/stop/restart jobs straight into the lifecycle operations.

use super::ExeProcessManager;
use async_trait::async_trait;
use epm_common::{JobId, ProcessError, ProcessResult};
use epm_scheduler::{JobAction, JobTarget, Scheduler, Trigger};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::info;

/// Lifecycle action a schedule entry performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduledAction {
    Start,
    Stop,
    Restart,
}

impl ScheduledAction {
    pub fn job_action(&self, process: &str) -> JobAction {
        let process = process.to_string();
        match self {
            ScheduledAction::Start => JobAction::StartProcess(process),
            ScheduledAction::Stop => JobAction::StopProcess(process),
            ScheduledAction::Restart => JobAction::RestartProcess(process),
        }
    }
}

impl fmt::Display for ScheduledAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScheduledAction::Start => "start",
            ScheduledAction::Stop => "stop",
            ScheduledAction::Restart => "restart",
        };
        f.write_str(s)
    }
}

impl FromStr for ScheduledAction {
    type Err = ProcessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "start" => Ok(ScheduledAction::Start),
            "stop" => Ok(ScheduledAction::Stop),
            "restart" => Ok(ScheduledAction::Restart),
            other => Err(ProcessError::invalid_trigger(format!(
                "unknown action '{}', expected start, stop or restart",
                other
            ))),
        }
    }
}

impl ExeProcessManager {
    /// Run `action` on a process every day at `time_str` ("HH:MM" local time).
    pub fn schedule_process(
        &self,
        scheduler: &Scheduler,
        identifier: &str,
        action: ScheduledAction,
        time_str: &str,
    ) -> ProcessResult<JobId> {
        let trigger = Trigger::daily(time_str)?;
        self.schedule(scheduler, identifier, action, trigger)
    }

    /// Submit a job for a registered process with any trigger.
    pub fn schedule(
        &self,
        scheduler: &Scheduler,
        identifier: &str,
        action: ScheduledAction,
        trigger: Trigger,
    ) -> ProcessResult<JobId> {
        let name = self.resolve_named(identifier)?.name().to_string();
        let id = scheduler.add_job(action.job_action(&name), trigger)?;
        info!("Scheduled {} of {} as {} ({:?})", action, name, id, trigger);
        Ok(id)
    }
}

#[async_trait]
impl JobTarget for ExeProcessManager {
    async fn start(&self, name: &str) -> ProcessResult<()> {
        self.start_process(name).await
    }

    async fn stop(&self, name: &str) -> ProcessResult<()> {
        self.stop_process(name).await
    }

    async fn restart(&self, name: &str) -> ProcessResult<()> {
        self.restart_process(name).await
    }
}
