//! OsProcessController - `ProcessController` for real OS processes
//!
//! Spawns children with tokio, keeps the `Child` in the handle so exit
//! status can be reaped, and terminates with SIGTERM followed by SIGKILL
//! once the graceful window runs out.

use async_trait::async_trait;
use epm_common::{ProcessError, ProcessResult};
use epm_managed_process::{ExitOutcome, Liveness, ProcessController, ProcessHandle, ProcessRecord};
use epm_process::SignalDelivery;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;
use tokio::time::{timeout, Duration, Instant};
use tracing::{debug, error, info, warn};

const FORCE_KILL_TIMEOUT: Duration = Duration::from_secs(3);
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Launches and stops real processes.
#[derive(Debug, Clone, Default)]
pub struct OsProcessController {
    /// Used when a record has no working directory of its own
    working_directory: Option<PathBuf>,
}

impl OsProcessController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    fn working_directory_for<'a>(&'a self, record: &'a ProcessRecord) -> Option<&'a Path> {
        record
            .working_directory
            .as_deref()
            .or(self.working_directory.as_deref())
    }

    fn output_for(record: &ProcessRecord) -> ProcessResult<(Stdio, Stdio)> {
        let Some(log_file) = &record.log_file else {
            return Ok((Stdio::null(), Stdio::null()));
        };

        if let Some(parent) = log_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                ProcessError::launch_failed(
                    &record.name,
                    format!("cannot create log directory {}: {}", parent.display(), e),
                )
            })?;
        }

        let open_err = |e: std::io::Error| {
            ProcessError::launch_failed(
                &record.name,
                format!("cannot open log file {}: {}", log_file.display(), e),
            )
        };
        let stdout = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .map_err(open_err)?;
        let stderr = stdout.try_clone().map_err(open_err)?;

        Ok((Stdio::from(stdout), Stdio::from(stderr)))
    }

    /// Wait up to `limit` for the process to exit.
    ///
    /// Returns `Ok(None)` if it is still running when the time is up.
    async fn wait_for_exit(
        &self,
        handle: &mut ProcessHandle,
        limit: Duration,
    ) -> ProcessResult<Option<ExitOutcome>> {
        if let Some(child) = handle.child.as_mut() {
            return match timeout(limit, child.wait()).await {
                Ok(Ok(status)) => Ok(Some(exit_outcome(status))),
                Ok(Err(e)) => Err(ProcessError::terminate_failed(
                    &handle.name,
                    format!("failed to wait for PID {}: {}", handle.pid, e),
                )),
                Err(_) => Ok(None),
            };
        }

        // Not our child: poll the pid
        let deadline = Instant::now() + limit;
        loop {
            if !epm_process::process_exists(handle.pid)? {
                return Ok(Some(ExitOutcome::Unknown));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl ProcessController for OsProcessController {
    async fn launch(&self, record: &ProcessRecord) -> ProcessResult<ProcessHandle> {
        let working_dir = self.working_directory_for(record);
        let executable = epm_process::resolve_executable(&record.name, &record.path, working_dir)?;

        info!("Spawning process: {} ({})", record.name, executable.display());

        let (stdout, stderr) = Self::output_for(record)?;

        let mut cmd = Command::new(&executable);
        cmd.args(&record.args)
            .envs(&record.environment)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true);

        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let child = cmd
            .spawn()
            .map_err(|e| ProcessError::launch_failed(&record.name, e.to_string()))?;

        let pid = child.id().ok_or_else(|| {
            ProcessError::launch_failed(&record.name, "process exited before its PID was read")
        })?;

        info!("Process spawned successfully: {} (PID: {})", record.name, pid);

        Ok(ProcessHandle::new(&record.name, pid).with_child(child))
    }

    async fn terminate(
        &self,
        handle: &mut ProcessHandle,
        graceful: bool,
        graceful_timeout: Duration,
    ) -> ProcessResult<ExitOutcome> {
        let pid = handle.pid;

        if let Liveness::Exited(outcome) = self.is_alive(handle)? {
            debug!("Process {} (PID: {}) already exited: {}", handle.name, pid, outcome);
            return Ok(outcome);
        }

        let mut graceful_refused = None;
        if graceful {
            info!("Sending termination signal to PID {}", pid);
            match epm_process::terminate_gracefully(pid) {
                Ok(SignalDelivery::Delivered) | Ok(SignalDelivery::AlreadyExited) => {}
                Err(e) => {
                    warn!("Failed to send SIGTERM to PID {}: {}", pid, e);
                    graceful_refused = Some(e);
                }
            }

            if graceful_refused.is_none() {
                if let Some(outcome) = self.wait_for_exit(handle, graceful_timeout).await? {
                    info!("Process terminated gracefully: {} ({})", handle.name, outcome);
                    return Ok(outcome);
                }
                warn!(
                    "Graceful shutdown timed out for {} (PID: {}), attempting force kill",
                    handle.name, pid
                );
            }
        }

        if let Err(e) = epm_process::force_kill(pid) {
            error!("Force kill failed for {} (PID: {}): {}", handle.name, pid, e);
            let reason = match graceful_refused {
                Some(first) => format!("SIGTERM and SIGKILL refused: {}; {}", first, e),
                None => e.to_string(),
            };
            return Err(ProcessError::terminate_failed(&handle.name, reason));
        }

        match self.wait_for_exit(handle, FORCE_KILL_TIMEOUT).await? {
            Some(outcome) => {
                info!("Process terminated after force kill: {} ({})", handle.name, outcome);
                Ok(outcome)
            }
            None => Err(ProcessError::timeout(
                &handle.name,
                format!(
                    "stop (PID {} still alive {:?} after SIGKILL)",
                    pid, FORCE_KILL_TIMEOUT
                ),
            )),
        }
    }

    fn is_alive(&self, handle: &mut ProcessHandle) -> ProcessResult<Liveness> {
        if let Some(child) = handle.child.as_mut() {
            return match child.try_wait() {
                Ok(None) => Ok(Liveness::Alive),
                Ok(Some(status)) => Ok(Liveness::Exited(exit_outcome(status))),
                Err(e) => Err(ProcessError::monitoring(
                    &handle.name,
                    format!("try_wait failed for PID {}: {}", handle.pid, e),
                )),
            };
        }

        if epm_process::process_exists(handle.pid)? {
            Ok(Liveness::Alive)
        } else {
            Ok(Liveness::Exited(ExitOutcome::Unknown))
        }
    }
}

fn exit_outcome(status: ExitStatus) -> ExitOutcome {
    ExitOutcome::from(status.code())
}
