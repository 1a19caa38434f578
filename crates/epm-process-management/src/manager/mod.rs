//! ExeProcessManager - registry and supervisor for external processes
//!
//! Locking model:
//! - the registry map is a `parking_lot::RwLock`, held only long enough to
//!   clone an `Arc` to a slot
//! - each slot has an async `op_lock` that orders lifecycle operations
//!   (start, stop, restart, auto-restart) on that one process
//! - each slot's runtime state sits behind a `parking_lot::Mutex` that is
//!   never held across an await
//!
//! `desired_state` and `current_state` live under the same runtime mutex.
//! `stop_process` flips `desired_state` before it waits for the op lock, so
//! a monitor pass running meanwhile never mistakes an intentional stop for
//! a crash.

mod schedule;
mod types;

#[cfg(test)]
mod tests;

pub use schedule::ScheduledAction;
pub use types::{GroupResult, ManagerOptions, ProcessSnapshot};

use crate::lifecycle::RestartDecision;
use crate::process_control_impl::OsProcessController;
use chrono::{DateTime, Utc};
use epm_common::{ProcessError, ProcessResult};
use epm_managed_process::{
    EventKind, EventSink, ExitOutcome, Liveness, LogEventSink, MetricsSource, ProcessController,
    ProcessHandle, ProcessRecord, ResourceSample,
};
use epm_process_state::{DesiredState, ProcessState, StateTransition};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use types::{SlotRuntime, StartCause};

/// Floor for the monitor tick; `tokio::time::interval` rejects zero
const MIN_CHECK_INTERVAL: Duration = Duration::from_millis(1);

/// One registered process
struct ProcessSlot {
    record: ProcessRecord,
    op_lock: tokio::sync::Mutex<()>,
    runtime: Mutex<SlotRuntime>,
}

impl ProcessSlot {
    fn new(record: ProcessRecord) -> Self {
        let runtime = SlotRuntime::new(&record.name);
        Self {
            record,
            op_lock: tokio::sync::Mutex::new(()),
            runtime: Mutex::new(runtime),
        }
    }

    fn name(&self) -> &str {
        &self.record.name
    }

    fn state(&self) -> ProcessState {
        self.runtime.lock().current()
    }

    fn snapshot(&self) -> ProcessSnapshot {
        let rt = self.runtime.lock();
        ProcessSnapshot {
            record: self.record.clone(),
            current_state: rt.current(),
            desired_state: rt.desired,
            pid: rt.handle.as_ref().map(|h| h.pid),
            started_at: rt.handle.as_ref().map(|h| h.started_at),
            restart_count: rt.restart_count,
            last_exit_code: rt.last_exit_code,
            next_restart_at: rt.next_restart_at,
            resources: rt.last_sample,
        }
    }
}

/// Supervises a named set of external executables.
///
/// Instances are independent; construct as many as needed.
pub struct ExeProcessManager {
    options: ManagerOptions,
    controller: Arc<dyn ProcessController>,
    sink: Arc<dyn EventSink>,
    metrics: Option<Arc<dyn MetricsSource>>,
    processes: RwLock<HashMap<String, Arc<ProcessSlot>>>,
    cancel: CancellationToken,
    shutting_down: AtomicBool,
    /// Held for the duration of one monitor pass
    monitor_gate: tokio::sync::Mutex<()>,
}

impl ExeProcessManager {
    pub fn new(options: ManagerOptions, controller: Arc<dyn ProcessController>) -> Self {
        Self {
            options,
            controller,
            sink: Arc::new(LogEventSink),
            metrics: None,
            processes: RwLock::new(HashMap::new()),
            cancel: CancellationToken::new(),
            shutting_down: AtomicBool::new(false),
            monitor_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Manager backed by real OS processes
    pub fn with_os_controller(options: ManagerOptions) -> Self {
        let mut controller = OsProcessController::new();
        if let Some(dir) = &options.working_directory {
            controller = controller.with_working_directory(dir);
        }
        Self::new(options, Arc::new(controller))
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSource>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    /// Token cancelled on shutdown; monitor loops exit when it fires
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------

    /// Register a record. Fails with `DuplicateName` if the name is taken.
    pub fn add_process(&self, record: ProcessRecord) -> ProcessResult<()> {
        epm_process::validate_process_name(&record.name)?;

        let mut processes = self.processes.write();
        if processes.contains_key(&record.name) {
            return Err(ProcessError::duplicate_name(&record.name));
        }

        info!(
            "Registered process {} ({}, {} dependencies)",
            record.name,
            record.path.display(),
            record.dependencies.len()
        );
        processes.insert(record.name.clone(), Arc::new(ProcessSlot::new(record)));
        Ok(())
    }

    /// Unregister a stopped record. Fails with `ProcessBusy` otherwise.
    pub fn remove_process(&self, name: &str) -> ProcessResult<ProcessRecord> {
        let mut processes = self.processes.write();
        let slot = processes
            .get(name)
            .cloned()
            .ok_or_else(|| ProcessError::not_found(name))?;

        let state = slot.state();
        let Ok(_op) = slot.op_lock.try_lock() else {
            return Err(ProcessError::process_busy(
                name,
                format!("{}, operation in progress", state),
            ));
        };
        if state != ProcessState::Stopped {
            return Err(ProcessError::process_busy(name, state.to_string()));
        }

        let dependents: Vec<&str> = processes
            .values()
            .filter(|other| other.record.dependencies.contains(name))
            .map(|other| other.name())
            .collect();
        if !dependents.is_empty() {
            warn!("Removing {} which is still a dependency of {:?}", name, dependents);
        }

        processes.remove(name);
        info!("Removed process {}", name);
        Ok(slot.record.clone())
    }

    /// Look up by name, then id, then tag.
    pub fn get_process(&self, identifier: &str) -> ProcessResult<ProcessSnapshot> {
        self.resolve(identifier).map(|slot| slot.snapshot())
    }

    /// Snapshots of every record, sorted by name
    pub fn list_processes(&self) -> Vec<ProcessSnapshot> {
        self.slots().iter().map(|slot| slot.snapshot()).collect()
    }

    pub fn process_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.processes.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn process_state(&self, identifier: &str) -> ProcessResult<ProcessState> {
        self.resolve(identifier).map(|slot| slot.state())
    }

    /// Recent transitions, oldest first
    pub fn state_history(&self, identifier: &str) -> ProcessResult<Vec<StateTransition>> {
        self.resolve(identifier)
            .map(|slot| slot.runtime.lock().state.state_history())
    }

    fn slots(&self) -> Vec<Arc<ProcessSlot>> {
        let mut slots: Vec<Arc<ProcessSlot>> = self.processes.read().values().cloned().collect();
        slots.sort_by(|a, b| a.name().cmp(b.name()));
        slots
    }

    fn slot(&self, name: &str) -> ProcessResult<Arc<ProcessSlot>> {
        self.processes
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ProcessError::not_found(name))
    }

    /// Name or id
    fn resolve_named(&self, identifier: &str) -> ProcessResult<Arc<ProcessSlot>> {
        let processes = self.processes.read();
        if let Some(slot) = processes.get(identifier) {
            return Ok(Arc::clone(slot));
        }
        processes
            .values()
            .find(|slot| slot.record.is_named(identifier))
            .cloned()
            .ok_or_else(|| ProcessError::not_found(identifier))
    }

    /// Name, id, or first record (by name) carrying the tag
    fn resolve(&self, identifier: &str) -> ProcessResult<Arc<ProcessSlot>> {
        self.resolve_named(identifier).or_else(|_| {
            self.slots()
                .into_iter()
                .find(|slot| slot.record.has_tag(identifier))
                .ok_or_else(|| ProcessError::not_found(identifier))
        })
    }

    fn names_with_tag(&self, tag: &str) -> Vec<String> {
        self.slots()
            .iter()
            .filter(|slot| slot.record.has_tag(tag))
            .map(|slot| slot.name().to_string())
            .collect()
    }

    // ------------------------------------------------------------------
    // Lifecycle operations
    // ------------------------------------------------------------------

    /// Start a process, starting its dependencies first.
    ///
    /// No-op if it is already `Running` or `Starting`. A dependency cycle
    /// is reported before anything is launched.
    pub async fn start_process(&self, identifier: &str) -> ProcessResult<()> {
        let slot = self.resolve_named(identifier)?;
        self.ensure_accepting(slot.name(), "start")?;

        let order = self.planned_start_order(&slot)?;
        for member in &order {
            let _op = member.op_lock.lock().await;
            if let Err(e) = self.start_locked(member, StartCause::Manual).await {
                if member.name() != slot.name() {
                    let detail = format!("dependency {} failed: {}", member.name(), e);
                    self.emit(slot.name(), EventKind::StartFailed, Some(&detail));
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Gracefully stop a process.
    pub async fn stop_process(&self, identifier: &str) -> ProcessResult<()> {
        self.stop_process_with(identifier, true).await
    }

    /// Stop a process; `graceful = false` skips straight to a forced kill.
    pub async fn stop_process_with(&self, identifier: &str, graceful: bool) -> ProcessResult<()> {
        let slot = self.resolve_named(identifier)?;

        // Must be visible to the monitor before we queue behind other operations
        {
            let mut rt = slot.runtime.lock();
            rt.desired = DesiredState::Stopped;
            rt.next_restart_at = None;
        }

        let _op = slot.op_lock.lock().await;
        let timeout = self.graceful_timeout_for(&slot);
        self.stop_locked(&slot, graceful, timeout).await
    }

    /// Stop then start as one operation; the monitor never sees the gap.
    pub async fn restart_process(&self, identifier: &str) -> ProcessResult<()> {
        let slot = self.resolve_named(identifier)?;
        self.ensure_accepting(slot.name(), "restart")?;

        let order = self.planned_start_order(&slot)?;
        for dependency in order.iter().filter(|member| member.name() != slot.name()) {
            let _op = dependency.op_lock.lock().await;
            if let Err(e) = self.start_locked(dependency, StartCause::Manual).await {
                let detail = format!("dependency {} failed: {}", dependency.name(), e);
                self.emit(slot.name(), EventKind::StartFailed, Some(&detail));
                return Err(e);
            }
        }

        let _op = slot.op_lock.lock().await;
        let name = slot.name();

        let handle = {
            let mut rt = slot.runtime.lock();
            match rt.current() {
                ProcessState::Running | ProcessState::Stopped | ProcessState::Crashed => {}
                other => {
                    return Err(ProcessError::invalid_state(
                        name,
                        "running, stopped or crashed",
                        other.to_string(),
                    ))
                }
            }
            rt.desired = DesiredState::Running;
            rt.next_restart_at = None;
            log_transition(name, rt.state.transition_to_restarting());
            rt.handle.take()
        };

        if let Some(handle) = handle {
            let timeout = self.graceful_timeout_for(&slot);
            self.terminate_handle(&slot, handle, true, timeout).await?;
        }

        self.start_locked(&slot, StartCause::Restart).await
    }

    /// Dependencies-first order ending with `root`. Fails with
    /// `DependencyCycle` without side effects.
    /// `start_order`, reporting a `StartFailed` event for `root` when the
    /// dependency graph cannot be resolved.
    fn planned_start_order(&self, root: &ProcessSlot) -> ProcessResult<Vec<Arc<ProcessSlot>>> {
        self.start_order(root).map_err(|e| {
            self.emit(root.name(), EventKind::StartFailed, Some(&e.to_string()));
            e
        })
    }

    fn start_order(&self, root: &ProcessSlot) -> ProcessResult<Vec<Arc<ProcessSlot>>> {
        let processes = self.processes.read();
        let mut order = Vec::new();
        let mut done = HashSet::new();
        let mut path = Vec::new();
        visit_dependencies(&processes, root.name(), &mut path, &mut done, &mut order)?;
        Ok(order)
    }

    fn check_dependencies(&self, slot: &ProcessSlot) -> ProcessResult<()> {
        for dependency in &slot.record.dependencies {
            let state = self.slot(dependency)?.state();
            if state != ProcessState::Running {
                return Err(ProcessError::dependency_not_running(slot.name(), dependency));
            }
        }
        Ok(())
    }

    /// Launch with the slot's op lock held.
    async fn start_locked(&self, slot: &ProcessSlot, cause: StartCause) -> ProcessResult<()> {
        let name = slot.name();

        {
            let mut rt = slot.runtime.lock();
            match cause {
                StartCause::Manual
                    if matches!(rt.current(), ProcessState::Running | ProcessState::Starting) =>
                {
                    rt.desired = DesiredState::Running;
                    debug!("Process {} already {}, start is a no-op", name, rt.current());
                    return Ok(());
                }
                // A stop arrived after the monitor chose to restart
                StartCause::AutoRestart if rt.desired != DesiredState::Running => return Ok(()),
                _ => {}
            }

            rt.state.transition_to_starting()?;
            rt.desired = DesiredState::Running;
            rt.next_restart_at = None;
            if cause == StartCause::Manual {
                rt.restart_count = 0;
            }
        }

        let launched = match self.check_dependencies(slot) {
            Ok(()) => self.controller.launch(&slot.record).await,
            Err(e) => Err(e),
        };

        let handle = match launched {
            Ok(handle) => handle,
            Err(e) => return Err(self.handle_start_failure(slot, cause, e)),
        };

        let pid = handle.pid;
        let restart_count = {
            let mut rt = slot.runtime.lock();
            rt.handle = Some(handle);
            rt.last_sample = None;
            log_transition(name, rt.state.transition_to_running());
            rt.restart_count
        };

        let (kind, detail) = match cause {
            StartCause::Manual => (EventKind::Started, format!("pid {}", pid)),
            StartCause::Restart => (EventKind::Restarted, format!("pid {}, manual restart", pid)),
            StartCause::AutoRestart => (
                EventKind::Restarted,
                format!("pid {}, auto-restart #{}", pid, restart_count),
            ),
        };
        info!("Process {} running (PID: {})", name, pid);
        self.emit(name, kind, Some(&detail));
        Ok(())
    }

    fn handle_start_failure(
        &self,
        slot: &ProcessSlot,
        cause: StartCause,
        error: ProcessError,
    ) -> ProcessError {
        let name = slot.name();
        let detail = error.to_string();
        warn!("Failed to start process {}: {}", name, detail);

        let retry = {
            let mut rt = slot.runtime.lock();
            if cause == StartCause::AutoRestart && rt.desired == DesiredState::Running {
                log_transition(
                    name,
                    rt.state.transition_to_crashed(format!("restart failed: {}", detail)),
                );
                true
            } else {
                log_transition(
                    name,
                    rt.state.transition_to_stopped(format!("launch failed: {}", detail)),
                );
                rt.desired = DesiredState::Stopped;
                false
            }
        };

        self.emit(name, EventKind::StartFailed, Some(&detail));

        if retry {
            // Retried by a later monitor pass
            self.plan_restart(slot, Utc::now());
        }
        error
    }

    /// Stop with the slot's op lock held.
    async fn stop_locked(
        &self,
        slot: &ProcessSlot,
        graceful: bool,
        timeout: Duration,
    ) -> ProcessResult<()> {
        let name = slot.name();

        let handle = {
            let mut rt = slot.runtime.lock();
            rt.desired = DesiredState::Stopped;
            rt.next_restart_at = None;
            match rt.current() {
                ProcessState::Stopped => {
                    debug!("Process {} already stopped", name);
                    return Ok(());
                }
                ProcessState::Crashed => {
                    log_transition(name, rt.state.transition_to_stopped("stopped after crash"));
                    None
                }
                ProcessState::Running => {
                    log_transition(name, rt.state.transition_to_stopping());
                    match rt.handle.take() {
                        Some(handle) => Some(handle),
                        None => {
                            log_transition(name, rt.state.transition_to_stopped("no live handle"));
                            None
                        }
                    }
                }
                other => {
                    return Err(ProcessError::invalid_state(
                        name,
                        "running, crashed or stopped",
                        other.to_string(),
                    ))
                }
            }
        };

        let Some(handle) = handle else {
            self.emit(name, EventKind::Stopped, Some("not running"));
            return Ok(());
        };

        info!("Stopping process {} (PID: {})", name, handle.pid);
        let outcome = self.terminate_handle(slot, handle, graceful, timeout).await?;

        {
            let mut rt = slot.runtime.lock();
            log_transition(
                name,
                rt.state.transition_to_stopped(format!("stopped: {}", outcome)),
            );
        }
        self.emit(name, EventKind::Stopped, Some(&outcome.to_string()));
        Ok(())
    }

    /// Terminate a handle taken out of the slot. On failure the handle goes
    /// back and the slot returns to `Running`.
    async fn terminate_handle(
        &self,
        slot: &ProcessSlot,
        mut handle: ProcessHandle,
        graceful: bool,
        timeout: Duration,
    ) -> ProcessResult<ExitOutcome> {
        match self.controller.terminate(&mut handle, graceful, timeout).await {
            Ok(outcome) => {
                let mut rt = slot.runtime.lock();
                rt.last_exit_code = outcome.code();
                rt.last_sample = None;
                Ok(outcome)
            }
            Err(e) => {
                error!("Failed to terminate process {}: {}", slot.name(), e);
                let mut rt = slot.runtime.lock();
                rt.handle = Some(handle);
                log_transition(
                    slot.name(),
                    rt.state
                        .transition_to(ProcessState::Running, Some(format!("terminate failed: {}", e))),
                );
                Err(e)
            }
        }
    }

    fn graceful_timeout_for(&self, slot: &ProcessSlot) -> Duration {
        slot.record
            .graceful_timeout
            .unwrap_or(self.options.graceful_timeout)
    }

    fn ensure_accepting(&self, name: &str, operation: &str) -> ProcessResult<()> {
        if self.is_shutting_down() {
            return Err(ProcessError::operation_not_allowed(
                name,
                operation,
                "manager shutting down",
            ));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Group and bulk operations
    // ------------------------------------------------------------------

    pub async fn start_all(&self) -> GroupResult {
        self.start_many(self.process_names()).await
    }

    pub async fn stop_all(&self) -> GroupResult {
        self.stop_many(self.process_names()).await
    }

    pub async fn restart_all(&self) -> GroupResult {
        let names = self.process_names();
        let results = join_all(names.into_iter().map(|name| async move {
            let result = self.restart_process(&name).await;
            (name, result)
        }))
        .await;
        GroupResult::collect(results)
    }

    pub async fn start_group(&self, tag: &str) -> GroupResult {
        let names = self.names_with_tag(tag);
        if names.is_empty() {
            warn!("No processes found with tag {}", tag);
        }
        self.start_many(names).await
    }

    pub async fn stop_group(&self, tag: &str) -> GroupResult {
        let names = self.names_with_tag(tag);
        if names.is_empty() {
            warn!("No processes found with tag {}", tag);
        }
        self.stop_many(names).await
    }

    /// Start the named processes concurrently
    pub async fn start_many(&self, names: Vec<String>) -> GroupResult {
        let results = join_all(names.into_iter().map(|name| async move {
            let result = self.start_process(&name).await;
            (name, result)
        }))
        .await;
        GroupResult::collect(results)
    }

    async fn stop_many(&self, names: Vec<String>) -> GroupResult {
        let results = join_all(names.into_iter().map(|name| async move {
            let result = self.stop_process(&name).await;
            (name, result)
        }))
        .await;
        GroupResult::collect(results)
    }

    // ------------------------------------------------------------------
    // Monitoring
    // ------------------------------------------------------------------

    /// Monitor loop at the configured interval
    pub async fn run_monitor(&self) {
        self.monitor_processes(self.options.check_interval).await
    }

    /// Poll every record each `check_interval` until shutdown cancels.
    ///
    /// Errors are logged per process; nothing but cancellation ends the loop.
    pub async fn monitor_processes(&self, check_interval: Duration) {
        let check_interval = if check_interval < MIN_CHECK_INTERVAL {
            warn!(
                "Check interval {:?} is below {:?}, using {:?}",
                check_interval, MIN_CHECK_INTERVAL, MIN_CHECK_INTERVAL
            );
            MIN_CHECK_INTERVAL
        } else {
            check_interval
        };
        info!("Monitoring started (interval {:?})", check_interval);

        let mut ticker = tokio::time::interval(check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.check_processes().await;
        }

        info!("Monitoring stopped");
    }

    /// One monitor pass: detect crashes, apply the restart policy, and
    /// sample metrics for live processes.
    pub async fn check_processes(&self) {
        let _gate = self.monitor_gate.lock().await;
        if self.cancel.is_cancelled() {
            return;
        }

        let now = Utc::now();
        let restarts: Vec<Arc<ProcessSlot>> = self
            .slots()
            .into_iter()
            .filter(|slot| self.inspect(slot, now))
            .collect();

        if !restarts.is_empty() {
            join_all(restarts.iter().map(|slot| self.auto_restart(slot))).await;
        }
    }

    /// Returns true if the slot should be restarted in this pass.
    fn inspect(&self, slot: &ProcessSlot, now: DateTime<Utc>) -> bool {
        let name = slot.name();
        let mut alive_pid = None;
        let mut exited = None;

        {
            let mut rt = slot.runtime.lock();
            if rt.desired != DesiredState::Running {
                return false;
            }

            match rt.current() {
                ProcessState::Running => {
                    let check = match rt.handle.as_mut() {
                        Some(handle) => self
                            .controller
                            .is_alive(handle)
                            .map(|liveness| (liveness, handle.pid)),
                        None => Ok((Liveness::Exited(ExitOutcome::Unknown), 0)),
                    };

                    match check {
                        Ok((Liveness::Alive, pid)) => alive_pid = Some(pid),
                        Ok((Liveness::Exited(outcome), _)) => {
                            rt.handle = None;
                            rt.last_sample = None;
                            rt.last_exit_code = outcome.code();
                            log_transition(
                                name,
                                rt.state
                                    .transition_to_crashed(format!("exited unexpectedly: {}", outcome)),
                            );
                            exited = Some(outcome);
                        }
                        Err(e) => {
                            warn!(process_id = %name, "Liveness check failed: {}", e);
                            return false;
                        }
                    }
                }
                ProcessState::Crashed => {
                    // Backoff pending, or an earlier attempt could not get the op lock
                    return !self.is_shutting_down()
                        && rt.next_restart_at.map_or(true, |at| at <= now);
                }
                _ => return false,
            }
        }

        if let Some(pid) = alive_pid {
            self.sample(slot, pid);
            return false;
        }

        match exited {
            Some(outcome) => {
                warn!("Process {} crashed: {}", name, outcome);
                self.emit(name, EventKind::Crashed, Some(&outcome.to_string()));
                !self.is_shutting_down() && self.plan_restart(slot, now)
            }
            None => false,
        }
    }

    /// Apply the restart policy to a crashed slot. Returns true to restart now.
    fn plan_restart(&self, slot: &ProcessSlot, now: DateTime<Utc>) -> bool {
        let name = slot.name();

        let gave_up = {
            let mut rt = slot.runtime.lock();
            if rt.desired != DesiredState::Running || rt.current() != ProcessState::Crashed {
                return false;
            }

            let decision = if slot.record.auto_restart {
                self.options.restart_policy.decide(rt.restart_count)
            } else {
                RestartDecision::GiveUp("auto-restart disabled".to_string())
            };

            match decision {
                RestartDecision::RestartNow => {
                    rt.next_restart_at = None;
                    return true;
                }
                RestartDecision::RestartAfter(delay) => {
                    let at = now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                    info!("Process {} will restart at {} (backoff {:?})", name, at, delay);
                    rt.next_restart_at = Some(at);
                    return false;
                }
                RestartDecision::GiveUp(reason) => {
                    log_transition(name, rt.state.transition_to_stopped(reason.clone()));
                    rt.desired = DesiredState::Stopped;
                    rt.next_restart_at = None;
                    reason
                }
            }
        };

        warn!("Not restarting process {}: {}", name, gave_up);
        self.emit(name, EventKind::Stopped, Some(&gave_up));
        false
    }

    async fn auto_restart(&self, slot: &ProcessSlot) {
        let name = slot.name();

        // Another operation owns this process; it settles the state
        let Ok(_op) = slot.op_lock.try_lock() else {
            debug!("Process {} busy, auto-restart deferred", name);
            return;
        };

        {
            let mut rt = slot.runtime.lock();
            if rt.desired != DesiredState::Running
                || rt.current() != ProcessState::Crashed
                || self.is_shutting_down()
            {
                return;
            }
            if rt.next_restart_at.map_or(false, |at| at > Utc::now()) {
                return;
            }
            rt.restart_count += 1;
            info!("Auto-restarting process {} (restart #{})", name, rt.restart_count);
        }

        if let Err(e) = self.start_locked(slot, StartCause::AutoRestart).await {
            debug!("Auto-restart of {} failed: {}", name, e);
        }
    }

    fn sample(&self, slot: &ProcessSlot, pid: u32) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        match metrics.sample(pid) {
            Ok(sample) => slot.runtime.lock().last_sample = Some(sample),
            Err(e) => warn!(process_id = %slot.name(), "Resource sampling failed: {}", e),
        }
    }

    /// Latest cpu and memory numbers; zeros when the process is not running.
    pub fn resource_usage(&self, identifier: &str) -> ProcessResult<ResourceSample> {
        let slot = self.resolve(identifier)?;

        let pid = {
            let rt = slot.runtime.lock();
            if rt.current() != ProcessState::Running {
                return Ok(ResourceSample::default());
            }
            rt.handle.as_ref().map(|h| h.pid)
        };

        if let Some(pid) = pid {
            self.sample(&slot, pid);
        }
        let sample = slot.runtime.lock().last_sample.unwrap_or_default();
        Ok(sample)
    }

    /// Change the nice value of a running process.
    ///
    /// Fails with `OperationNotAllowed` unless the process is `Running`.
    pub async fn set_priority(&self, identifier: &str, nice: i32) -> ProcessResult<()> {
        let slot = self.resolve(identifier)?;
        let _op = slot.op_lock.lock().await;

        let pid = {
            let rt = slot.runtime.lock();
            match (rt.current(), rt.handle.as_ref()) {
                (ProcessState::Running, Some(handle)) => handle.pid,
                (state, _) => {
                    return Err(ProcessError::operation_not_allowed(
                        slot.name(),
                        "set_priority",
                        state.to_string(),
                    ))
                }
            }
        };

        epm_process::set_priority(pid, nice)?;
        info!(process_id = %slot.name(), pid, "Priority set to {}", nice);
        Ok(())
    }

    /// Content of the record's log file; `None` if it has none or the file
    /// does not exist yet.
    pub async fn view_logs(&self, identifier: &str) -> ProcessResult<Option<String>> {
        let slot = self.resolve(identifier)?;
        let Some(path) = &slot.record.log_file else {
            return Ok(None);
        };

        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Log file for {} not found: {}", slot.name(), path.display());
                Ok(None)
            }
            Err(e) => Err(ProcessError::monitoring(
                slot.name(),
                format!("cannot read log file {}: {}", path.display(), e),
            )),
        }
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Stop monitoring and every process within `timeout`.
    ///
    /// Monitor loops exit after their current pass. Processes are stopped
    /// concurrently; each gets its graceful window clipped to the time left,
    /// then SIGKILL. Later start and restart calls are refused.
    pub async fn graceful_shutdown(&self, timeout: Duration) -> GroupResult {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            info!("Shutdown already in progress");
        }
        info!("Shutting down process manager (timeout {:?})", timeout);

        self.cancel.cancel();
        let deadline = Instant::now() + timeout;

        let _gate = match tokio::time::timeout(timeout, self.monitor_gate.lock()).await {
            Ok(gate) => Some(gate),
            Err(_) => {
                warn!("Monitor pass still running at shutdown deadline");
                None
            }
        };

        let active: Vec<Arc<ProcessSlot>> = self
            .slots()
            .into_iter()
            .filter(|slot| {
                let rt = slot.runtime.lock();
                rt.current() != ProcessState::Stopped || rt.desired == DesiredState::Running
            })
            .collect();

        let results = join_all(active.iter().map(|slot| self.shutdown_one(slot, deadline))).await;
        let report = GroupResult::collect(results);

        if report.is_success() {
            info!("Process manager shut down ({} processes stopped)", report.succeeded.len());
        } else {
            error!(
                "Process manager shut down with {} failure(s): {:?}",
                report.failed.len(),
                report.failed.iter().map(|(name, _)| name).collect::<Vec<_>>()
            );
        }
        report
    }

    pub async fn shutdown(&self, timeout: Duration) -> GroupResult {
        self.graceful_shutdown(timeout).await
    }

    async fn shutdown_one(
        &self,
        slot: &ProcessSlot,
        deadline: Instant,
    ) -> (String, ProcessResult<()>) {
        let name = slot.name().to_string();
        {
            let mut rt = slot.runtime.lock();
            rt.desired = DesiredState::Stopped;
            rt.next_restart_at = None;
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let result = match tokio::time::timeout(remaining, slot.op_lock.lock()).await {
            Ok(_op) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                let graceful = self.graceful_timeout_for(slot).min(remaining);
                self.stop_locked(slot, !graceful.is_zero(), graceful).await
            }
            Err(_) => self.force_kill_unlocked(slot),
        };
        (name, result)
    }

    /// Last resort when an operation still holds the op lock at the deadline
    fn force_kill_unlocked(&self, slot: &ProcessSlot) -> ProcessResult<()> {
        let name = slot.name();
        let pid = slot.runtime.lock().handle.as_ref().map(|h| h.pid);
        warn!("Operation on {} still in progress at shutdown deadline", name);

        match pid {
            Some(pid) => {
                epm_process::force_kill(pid)?;
                Err(ProcessError::timeout(
                    name,
                    format!("shutdown (PID {} force killed, state not confirmed)", pid),
                ))
            }
            None => Err(ProcessError::timeout(name, "shutdown (operation in progress)")),
        }
    }

    fn emit(&self, name: &str, kind: EventKind, detail: Option<&str>) {
        self.sink.on_event(name, kind, Utc::now(), detail);
    }
}

fn visit_dependencies(
    processes: &HashMap<String, Arc<ProcessSlot>>,
    name: &str,
    path: &mut Vec<String>,
    done: &mut HashSet<String>,
    order: &mut Vec<Arc<ProcessSlot>>,
) -> ProcessResult<()> {
    if done.contains(name) {
        return Ok(());
    }
    if let Some(position) = path.iter().position(|visiting| visiting == name) {
        let mut chain = path[position..].to_vec();
        chain.push(name.to_string());
        return Err(ProcessError::dependency_cycle(chain));
    }

    let slot = processes.get(name).ok_or_else(|| match path.last() {
        Some(parent) => ProcessError::configuration(parent, format!("unknown dependency {}", name)),
        None => ProcessError::not_found(name),
    })?;

    path.push(name.to_string());
    for dependency in &slot.record.dependencies {
        visit_dependencies(processes, dependency, path, done, order)?;
    }
    path.pop();

    done.insert(name.to_string());
    order.push(Arc::clone(slot));
    Ok(())
}

fn log_transition(name: &str, result: ProcessResult<()>) {
    if let Err(e) = result {
        error!("Process {}: {}", name, e);
    }
}
