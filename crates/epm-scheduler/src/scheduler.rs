//! Job queue and tick loop.

use crate::job::{JobAction, JobInfo, ScheduledJob};
use crate::target::JobTarget;
use crate::trigger::Trigger;
use chrono::{DateTime, Utc};
use epm_common::{JobId, ProcessError, ProcessResult};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Upper bound on how long the loop sleeps between checks
    pub poll_interval: Duration,
    /// How long `run` waits for in-flight jobs after cancellation
    pub shutdown_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

/// A job taken off the queue for firing.
#[derive(Debug, Clone)]
pub struct DueJob {
    pub id: JobId,
    pub action: JobAction,
    pub scheduled_for: DateTime<Utc>,
}

/// Time-triggered job queue.
///
/// Independent instances can coexist; nothing here is global. Jobs due at
/// the same instant fire in submission order.
pub struct Scheduler {
    config: SchedulerConfig,
    jobs: Mutex<BTreeMap<JobId, ScheduledJob>>,
    next_id: AtomicU64,
    target: RwLock<Option<Arc<dyn JobTarget>>>,
    wake: Notify,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            jobs: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            target: RwLock::new(None),
            wake: Notify::new(),
        }
    }

    /// Route process actions to `target`.
    pub fn with_target(self, target: Arc<dyn JobTarget>) -> Self {
        *self.target.write() = Some(target);
        self
    }

    pub fn set_target(&self, target: Arc<dyn JobTarget>) {
        *self.target.write() = Some(target);
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Submit a job. Arguments travel inside the action (the process name
    /// for process actions, captured state for custom ones).
    pub fn add_job(&self, action: JobAction, trigger: Trigger) -> ProcessResult<JobId> {
        self.add_job_at(action, trigger, Utc::now())
    }

    /// Submit a job as if the current time were `now`.
    pub fn add_job_at(
        &self,
        action: JobAction,
        trigger: Trigger,
        now: DateTime<Utc>,
    ) -> ProcessResult<JobId> {
        if let Some(name) = action.process_name() {
            if name.is_empty() {
                return Err(ProcessError::invalid_trigger("process action without a process name"));
            }
        }

        let next_run_at = trigger.first_run(now)?;
        let id = JobId::new(self.next_id.fetch_add(1, Ordering::SeqCst));

        info!(job = %id, "Scheduled {} ({}), first run at {}", action, trigger, next_run_at);

        self.jobs.lock().insert(
            id,
            ScheduledJob {
                id,
                action,
                trigger,
                next_run_at,
                fire_count: 0,
                last_fired_at: None,
            },
        );
        self.wake.notify_one();

        Ok(id)
    }

    /// Remove a pending job. Returns false if it was not pending (already
    /// fired one-shot, cancelled, or unknown).
    pub fn cancel_job(&self, id: JobId) -> bool {
        let removed = self.jobs.lock().remove(&id).is_some();
        if removed {
            info!(job = %id, "Job cancelled");
            self.wake.notify_one();
        }
        removed
    }

    /// Pending jobs ordered by next firing
    pub fn jobs(&self) -> Vec<JobInfo> {
        let mut infos: Vec<JobInfo> = self.jobs.lock().values().map(ScheduledJob::info).collect();
        infos.sort_by_key(|info| (info.next_run_at, info.id));
        infos
    }

    pub fn job(&self, id: JobId) -> Option<JobInfo> {
        self.jobs.lock().get(&id).map(ScheduledJob::info)
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    /// Earliest `next_run_at` across pending jobs
    pub fn next_wakeup(&self) -> Option<DateTime<Utc>> {
        self.jobs.lock().values().map(|job| job.next_run_at).min()
    }

    /// Take every job due at `now`, in firing order.
    ///
    /// One-shot jobs leave the queue; recurring jobs are rescheduled from
    /// their scheduled time to the next occurrence after `now`.
    pub fn take_due(&self, now: DateTime<Utc>) -> Vec<DueJob> {
        let mut jobs = self.jobs.lock();

        let mut due: Vec<(DateTime<Utc>, JobId)> = jobs
            .values()
            .filter(|job| job.next_run_at <= now)
            .map(|job| (job.next_run_at, job.id))
            .collect();
        due.sort();

        let mut fired = Vec::with_capacity(due.len());
        for (scheduled_for, id) in due {
            let Some(job) = jobs.get_mut(&id) else {
                continue;
            };

            fired.push(DueJob {
                id,
                action: job.action.clone(),
                scheduled_for,
            });

            match job.trigger.next_after(scheduled_for, now) {
                Some(next) => {
                    job.next_run_at = next;
                    job.fire_count += 1;
                    job.last_fired_at = Some(now);
                }
                None => {
                    if job.trigger.is_recurring() {
                        warn!(job = %id, "No further occurrence for {}, dropping job", job.trigger);
                    }
                    jobs.remove(&id);
                }
            }
        }

        fired
    }

    /// Run one job to completion on the current task.
    pub async fn execute(&self, due: &DueJob) -> ProcessResult<()> {
        let target = self.target.read().clone();
        dispatch(target.as_ref(), due).await
    }

    /// Tick loop: sleep until the earliest due job (bounded by the poll
    /// interval), then fire everything due, each on its own task.
    ///
    /// Returns after `cancel` fires, once in-flight jobs finish or the
    /// shutdown grace runs out.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("Scheduler started (poll interval {:?})", self.config.poll_interval);

        let mut in_flight: JoinSet<()> = JoinSet::new();

        loop {
            for due in self.take_due(Utc::now()) {
                let target = self.target.read().clone();
                debug!(job = %due.id, "Firing {} (scheduled for {})", due.action, due.scheduled_for);
                in_flight.spawn(async move {
                    report(&due, dispatch(target.as_ref(), &due).await);
                });
            }

            let sleep_for = self.sleep_duration(Utc::now());

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(sleep_for) => {}
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    log_join(joined);
                }
            }
        }

        if !in_flight.is_empty() {
            info!("Scheduler stopping, waiting for {} in-flight job(s)", in_flight.len());
            let drain = async {
                while let Some(joined) = in_flight.join_next().await {
                    log_join(joined);
                }
            };
            if tokio::time::timeout(self.config.shutdown_grace, drain).await.is_err() {
                warn!(
                    "In-flight jobs did not finish within {:?}, aborting them",
                    self.config.shutdown_grace
                );
                in_flight.abort_all();
            }
        }

        info!("Scheduler stopped");
    }

    fn sleep_duration(&self, now: DateTime<Utc>) -> Duration {
        match self.next_wakeup() {
            Some(at) => (at - now)
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(self.config.poll_interval),
            None => self.config.poll_interval,
        }
    }
}

async fn dispatch(target: Option<&Arc<dyn JobTarget>>, due: &DueJob) -> ProcessResult<()> {
    let missing_target =
        || ProcessError::job_failed(due.id.to_string(), "no job target configured");

    match &due.action {
        JobAction::StartProcess(name) => target.ok_or_else(missing_target)?.start(name).await,
        JobAction::StopProcess(name) => target.ok_or_else(missing_target)?.stop(name).await,
        JobAction::RestartProcess(name) => target.ok_or_else(missing_target)?.restart(name).await,
        JobAction::Custom(custom) => custom.invoke().await,
    }
}

fn report(due: &DueJob, result: ProcessResult<()>) {
    match result {
        Ok(()) => info!(job = %due.id, "Job completed: {}", due.action),
        Err(e) => error!(job = %due.id, error = %e, "Job failed: {}", due.action),
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!("Scheduled job panicked: {}", e);
        }
    }
}
