use super::*;
use crate::lifecycle::RestartPolicy;
use async_trait::async_trait;
use epm_managed_process::MemoryEventSink;
use epm_scheduler::{Scheduler, SchedulerConfig, Trigger};
use std::collections::HashSet;
use tokio::sync::Notify;

#[derive(Default)]
struct MockState {
    next_pid: u32,
    pids: HashMap<String, u32>,
    alive: HashSet<u32>,
    fail_launch: HashSet<String>,
    refuse_terminate: bool,
    launches: Vec<String>,
    /// While set, `launch` parks until the gate is notified
    launch_gate: Option<Arc<Notify>>,
}

/// In-memory controller: pids are fake, crashes are injected by the test.
#[derive(Clone, Default)]
struct MockController {
    state: Arc<Mutex<MockState>>,
    launch_entered: Arc<Notify>,
}

impl MockController {
    fn crash(&self, name: &str) {
        let mut state = self.state.lock();
        if let Some(pid) = state.pids.get(name).copied() {
            state.alive.remove(&pid);
        }
    }

    fn fail_launch(&self, name: &str, fail: bool) {
        let mut state = self.state.lock();
        if fail {
            state.fail_launch.insert(name.to_string());
        } else {
            state.fail_launch.remove(name);
        }
    }

    fn refuse_terminate(&self, refuse: bool) {
        self.state.lock().refuse_terminate = refuse;
    }

    fn launches(&self) -> Vec<String> {
        self.state.lock().launches.clone()
    }

    fn hold_launches(&self) {
        self.state.lock().launch_gate = Some(Arc::new(Notify::new()));
    }

    fn release_launches(&self) {
        if let Some(gate) = self.state.lock().launch_gate.take() {
            gate.notify_one();
        }
    }

    async fn wait_for_held_launch(&self) {
        tokio::time::timeout(Duration::from_secs(2), self.launch_entered.notified())
            .await
            .expect("no launch reached the gate");
    }
}

#[async_trait]
impl ProcessController for MockController {
    async fn launch(&self, record: &ProcessRecord) -> ProcessResult<ProcessHandle> {
        let gate = self.state.lock().launch_gate.clone();
        if let Some(gate) = gate {
            self.launch_entered.notify_one();
            gate.notified().await;
        }

        let mut state = self.state.lock();
        if state.fail_launch.contains(&record.name) {
            return Err(ProcessError::launch_failed(&record.name, "mock launch failure"));
        }
        state.next_pid += 1;
        let pid = 1000 + state.next_pid;
        state.alive.insert(pid);
        state.pids.insert(record.name.clone(), pid);
        state.launches.push(record.name.clone());
        Ok(ProcessHandle::new(&record.name, pid))
    }

    async fn terminate(
        &self,
        handle: &mut ProcessHandle,
        _graceful: bool,
        _timeout: Duration,
    ) -> ProcessResult<ExitOutcome> {
        let mut state = self.state.lock();
        if state.refuse_terminate {
            return Err(ProcessError::terminate_failed(&handle.name, "mock refused"));
        }
        state.alive.remove(&handle.pid);
        Ok(ExitOutcome::Code(0))
    }

    fn is_alive(&self, handle: &mut ProcessHandle) -> ProcessResult<Liveness> {
        if self.state.lock().alive.contains(&handle.pid) {
            Ok(Liveness::Alive)
        } else {
            Ok(Liveness::Exited(ExitOutcome::Code(1)))
        }
    }
}

struct FixedMetrics;

impl MetricsSource for FixedMetrics {
    fn sample(&self, _pid: u32) -> ProcessResult<ResourceSample> {
        Ok(ResourceSample {
            cpu_percent: 12.5,
            memory_bytes: 4096,
        })
    }
}

struct Fixture {
    manager: Arc<ExeProcessManager>,
    controller: MockController,
    events: Arc<MemoryEventSink>,
}

fn fixture(policy: RestartPolicy) -> Fixture {
    let controller = MockController::default();
    let events = Arc::new(MemoryEventSink::new());
    let options = ManagerOptions {
        check_interval: Duration::from_millis(20),
        graceful_timeout: Duration::from_secs(1),
        restart_policy: policy,
        ..Default::default()
    };
    let manager = ExeProcessManager::new(options, Arc::new(controller.clone()))
        .with_event_sink(events.clone());
    Fixture {
        manager: Arc::new(manager),
        controller,
        events,
    }
}

fn record(name: &str) -> ProcessRecord {
    ProcessRecord::new(name, format!("/opt/bin/{}", name))
}

fn state_of(manager: &ExeProcessManager, name: &str) -> ProcessState {
    manager.process_state(name).unwrap()
}

/// Poll until `name` reaches `state` or two seconds pass.
async fn wait_for_state(manager: &ExeProcessManager, name: &str, state: ProcessState) {
    let reached = tokio::time::timeout(Duration::from_secs(2), async {
        while state_of(manager, name) != state {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "{} never reached {}", name, state);
}

#[tokio::test]
async fn test_start_and_stop() {
    let f = fixture(RestartPolicy::default());
    f.manager.add_process(record("worker")).unwrap();

    f.manager.start_process("worker").await.unwrap();
    let snapshot = f.manager.get_process("worker").unwrap();
    assert_eq!(snapshot.current_state, ProcessState::Running);
    assert_eq!(snapshot.desired_state, DesiredState::Running);
    assert_eq!(snapshot.pid, Some(1001));
    assert!(snapshot.started_at.is_some());

    f.manager.stop_process("worker").await.unwrap();
    let snapshot = f.manager.get_process("worker").unwrap();
    assert_eq!(snapshot.current_state, ProcessState::Stopped);
    assert_eq!(snapshot.desired_state, DesiredState::Stopped);
    assert_eq!(snapshot.pid, None);
    assert_eq!(snapshot.last_exit_code, Some(0));

    assert_eq!(
        f.events.kinds_for("worker"),
        vec![EventKind::Started, EventKind::Stopped]
    );
}

#[tokio::test]
async fn test_unknown_process() {
    let f = fixture(RestartPolicy::default());
    let err = f.manager.start_process("ghost").await.unwrap_err();
    assert!(matches!(err, ProcessError::NotFound { .. }));
    assert!(f.manager.stop_process("ghost").await.is_err());
    assert!(f.manager.get_process("ghost").is_err());
}

#[tokio::test]
async fn test_duplicate_name_rejected() {
    let f = fixture(RestartPolicy::default());
    f.manager.add_process(record("worker")).unwrap();
    let err = f.manager.add_process(record("worker")).unwrap_err();
    assert!(matches!(err, ProcessError::DuplicateName { .. }));
    assert_eq!(f.manager.list_processes().len(), 1);
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let f = fixture(RestartPolicy::default());
    f.manager.add_process(record("worker")).unwrap();

    f.manager.start_process("worker").await.unwrap();
    f.manager.start_process("worker").await.unwrap();

    assert_eq!(f.controller.launches().len(), 1);
    assert_eq!(f.events.count("worker", EventKind::Started), 1);
}

#[tokio::test]
async fn test_crash_is_detected_and_restarted() {
    let f = fixture(RestartPolicy::default());
    f.manager.add_process(record("worker")).unwrap();
    f.manager.start_process("worker").await.unwrap();

    f.controller.crash("worker");
    f.manager.check_processes().await;

    let snapshot = f.manager.get_process("worker").unwrap();
    assert_eq!(snapshot.current_state, ProcessState::Running);
    assert_eq!(snapshot.restart_count, 1);
    assert_eq!(snapshot.last_exit_code, Some(1));
    assert_eq!(snapshot.pid, Some(1002));
    assert_eq!(
        f.events.kinds_for("worker"),
        vec![EventKind::Started, EventKind::Crashed, EventKind::Restarted]
    );

    let history: Vec<ProcessState> = f
        .manager
        .state_history("worker")
        .unwrap()
        .iter()
        .map(|t| t.to_state)
        .collect();
    assert!(history.contains(&ProcessState::Crashed));
    assert_eq!(history.last(), Some(&ProcessState::Running));
}

#[tokio::test]
async fn test_stopped_process_is_not_restarted() {
    let f = fixture(RestartPolicy::default());
    f.manager.add_process(record("worker")).unwrap();
    f.manager.start_process("worker").await.unwrap();
    f.manager.stop_process("worker").await.unwrap();

    f.manager.check_processes().await;
    f.manager.check_processes().await;

    assert_eq!(state_of(&f.manager, "worker"), ProcessState::Stopped);
    assert_eq!(f.controller.launches().len(), 1);
    assert_eq!(f.events.count("worker", EventKind::Restarted), 0);
}

#[tokio::test]
async fn test_dependencies_start_first() {
    let f = fixture(RestartPolicy::default());
    f.manager.add_process(record("db")).unwrap();
    f.manager
        .add_process(record("cache").with_dependency("db"))
        .unwrap();
    f.manager
        .add_process(record("api").with_dependency("cache").with_dependency("db"))
        .unwrap();

    f.manager.start_process("api").await.unwrap();

    assert_eq!(f.controller.launches(), vec!["db", "cache", "api"]);
    for name in ["db", "cache", "api"] {
        assert_eq!(state_of(&f.manager, name), ProcessState::Running);
    }
}

#[tokio::test]
async fn test_dependency_cycle_launches_nothing() {
    let f = fixture(RestartPolicy::default());
    f.manager.add_process(record("a").with_dependency("b")).unwrap();
    f.manager.add_process(record("b").with_dependency("a")).unwrap();

    let err = f.manager.start_process("a").await.unwrap_err();
    match err {
        ProcessError::DependencyCycle { chain } => assert_eq!(chain, vec!["a", "b", "a"]),
        other => panic!("expected cycle, got {:?}", other),
    }

    assert!(f.controller.launches().is_empty());
    assert_eq!(state_of(&f.manager, "a"), ProcessState::Stopped);
    assert_eq!(state_of(&f.manager, "b"), ProcessState::Stopped);
    assert_eq!(f.events.kinds_for("a"), vec![EventKind::StartFailed]);

    assert!(f.manager.restart_process("b").await.is_err());
    assert_eq!(f.events.kinds_for("b"), vec![EventKind::StartFailed]);
}

#[tokio::test]
async fn test_unknown_dependency_reports_start_failed() {
    let f = fixture(RestartPolicy::default());
    f.manager.add_process(record("api").with_dependency("ghost")).unwrap();

    let err = f.manager.start_process("api").await.unwrap_err();
    assert!(matches!(err, ProcessError::Configuration { .. }));
    assert!(f.controller.launches().is_empty());
    assert_eq!(f.events.kinds_for("api"), vec![EventKind::StartFailed]);
}

#[tokio::test]
async fn test_failed_dependency_blocks_dependent() {
    let f = fixture(RestartPolicy::default());
    f.manager.add_process(record("db")).unwrap();
    f.manager.add_process(record("api").with_dependency("db")).unwrap();
    f.controller.fail_launch("db", true);

    let err = f.manager.start_process("api").await.unwrap_err();
    assert!(matches!(err, ProcessError::LaunchFailed { .. }));

    assert!(f.controller.launches().is_empty());
    assert_eq!(state_of(&f.manager, "db"), ProcessState::Stopped);
    assert_eq!(state_of(&f.manager, "api"), ProcessState::Stopped);
    assert_eq!(f.events.kinds_for("db"), vec![EventKind::StartFailed]);
    assert_eq!(f.events.kinds_for("api"), vec![EventKind::StartFailed]);
}

#[tokio::test]
async fn test_remove_running_process_is_busy() {
    let f = fixture(RestartPolicy::default());
    f.manager.add_process(record("worker")).unwrap();
    f.manager.start_process("worker").await.unwrap();

    let err = f.manager.remove_process("worker").unwrap_err();
    assert!(matches!(err, ProcessError::ProcessBusy { .. }));

    f.manager.stop_process("worker").await.unwrap();
    let removed = f.manager.remove_process("worker").unwrap();
    assert_eq!(removed.name, "worker");
    assert!(f.manager.get_process("worker").is_err());
}

#[tokio::test]
async fn test_fixed_count_gives_up() {
    let f = fixture(RestartPolicy::FixedCount { max_restarts: 2 });
    f.manager.add_process(record("flaky")).unwrap();
    f.manager.start_process("flaky").await.unwrap();

    for _ in 0..3 {
        f.controller.crash("flaky");
        f.manager.check_processes().await;
    }

    let snapshot = f.manager.get_process("flaky").unwrap();
    assert_eq!(snapshot.current_state, ProcessState::Stopped);
    assert_eq!(snapshot.desired_state, DesiredState::Stopped);
    assert_eq!(snapshot.restart_count, 2);
    assert_eq!(f.controller.launches().len(), 3);
    assert_eq!(f.events.kinds_for("flaky").last(), Some(&EventKind::Stopped));

    // Stays down
    f.manager.check_processes().await;
    assert_eq!(f.controller.launches().len(), 3);
}

#[tokio::test]
async fn test_backoff_delays_restart() {
    let f = fixture(RestartPolicy::ExponentialBackoff {
        initial_delay: Duration::from_secs(10),
        max_delay: Duration::from_secs(60),
        multiplier: 2.0,
        max_restarts: None,
    });
    f.manager.add_process(record("slow")).unwrap();
    f.manager.start_process("slow").await.unwrap();

    let before = Utc::now();
    f.controller.crash("slow");
    f.manager.check_processes().await;

    let snapshot = f.manager.get_process("slow").unwrap();
    assert_eq!(snapshot.current_state, ProcessState::Crashed);
    let at = snapshot.next_restart_at.expect("backoff scheduled");
    assert!(at >= before + chrono::Duration::seconds(9));

    // Not due yet
    f.manager.check_processes().await;
    assert_eq!(state_of(&f.manager, "slow"), ProcessState::Crashed);
    assert_eq!(f.controller.launches().len(), 1);

    // A manual stop cancels the pending restart
    f.manager.stop_process("slow").await.unwrap();
    let snapshot = f.manager.get_process("slow").unwrap();
    assert_eq!(snapshot.current_state, ProcessState::Stopped);
    assert_eq!(snapshot.next_restart_at, None);
}

#[tokio::test]
async fn test_auto_restart_disabled() {
    let f = fixture(RestartPolicy::default());
    f.manager
        .add_process(record("oneshot").with_auto_restart(false))
        .unwrap();
    f.manager.start_process("oneshot").await.unwrap();

    f.controller.crash("oneshot");
    f.manager.check_processes().await;

    let snapshot = f.manager.get_process("oneshot").unwrap();
    assert_eq!(snapshot.current_state, ProcessState::Stopped);
    assert_eq!(snapshot.desired_state, DesiredState::Stopped);
    assert_eq!(f.controller.launches().len(), 1);

    let last = f.events.events().pop().unwrap();
    assert_eq!(last.kind, EventKind::Stopped);
    assert_eq!(last.detail.as_deref(), Some("auto-restart disabled"));
}

#[tokio::test]
async fn test_failed_auto_restart_is_retried() {
    let f = fixture(RestartPolicy::default());
    f.manager.add_process(record("worker")).unwrap();
    f.manager.start_process("worker").await.unwrap();

    f.controller.crash("worker");
    f.controller.fail_launch("worker", true);
    f.manager.check_processes().await;

    let snapshot = f.manager.get_process("worker").unwrap();
    assert_eq!(snapshot.current_state, ProcessState::Crashed);
    assert_eq!(snapshot.desired_state, DesiredState::Running);
    assert_eq!(f.events.count("worker", EventKind::StartFailed), 1);

    f.controller.fail_launch("worker", false);
    f.manager.check_processes().await;

    let snapshot = f.manager.get_process("worker").unwrap();
    assert_eq!(snapshot.current_state, ProcessState::Running);
    assert_eq!(snapshot.restart_count, 2);
}

#[tokio::test]
async fn test_restart_process() {
    let f = fixture(RestartPolicy::default());
    f.manager.add_process(record("worker")).unwrap();
    f.manager.start_process("worker").await.unwrap();

    f.manager.restart_process("worker").await.unwrap();

    let snapshot = f.manager.get_process("worker").unwrap();
    assert_eq!(snapshot.current_state, ProcessState::Running);
    assert_eq!(snapshot.pid, Some(1002));
    assert_eq!(snapshot.restart_count, 0);
    assert_eq!(
        f.events.kinds_for("worker"),
        vec![EventKind::Started, EventKind::Restarted]
    );

    // Restarting a stopped process just starts it
    f.manager.stop_process("worker").await.unwrap();
    f.manager.restart_process("worker").await.unwrap();
    assert_eq!(state_of(&f.manager, "worker"), ProcessState::Running);
}

#[tokio::test]
async fn test_refused_terminate_keeps_process_running() {
    let f = fixture(RestartPolicy::default());
    f.manager.add_process(record("worker")).unwrap();
    f.manager.start_process("worker").await.unwrap();
    f.controller.refuse_terminate(true);

    let err = f.manager.stop_process("worker").await.unwrap_err();
    assert!(matches!(err, ProcessError::TerminateFailed { .. }));
    let snapshot = f.manager.get_process("worker").unwrap();
    assert_eq!(snapshot.current_state, ProcessState::Running);
    assert!(snapshot.pid.is_some());

    f.controller.refuse_terminate(false);
    f.manager.stop_process("worker").await.unwrap();
    assert_eq!(state_of(&f.manager, "worker"), ProcessState::Stopped);
}

#[tokio::test]
async fn test_group_operations() {
    let f = fixture(RestartPolicy::default());
    f.manager.add_process(record("web1").with_tag("web")).unwrap();
    f.manager.add_process(record("web2").with_tag("web")).unwrap();
    f.manager.add_process(record("db")).unwrap();

    let started = f.manager.start_group("web").await;
    assert!(started.is_success());
    assert_eq!(started.succeeded.len(), 2);
    assert_eq!(state_of(&f.manager, "db"), ProcessState::Stopped);

    let stopped = f.manager.stop_group("web").await;
    assert_eq!(stopped.succeeded.len(), 2);
    assert_eq!(state_of(&f.manager, "web1"), ProcessState::Stopped);

    f.controller.fail_launch("db", true);
    let all = f.manager.start_all().await;
    assert_eq!(all.succeeded, vec!["web1", "web2"]);
    assert_eq!(all.failed.len(), 1);
    assert_eq!(all.failed[0].0, "db");

    let restarted = f.manager.restart_all().await;
    assert_eq!(restarted.succeeded.len(), 2);

    let stopped = f.manager.stop_all().await;
    assert!(stopped.is_success());
    assert!(f.manager.list_processes().iter().all(|p| !p.is_running()));
}

#[tokio::test]
async fn test_lookup_by_id_and_tag() {
    let f = fixture(RestartPolicy::default());
    f.manager
        .add_process(record("web-server").with_id("web-1").with_tag("frontend"))
        .unwrap();

    assert_eq!(f.manager.get_process("web-server").unwrap().name(), "web-server");
    assert_eq!(f.manager.get_process("web-1").unwrap().name(), "web-server");
    assert_eq!(f.manager.get_process("frontend").unwrap().name(), "web-server");

    // Lifecycle operations accept the id too
    f.manager.start_process("web-1").await.unwrap();
    assert_eq!(state_of(&f.manager, "web-server"), ProcessState::Running);
}

#[tokio::test]
async fn test_shutdown_stops_everything() {
    let f = fixture(RestartPolicy::default());
    f.manager.add_process(record("a")).unwrap();
    f.manager.add_process(record("b")).unwrap();
    f.manager.add_process(record("idle")).unwrap();
    f.manager.start_process("a").await.unwrap();
    f.manager.start_process("b").await.unwrap();

    let report = f.manager.shutdown(Duration::from_secs(5)).await;
    assert!(report.is_success());
    assert_eq!(report.succeeded, vec!["a", "b"]);
    assert!(f.manager.cancellation_token().is_cancelled());

    for name in ["a", "b", "idle"] {
        assert_eq!(state_of(&f.manager, name), ProcessState::Stopped);
    }

    let err = f.manager.start_process("a").await.unwrap_err();
    assert!(matches!(err, ProcessError::OperationNotAllowed { .. }));
    let err = f.manager.restart_process("a").await.unwrap_err();
    assert!(matches!(err, ProcessError::OperationNotAllowed { .. }));
}

#[tokio::test]
async fn test_monitor_loop_restarts_and_exits_on_shutdown() {
    let f = fixture(RestartPolicy::default());
    f.manager.add_process(record("worker")).unwrap();
    f.manager.start_process("worker").await.unwrap();

    let monitor = {
        let manager = Arc::clone(&f.manager);
        tokio::spawn(async move { manager.run_monitor().await })
    };

    f.controller.crash("worker");
    let restarted = tokio::time::timeout(Duration::from_secs(2), async {
        while f.events.count("worker", EventKind::Restarted) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(restarted.is_ok(), "monitor never restarted the process");

    f.manager.shutdown(Duration::from_secs(1)).await;
    tokio::time::timeout(Duration::from_secs(1), monitor)
        .await
        .expect("monitor loop did not exit")
        .unwrap();
    assert_eq!(state_of(&f.manager, "worker"), ProcessState::Stopped);
}

#[tokio::test]
async fn test_zero_check_interval_does_not_stop_monitoring() {
    let f = fixture(RestartPolicy::default());
    f.manager.add_process(record("worker")).unwrap();
    f.manager.start_process("worker").await.unwrap();

    let monitor = {
        let manager = Arc::clone(&f.manager);
        tokio::spawn(async move { manager.monitor_processes(Duration::ZERO).await })
    };

    f.controller.crash("worker");
    let restarted = tokio::time::timeout(Duration::from_secs(2), async {
        while f.events.count("worker", EventKind::Restarted) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(restarted.is_ok(), "monitor never restarted the process");

    f.manager.graceful_shutdown(Duration::from_secs(1)).await;
    tokio::time::timeout(Duration::from_secs(1), monitor)
        .await
        .expect("monitor loop did not exit")
        .unwrap();
}

#[tokio::test]
async fn test_stop_during_auto_restart_launch_wins() {
    let f = fixture(RestartPolicy::default());
    f.manager.add_process(record("worker")).unwrap();
    f.manager.start_process("worker").await.unwrap();

    f.controller.hold_launches();
    f.controller.crash("worker");
    let pass = {
        let manager = Arc::clone(&f.manager);
        tokio::spawn(async move { manager.check_processes().await })
    };
    f.controller.wait_for_held_launch().await;
    assert_eq!(state_of(&f.manager, "worker"), ProcessState::Starting);

    let stop = {
        let manager = Arc::clone(&f.manager);
        tokio::spawn(async move { manager.stop_process("worker").await })
    };
    let stop_requested = tokio::time::timeout(Duration::from_secs(2), async {
        while f.manager.get_process("worker").unwrap().desired_state != DesiredState::Stopped {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(stop_requested.is_ok(), "stop never took effect");

    f.controller.release_launches();
    pass.await.unwrap();
    stop.await.unwrap().unwrap();

    let snapshot = f.manager.get_process("worker").unwrap();
    assert_eq!(snapshot.current_state, ProcessState::Stopped);
    assert_eq!(snapshot.desired_state, DesiredState::Stopped);
    assert_eq!(f.controller.launches(), vec!["worker", "worker"]);

    for _ in 0..3 {
        f.manager.check_processes().await;
    }
    assert_eq!(f.controller.launches().len(), 2);
    assert_eq!(state_of(&f.manager, "worker"), ProcessState::Stopped);
}

#[tokio::test]
async fn test_set_priority_requires_running() {
    let f = fixture(RestartPolicy::default());
    f.manager.add_process(record("worker")).unwrap();

    let err = f.manager.set_priority("worker", 5).await.unwrap_err();
    match err {
        ProcessError::OperationNotAllowed {
            id,
            operation,
            state,
        } => {
            assert_eq!(id, "worker");
            assert_eq!(operation, "set_priority");
            assert_eq!(state, ProcessState::Stopped.to_string());
        }
        other => panic!("expected OperationNotAllowed, got {:?}", other),
    }

    assert!(matches!(
        f.manager.set_priority("ghost", 5).await,
        Err(ProcessError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_scheduled_actions_reach_the_manager() {
    let f = fixture(RestartPolicy::default());
    f.manager.add_process(record("report")).unwrap();

    let scheduler = Arc::new(
        Scheduler::new(SchedulerConfig::default()).with_target(f.manager.clone()),
    );
    f.manager
        .schedule(
            &scheduler,
            "report",
            ScheduledAction::Start,
            Trigger::once_after(Duration::from_millis(100)).unwrap(),
        )
        .unwrap();

    let token = CancellationToken::new();
    let runner = {
        let scheduler = Arc::clone(&scheduler);
        let token = token.clone();
        tokio::spawn(async move { scheduler.run(token).await })
    };

    wait_for_state(&f.manager, "report", ProcessState::Running).await;
    assert!(scheduler.is_empty());

    token.cancel();
    runner.await.unwrap();
}

#[tokio::test]
async fn test_schedule_process_validation() {
    let f = fixture(RestartPolicy::default());
    f.manager.add_process(record("report")).unwrap();
    let scheduler = Scheduler::new(SchedulerConfig::default());

    let id = f
        .manager
        .schedule_process(&scheduler, "report", ScheduledAction::Restart, "03:30")
        .unwrap();
    let job = scheduler.job(id).unwrap();
    assert_eq!(job.trigger, Trigger::daily("03:30").unwrap());

    let err = f
        .manager
        .schedule_process(&scheduler, "report", ScheduledAction::Stop, "25:00")
        .unwrap_err();
    assert!(matches!(err, ProcessError::InvalidTrigger { .. }));

    let err = f
        .manager
        .schedule_process(&scheduler, "ghost", ScheduledAction::Stop, "10:00")
        .unwrap_err();
    assert!(matches!(err, ProcessError::NotFound { .. }));
    assert_eq!(scheduler.len(), 1);
}

#[test]
fn test_scheduled_action_parsing() {
    assert_eq!("start".parse::<ScheduledAction>().unwrap(), ScheduledAction::Start);
    assert_eq!("Restart".parse::<ScheduledAction>().unwrap(), ScheduledAction::Restart);
    assert!("pause".parse::<ScheduledAction>().is_err());
    assert_eq!(ScheduledAction::Stop.to_string(), "stop");
}

#[tokio::test]
async fn test_view_logs() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("worker.log");

    let f = fixture(RestartPolicy::default());
    f.manager
        .add_process(record("worker").with_log_file(&log))
        .unwrap();
    f.manager.add_process(record("quiet")).unwrap();

    assert_eq!(f.manager.view_logs("worker").await.unwrap(), None);
    assert_eq!(f.manager.view_logs("quiet").await.unwrap(), None);

    std::fs::write(&log, "line one\nline two\n").unwrap();
    let content = f.manager.view_logs("worker").await.unwrap().unwrap();
    assert!(content.contains("line two"));
}

#[tokio::test]
async fn test_resource_usage() {
    let controller = MockController::default();
    let manager = ExeProcessManager::new(ManagerOptions::default(), Arc::new(controller))
        .with_metrics(Arc::new(FixedMetrics));
    manager.add_process(record("worker")).unwrap();

    assert_eq!(manager.resource_usage("worker").unwrap(), ResourceSample::default());

    manager.start_process("worker").await.unwrap();
    let sample = manager.resource_usage("worker").unwrap();
    assert_eq!(sample.memory_bytes, 4096);
    assert_eq!(
        manager.get_process("worker").unwrap().resources,
        Some(sample)
    );

    manager.check_processes().await;
    assert_eq!(manager.get_process("worker").unwrap().resources, Some(sample));
}

#[cfg(unix)]
#[tokio::test]
async fn test_real_process_crash_and_restart() {
    let events = Arc::new(MemoryEventSink::new());
    let manager = ExeProcessManager::with_os_controller(ManagerOptions {
        graceful_timeout: Duration::from_secs(2),
        ..Default::default()
    })
    .with_event_sink(events.clone());
    manager
        .add_process(ProcessRecord::new("sleeper", "/bin/sleep").with_args(["30"]))
        .unwrap();

    manager.start_process("sleeper").await.unwrap();
    let first_pid = manager.get_process("sleeper").unwrap().pid.unwrap();

    epm_process::force_kill(first_pid).unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        manager.check_processes().await;
        let snapshot = manager.get_process("sleeper").unwrap();
        if snapshot.is_running() && snapshot.pid != Some(first_pid) {
            assert_eq!(snapshot.restart_count, 1);
            break;
        }
        assert!(Instant::now() < deadline, "process was not restarted");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(events.count("sleeper", EventKind::Crashed), 1);

    let report = manager.shutdown(Duration::from_secs(5)).await;
    assert!(report.is_success());
    assert_eq!(state_of(&manager, "sleeper"), ProcessState::Stopped);
}

#[cfg(unix)]
#[tokio::test]
async fn test_real_process_priority() {
    let manager = ExeProcessManager::with_os_controller(ManagerOptions {
        graceful_timeout: Duration::from_secs(2),
        ..Default::default()
    });
    manager
        .add_process(ProcessRecord::new("sleeper", "/bin/sleep").with_args(["30"]))
        .unwrap();
    manager.start_process("sleeper").await.unwrap();
    let pid = manager.get_process("sleeper").unwrap().pid.unwrap();

    manager.set_priority("sleeper", 7).await.unwrap();
    assert_eq!(epm_process::get_priority(pid).unwrap(), 7);

    let report = manager.shutdown(Duration::from_secs(5)).await;
    assert!(report.is_success());
    assert!(matches!(
        manager.set_priority("sleeper", 7).await,
        Err(ProcessError::OperationNotAllowed { .. })
    ));
}
