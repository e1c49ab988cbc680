//! Reconciliation tests against the mock process table and launcher
//!
//! Delays run on paused tokio time, so the settle and escalation waits cost
//! nothing in wall-clock time.

use super::*;
use schema::DesiredState;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;
use tokio::time::Instant;

struct Harness {
    _dir: TempDir,
    pid_file: PathBuf,
    table: MockProcessTable,
    launcher: MockLauncher,
    supervisor: ForwardSupervisor,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let pid_file = dir.path().join("forward.pid");
        let table = MockProcessTable::new();
        let launcher = MockLauncher::new(table.clone());
        let supervisor = ForwardSupervisor::new(
            Arc::new(launcher.clone()),
            Arc::new(table.clone()),
            SupervisorConfig::default(),
        );
        Self {
            _dir: dir,
            pid_file,
            table,
            launcher,
            supervisor,
        }
    }

    fn spec(&self, state: DesiredState) -> ForwardSpec {
        ForwardSpec {
            namespace: "default".to_string(),
            pod: "redis-0".to_string(),
            local_port: 16379,
            remote_port: 6379,
            state,
            timeout: 300,
            pid_file: self.pid_file.clone(),
            kubectl: "kubectl".to_string(),
        }
    }

    async fn start(&self, dry_run: bool) -> Result<Reconciliation> {
        self.supervisor
            .reconcile(&self.spec(DesiredState::Started), dry_run)
            .await
    }

    async fn stop(&self, dry_run: bool) -> Result<Reconciliation> {
        self.supervisor
            .reconcile(&self.spec(DesiredState::Stopped), dry_run)
            .await
    }

    fn recorded_pid(&self) -> Option<u32> {
        pidfile::read_pid(&self.pid_file).expect("readable pid file")
    }
}

#[tokio::test(start_paused = true)]
async fn start_spawns_and_records_pid() {
    let h = Harness::new();
    let began = Instant::now();

    let outcome = h.start(false).await.expect("start");

    assert!(outcome.report.changed);
    assert_eq!(outcome.state, ForwardState::Active);
    let pid = outcome.report.pid.expect("pid reported");
    assert_eq!(h.recorded_pid(), Some(pid));
    assert!(h.table.is_alive(pid));
    assert_eq!(outcome.report.local_port, 16379);
    assert_eq!(outcome.report.remote_port, 6379);
    assert!(began.elapsed() >= DEFAULT_SETTLE_DELAY);

    let launched = h.launcher.launched();
    assert_eq!(launched.len(), 1);
    assert_eq!(
        launched[0].1,
        vec!["port-forward", "-n", "default", "redis-0", "16379:6379"]
    );
}

#[tokio::test(start_paused = true)]
async fn second_start_is_a_no_op() {
    let h = Harness::new();
    let first = h.start(false).await.expect("first start");
    let contents_before = fs::read_to_string(&h.pid_file).unwrap();

    let second = h.start(false).await.expect("second start");

    assert!(!second.report.changed);
    assert_eq!(second.report.pid, first.report.pid);
    assert_eq!(second.state, ForwardState::Active);
    assert_eq!(fs::read_to_string(&h.pid_file).unwrap(), contents_before);
    assert_eq!(h.launcher.launched().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn dead_pid_is_replaced() {
    let h = Harness::new();
    fs::write(&h.pid_file, "31337\n").unwrap();

    let outcome = h.start(false).await.expect("start");

    assert!(outcome.report.changed);
    let pid = outcome.report.pid.unwrap();
    assert_ne!(pid, 31337);
    assert_eq!(h.recorded_pid(), Some(pid));
    assert_eq!(h.launcher.launched().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn malformed_pid_file_is_treated_as_stale() {
    let h = Harness::new();
    fs::write(&h.pid_file, "definitely not a pid").unwrap();

    let outcome = h.start(false).await.expect("start");

    assert!(outcome.report.changed);
    assert_eq!(h.recorded_pid(), outcome.report.pid);
}

#[tokio::test(start_paused = true)]
async fn forward_dying_during_settle_fails_without_pid_file() {
    let h = Harness::new();
    h.launcher
        .add_instruction(MockInstruction::ExitsImmediately { exit_code: 1 });

    let err = h.start(false).await.unwrap_err();

    assert!(matches!(err, CoreError::ForwardDied { .. }));
    assert!(err
        .to_string()
        .contains("Check kubectl access and pod status"));
    assert!(!h.pid_file.exists());
}

#[tokio::test(start_paused = true)]
async fn forward_dying_during_settle_after_stale_file_leaves_nothing() {
    let h = Harness::new();
    fs::write(&h.pid_file, "31337").unwrap();
    h.launcher
        .add_instruction(MockInstruction::ExitsImmediately { exit_code: 1 });

    assert!(h.start(false).await.is_err());
    assert!(!h.pid_file.exists());
}

#[tokio::test(start_paused = true)]
async fn unexecutable_binary_is_a_spawn_error() {
    let h = Harness::new();
    h.launcher.add_instruction(MockInstruction::SpawnFails);

    let err = h.start(false).await.unwrap_err();

    assert!(matches!(err, CoreError::ProcessSpawn(_)));
    assert!(!h.pid_file.exists());
}

#[tokio::test(start_paused = true)]
async fn dry_run_start_touches_nothing() {
    let h = Harness::new();

    let outcome = h.start(true).await.expect("dry run");

    assert!(!outcome.report.changed);
    assert_eq!(outcome.report.pid, None);
    assert_eq!(outcome.state, ForwardState::Absent);
    assert!(!h.pid_file.exists());
    assert!(h.launcher.launched().is_empty());
    assert_eq!(h.table.live_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn dry_run_start_reports_live_forward() {
    let h = Harness::new();
    h.table.insert(555);
    fs::write(&h.pid_file, "555").unwrap();

    let outcome = h.start(true).await.expect("dry run");

    assert!(!outcome.report.changed);
    assert_eq!(outcome.report.pid, Some(555));
    assert_eq!(outcome.state, ForwardState::Active);
}

#[tokio::test(start_paused = true)]
async fn dry_run_start_keeps_stale_pid_file() {
    let h = Harness::new();
    fs::write(&h.pid_file, "garbage").unwrap();

    let outcome = h.start(true).await.expect("dry run");

    assert!(!outcome.report.changed);
    assert_eq!(fs::read_to_string(&h.pid_file).unwrap(), "garbage");
    assert!(h.launcher.launched().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stop_without_pid_file_is_a_no_op() {
    let h = Harness::new();

    let outcome = h.stop(false).await.expect("stop");

    assert!(!outcome.report.changed);
    assert_eq!(outcome.report.pid, None);
    assert_eq!(outcome.state, ForwardState::Absent);
    assert!(h.table.signals().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stop_sends_term_then_kill_and_removes_pid_file() {
    let h = Harness::new();
    h.table.insert(900);
    fs::write(&h.pid_file, "900").unwrap();
    let began = Instant::now();

    let outcome = h.stop(false).await.expect("stop");

    assert!(outcome.report.changed);
    assert_eq!(outcome.report.pid, None);
    assert_eq!(
        h.table.signals(),
        vec![(900, GroupSignal::Terminate), (900, GroupSignal::Kill)]
    );
    assert!(began.elapsed() >= DEFAULT_ESCALATION_DELAY);
    assert!(!h.pid_file.exists());
    assert!(!h.table.is_alive(900));
}

#[tokio::test(start_paused = true)]
async fn stop_kills_term_ignoring_group_members() {
    let h = Harness::new();
    h.table.insert(900);
    h.table.insert_process(
        901,
        MockProcess {
            pgid: 900,
            ignores_term: true,
        },
    );
    fs::write(&h.pid_file, "900").unwrap();

    let outcome = h.stop(false).await.expect("stop");

    assert!(outcome.report.changed);
    assert_eq!(h.table.live_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn stop_with_dead_pid_only_cleans_up() {
    let h = Harness::new();
    fs::write(&h.pid_file, "4321").unwrap();

    let outcome = h.stop(false).await.expect("stop");

    assert!(!outcome.report.changed);
    assert!(h.table.signals().is_empty());
    assert!(!h.pid_file.exists());
}

#[tokio::test(start_paused = true)]
async fn stop_with_malformed_pid_file_cleans_up() {
    let h = Harness::new();
    fs::write(&h.pid_file, "\n\n").unwrap();

    let outcome = h.stop(false).await.expect("stop");

    assert!(!outcome.report.changed);
    assert!(!h.pid_file.exists());
}

#[tokio::test(start_paused = true)]
async fn stop_refused_by_permissions_is_surfaced() {
    let h = Harness::new();
    h.table.insert(1);
    h.table.deny_signals_to(1);
    fs::write(&h.pid_file, "1").unwrap();

    let err = h.stop(false).await.unwrap_err();

    assert!(matches!(err, CoreError::ProcessSignal(_)));
    assert!(h.pid_file.exists());
}

#[tokio::test(start_paused = true)]
async fn dry_run_stop_touches_nothing() {
    let h = Harness::new();
    h.table.insert(900);
    fs::write(&h.pid_file, "900").unwrap();

    let outcome = h.stop(true).await.expect("dry run");

    assert!(outcome.report.changed);
    assert_eq!(outcome.report.pid, None);
    assert_eq!(outcome.state, ForwardState::Active);
    assert!(h.table.signals().is_empty());
    assert!(h.table.is_alive(900));
    assert!(h.pid_file.exists());
}

#[tokio::test(start_paused = true)]
async fn dry_run_stop_of_dead_forward_reports_no_change() {
    let h = Harness::new();
    fs::write(&h.pid_file, "901").unwrap();

    let outcome = h.stop(true).await.expect("dry run");

    assert!(!outcome.report.changed);
    assert_eq!(outcome.state, ForwardState::Absent);
    assert!(h.table.signals().is_empty());
    assert!(h.pid_file.exists());
}

#[tokio::test(start_paused = true)]
async fn unwritable_pid_file_kills_new_forward() {
    let h = Harness::new();
    let blocker = h.pid_file.with_file_name("blocker");
    fs::write(&blocker, "").unwrap();
    let mut spec = h.spec(DesiredState::Started);
    spec.pid_file = blocker.join("forward.pid");

    let err = h.supervisor.reconcile(&spec, false).await.unwrap_err();

    assert!(matches!(err, CoreError::IoError(_)), "got {err}");
    let (pid, _) = h.launcher.launched()[0].clone();
    assert_eq!(h.table.signals(), vec![(pid, GroupSignal::Kill)]);
    assert_eq!(h.table.live_count(), 0);
    assert!(!spec.pid_file.exists());
    assert!(!h.pid_file.exists());
}

#[tokio::test(start_paused = true)]
async fn failed_status_check_kills_new_forward() {
    let h = Harness::new();
    h.launcher.add_instruction(MockInstruction::WaitFails);

    let err = h.start(false).await.unwrap_err();

    assert!(matches!(err, CoreError::ProcessWait(_)), "got {err}");
    let (pid, _) = h.launcher.launched()[0].clone();
    assert_eq!(h.table.signals(), vec![(pid, GroupSignal::Kill)]);
    assert_eq!(h.table.live_count(), 0);
    assert!(!h.pid_file.exists());
}

#[tokio::test(start_paused = true)]
async fn start_then_stop_round_trip() {
    let h = Harness::new();

    let started = h.start(false).await.expect("start");
    let pid = started.report.pid.unwrap();
    let stopped = h.stop(false).await.expect("stop");

    assert!(stopped.report.changed);
    assert!(!h.pid_file.exists());
    assert!(!h.table.is_alive(pid));
    assert_eq!(h.table.live_count(), 0);

    // and the forward can be brought back
    let restarted = h.start(false).await.expect("restart");
    assert!(restarted.report.changed);
    assert_ne!(restarted.report.pid, Some(pid));
}

#[tokio::test(start_paused = true)]
async fn custom_delays_are_honoured() {
    let table = MockProcessTable::new();
    let launcher = MockLauncher::new(table.clone());
    let config = SupervisorConfig {
        settle_delay: Duration::from_millis(250),
        escalation_delay: Duration::from_millis(50),
    };
    let supervisor = ForwardSupervisor::new(Arc::new(launcher), Arc::new(table), config);
    assert_eq!(supervisor.config(), config);

    let h = Harness::new();
    let began = Instant::now();
    supervisor
        .reconcile(&h.spec(DesiredState::Started), false)
        .await
        .expect("start");
    let elapsed = began.elapsed();
    assert!(elapsed >= Duration::from_millis(250));
    assert!(elapsed < DEFAULT_SETTLE_DELAY);
}
