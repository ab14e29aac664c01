// tests/keep_alive_lifecycle.rs
#![cfg(unix)]

mod common;
use crate::common::builders::{CommandSpecBuilder, keep_alive, once};
use crate::common::{eventually, init_tracing, real_executor, with_timeout};

use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

use runq::errors::ErrorKind;
use runq::exec::ExecContext;
use runq::monitor::{HealthEventKind, HealthStatus};
use runq::platform;
use runq::tracker::ProcessTracker;
use runq_test_utils::{Recorded, RecordingReporter};

#[tokio::test]
async fn keep_alive_returns_immediately_and_stop_cleans_up() {
    init_tracing();
    let dir = tempdir().unwrap();
    let executor = real_executor(dir.path(), ExecContext::default());

    let started = Instant::now();
    with_timeout(executor.execute(&[keep_alive("sleeper", "sleep 5")], &CancellationToken::new()))
        .await
        .expect("keepAlive start should succeed");
    assert!(started.elapsed() < Duration::from_secs(2));

    let result = executor.get_status().results[0].clone();
    let pid = result.pid.expect("keepAlive result carries the PID");
    assert_eq!(result.output, format!("started 'sleeper' (PID {pid})"));

    let tracked = executor.get_tracked_processes();
    assert_eq!(tracked.len(), 1);
    assert_eq!(tracked[&pid].name, "sleeper");
    assert!(executor.has_active_keep_alive_processes());

    // A second invocation sees the same record on disk.
    let other = ProcessTracker::open(dir.path().join("tracker.json")).unwrap();
    assert!(other.get_process(pid).is_some());

    let stop_started = Instant::now();
    with_timeout(executor.stop()).await;
    assert!(stop_started.elapsed() < Duration::from_secs(8));

    assert!(executor.get_tracked_processes().is_empty());
    assert!(!executor.has_active_keep_alive_processes());
    assert!(!platform::native().is_alive(pid));

    other.reload().unwrap();
    assert!(other.is_empty());
}

#[tokio::test]
async fn stop_also_terminates_grandchildren() {
    init_tracing();
    let dir = tempdir().unwrap();
    let ctx = ExecContext::default().with_work_dir(Some(dir.path().to_path_buf()));
    let executor = real_executor(dir.path(), ctx);

    let tree = keep_alive("tree", "sleep 30 & echo $! > grandchild.pid; wait");
    with_timeout(executor.execute(&[tree], &CancellationToken::new()))
        .await
        .unwrap();

    let pid_file = dir.path().join("grandchild.pid");
    assert!(
        eventually(Duration::from_secs(3), || {
            std::fs::read_to_string(&pid_file).is_ok_and(|s| s.trim().parse::<u32>().is_ok())
        })
        .await,
        "grandchild pid file was never written"
    );
    let grandchild: u32 = std::fs::read_to_string(&pid_file)
        .unwrap()
        .trim()
        .parse()
        .unwrap();

    let control = platform::native();
    assert!(control.is_alive(grandchild));

    with_timeout(executor.stop()).await;

    assert!(
        eventually(Duration::from_secs(3), || !control.is_alive(grandchild)).await,
        "grandchild {grandchild} survived stop()"
    );
    assert!(executor.get_tracked_processes().is_empty());
}

#[tokio::test]
async fn stop_force_kills_grandchildren_that_ignore_sigterm() {
    init_tracing();
    let dir = tempdir().unwrap();
    let ctx = ExecContext::default().with_work_dir(Some(dir.path().to_path_buf()));
    let executor = real_executor(dir.path(), ctx);

    // The leader shell exits on SIGTERM; the subshell it spawned does not.
    let tree = keep_alive(
        "stubborn-tree",
        "(trap '' TERM; touch ready; sleep 30) & echo $! > grandchild.pid; wait",
    );
    with_timeout(executor.execute(&[tree], &CancellationToken::new()))
        .await
        .unwrap();

    let pid_file = dir.path().join("grandchild.pid");
    let ready = dir.path().join("ready");
    assert!(
        eventually(Duration::from_secs(3), || {
            ready.exists()
                && std::fs::read_to_string(&pid_file)
                    .is_ok_and(|s| s.trim().parse::<u32>().is_ok())
        })
        .await,
        "grandchild never became ready"
    );
    let grandchild: u32 = std::fs::read_to_string(&pid_file)
        .unwrap()
        .trim()
        .parse()
        .unwrap();

    let control = platform::native();
    assert!(control.is_alive(grandchild));

    with_timeout(executor.stop()).await;

    assert!(
        eventually(Duration::from_secs(3), || !control.is_alive(grandchild)).await,
        "grandchild {grandchild} ignoring SIGTERM survived stop()"
    );
    assert!(executor.get_tracked_processes().is_empty());
    assert!(!executor.has_active_keep_alive_processes());
}

#[tokio::test]
async fn stopping_several_processes_runs_concurrently() {
    init_tracing();
    let dir = tempdir().unwrap();
    let executor = real_executor(dir.path(), ExecContext::default());

    // Both ignore SIGTERM, so each one costs the full 2s grace period.
    let commands = vec![
        keep_alive("stubborn-a", "trap '' TERM; sleep 30"),
        keep_alive("stubborn-b", "trap '' TERM; sleep 30"),
    ];
    with_timeout(executor.execute(&commands, &CancellationToken::new()))
        .await
        .unwrap();
    assert_eq!(executor.get_tracked_processes().len(), 2);

    let started = Instant::now();
    with_timeout(executor.stop()).await;
    let elapsed = started.elapsed();

    assert!(elapsed < Duration::from_secs(4), "took {elapsed:?}");
    assert!(executor.get_tracked_processes().is_empty());
}

#[tokio::test]
async fn duplicate_name_is_a_startup_failure() {
    init_tracing();
    let dir = tempdir().unwrap();
    let executor = real_executor(dir.path(), ExecContext::default());

    let commands = vec![keep_alive("dup", "sleep 5"), keep_alive("dup", "sleep 5")];
    let err = with_timeout(executor.execute(&commands, &CancellationToken::new()))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), Some(ErrorKind::StartupFailure));
    assert!(err.to_string().contains("2/2"));
    // The first one is not rolled back.
    assert_eq!(executor.get_tracked_processes().len(), 1);

    with_timeout(executor.stop()).await;
    assert!(executor.get_tracked_processes().is_empty());
}

#[tokio::test]
async fn spawn_error_is_a_startup_failure() {
    init_tracing();
    let dir = tempdir().unwrap();
    let executor = real_executor(dir.path(), ExecContext::default());
    let spec = CommandSpecBuilder::new("ghost", "runq-definitely-not-installed")
        .keep_alive()
        .build();

    let err = with_timeout(executor.execute(&[spec], &CancellationToken::new()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::StartupFailure));
    assert!(executor.get_tracked_processes().is_empty());
}

#[tokio::test]
async fn process_that_exits_on_its_own_is_untracked() {
    init_tracing();
    let dir = tempdir().unwrap();
    let executor = real_executor(dir.path(), ExecContext::default());

    with_timeout(executor.execute(
        &[keep_alive("brief", "sleep 0.2"), once("after", "true")],
        &CancellationToken::new(),
    ))
    .await
    .unwrap();

    assert!(
        eventually(Duration::from_secs(3), || !executor.has_active_keep_alive_processes()).await
    );
    assert!(
        eventually(Duration::from_secs(1), || executor.get_tracked_processes().is_empty()).await
    );

    let health = executor.get_process_health();
    assert_eq!(health["brief"].status, HealthStatus::Exited);
    assert_eq!(health["brief"].exit_code, Some(0));
}

#[tokio::test]
async fn health_monitoring_reports_lifecycle_events() {
    init_tracing();
    let dir = tempdir().unwrap();
    let reporter = Arc::new(RecordingReporter::new());
    let executor = real_executor(dir.path(), ExecContext::new(reporter.clone()));

    with_timeout(executor.execute(&[keep_alive("worker", "sleep 0.5; exit 4")], &CancellationToken::new()))
        .await
        .unwrap();

    assert!(executor.start_health_monitoring());
    assert!(!executor.start_health_monitoring(), "start is idempotent");
    let mut events = executor.health_events().expect("event receiver");
    assert!(executor.health_events().is_none());

    assert_eq!(executor.get_process_health()["worker"].status, HealthStatus::Running);

    let mut kinds = Vec::new();
    while kinds.len() < 2 {
        let event = with_timeout(events.recv()).await.expect("event channel open");
        kinds.push(event.kind);
    }
    assert_eq!(kinds, vec![HealthEventKind::Started, HealthEventKind::Failed]);

    let health = executor.get_process_health();
    assert_eq!(health["worker"].status, HealthStatus::Failed);
    assert_eq!(health["worker"].exit_code, Some(4));
    assert_eq!(executor.get_health_summary().failed, 1);

    executor.stop_health_monitoring().await;

    assert!(reporter.calls().iter().any(|c| matches!(
        c,
        Recorded::Lifecycle { name, kind: HealthEventKind::Failed } if name == "worker"
    )));
}

#[tokio::test]
async fn verbose_keep_alive_streams_output() {
    init_tracing();
    let dir = tempdir().unwrap();
    let reporter = Arc::new(RecordingReporter::new());
    let ctx = ExecContext::new(reporter.clone()).verbose(true);
    let executor = real_executor(dir.path(), ctx);

    with_timeout(executor.execute(
        &[keep_alive("talker", "echo ready; sleep 5")],
        &CancellationToken::new(),
    ))
    .await
    .unwrap();

    assert!(
        eventually(Duration::from_secs(3), || {
            reporter.output_lines().iter().any(|l| l == "ready")
        })
        .await
    );

    with_timeout(executor.stop()).await;
}
