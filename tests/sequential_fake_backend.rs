// tests/sequential_fake_backend.rs

mod common;
use crate::common::builders::CommandSpecBuilder;
use crate::common::{init_tracing, with_timeout};

use std::sync::Arc;
use std::time::{Duration, Instant};

use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

use runq::config::CommandSpec;
use runq::engine::{ExecutionState, SequentialExecutor};
use runq::errors::{ErrorKind, RunqError};
use runq::types::ExecutionMode;
use runq_test_utils::{FakeBackend, Recorded, RecordingReporter};

fn cmd(name: &str) -> CommandSpec {
    CommandSpecBuilder::new(name, "echo").arg(name).build()
}

fn concurrent(name: &str) -> CommandSpec {
    CommandSpecBuilder::new(name, "echo")
        .arg(name)
        .concurrent(true)
        .build()
}

fn executor(backend: FakeBackend) -> (SequentialExecutor<FakeBackend>, Arc<RecordingReporter>) {
    let reporter = Arc::new(RecordingReporter::new());
    (SequentialExecutor::new(backend, reporter.clone()), reporter)
}

#[tokio::test]
async fn all_commands_succeed_in_order() {
    init_tracing();
    let (executor, reporter) = executor(FakeBackend::new());
    let commands = vec![cmd("a"), cmd("b"), cmd("c")];

    with_timeout(executor.execute(&commands, &CancellationToken::new()))
        .await
        .unwrap();

    let status = executor.get_status();
    assert_eq!(status.state, ExecutionState::Success);
    assert_eq!((status.completed, status.total), (3, 3));
    let names: Vec<_> = status.results.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, ["a", "b", "c"]);
    assert_eq!(executor.backend().dispatched(), ["a", "b", "c"]);

    let calls = reporter.calls();
    assert_eq!(calls.first(), Some(&Recorded::Start { total: 3 }));
    assert_eq!(
        calls.last(),
        Some(&Recorded::Complete {
            completed: 3,
            total: 3
        })
    );
    assert_eq!(
        calls
            .iter()
            .filter(|c| matches!(c, Recorded::Success { .. }))
            .count(),
        3
    );
}

#[tokio::test]
async fn failure_halts_the_list() {
    init_tracing();
    let backend = FakeBackend::new().fail("b", ErrorKind::NonZeroExit);
    let (executor, reporter) = executor(backend);
    let commands = vec![cmd("a"), cmd("b"), cmd("c")];

    let err = with_timeout(executor.execute(&commands, &CancellationToken::new()))
        .await
        .unwrap_err();

    match &err {
        RunqError::CommandFailed { index, total, name, source } => {
            assert_eq!((*index, *total), (2, 3));
            assert_eq!(name, "b");
            assert_eq!(source.kind, ErrorKind::NonZeroExit);
        }
        other => panic!("expected CommandFailed, got {other:?}"),
    }

    let status = executor.get_status();
    assert_eq!(status.state, ExecutionState::Failed);
    assert_eq!(status.results.len(), 2);
    assert_eq!(status.last_error.unwrap().kind, ErrorKind::NonZeroExit);
    assert_eq!(executor.backend().dispatched(), ["a", "b"]);
    assert!(reporter.calls().contains(&Recorded::Failure {
        index: 1,
        name: "b".into()
    }));
}

#[tokio::test]
async fn unsupported_mode_fails_without_dispatching() {
    init_tracing();
    let (executor, _) = executor(FakeBackend::new());
    let odd = CommandSpecBuilder::new("odd", "true")
        .mode(ExecutionMode::from("cron"))
        .build();

    let err = with_timeout(executor.execute(&[cmd("a"), odd, cmd("c")], &CancellationToken::new()))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), Some(ErrorKind::UnsupportedMode));
    assert!(err.to_string().contains("cron"));
    assert_eq!(executor.backend().dispatched(), ["a"]);
    assert_eq!(executor.get_status().results.len(), 2);
}

#[tokio::test]
async fn empty_list_is_a_config_error_and_state_stays_ready() {
    let (executor, reporter) = executor(FakeBackend::new());

    let err = executor
        .execute(&[], &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, RunqError::ConfigError(_)));
    assert_eq!(executor.get_status().state, ExecutionState::Ready);
    assert!(reporter.calls().is_empty());
}

#[tokio::test]
async fn executor_runs_a_single_list() {
    let (executor, _) = executor(FakeBackend::new());
    executor
        .execute(&[cmd("a")], &CancellationToken::new())
        .await
        .unwrap();

    let err = executor
        .execute(&[cmd("b")], &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RunqError::ConfigError(_)));
    assert_eq!(executor.get_status().state, ExecutionState::Success);
}

#[tokio::test]
async fn keep_alive_results_carry_pids_and_stop_terminates_them() {
    init_tracing();
    let (executor, _) = executor(FakeBackend::new());
    let commands = vec![
        CommandSpecBuilder::new("api", "server").keep_alive().build(),
        cmd("migrate"),
    ];

    with_timeout(executor.execute(&commands, &CancellationToken::new()))
        .await
        .unwrap();

    let status = executor.get_status();
    assert!(status.results[0].pid.is_some());
    assert!(status.results[1].pid.is_none());
    assert!(executor.has_active_keep_alive_processes());

    executor.stop().await;
    executor.stop().await;
    assert!(executor.is_stop_requested());
    assert!(!executor.has_active_keep_alive_processes());
    assert_eq!(executor.backend().terminate_calls(), 2);
}

#[tokio::test]
async fn stop_before_execute_halts_immediately() {
    let (executor, _) = executor(FakeBackend::new());
    executor.stop().await;

    let err = executor
        .execute(&[cmd("a"), cmd("b")], &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), Some(ErrorKind::ContextCancelled));
    assert!(executor.backend().dispatched().is_empty());
    assert_eq!(executor.get_status().results.len(), 1);
}

#[tokio::test]
async fn cancelled_token_halts_before_the_next_command() {
    let (executor, _) = executor(FakeBackend::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = executor.execute(&[cmd("a")], &cancel).await.unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::ContextCancelled));
    assert!(executor.backend().dispatched().is_empty());
}

#[tokio::test]
async fn concurrent_commands_run_together() {
    init_tracing();
    let backend = FakeBackend::new()
        .delay("a", Duration::from_millis(400))
        .delay("b", Duration::from_millis(400));
    let (executor, _) = executor(backend);
    let commands = vec![cmd("a"), concurrent("b"), cmd("c")];

    let started = Instant::now();
    with_timeout(executor.execute(&commands, &CancellationToken::new()))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed < Duration::from_millis(750), "took {elapsed:?}");
    let names: Vec<_> = executor
        .get_status()
        .results
        .iter()
        .map(|r| r.name.clone())
        .collect();
    assert_eq!(names, ["a", "b", "c"], "results stay in list order");
    assert_eq!(executor.backend().dispatched().last().map(String::as_str), Some("c"));
}

#[tokio::test]
async fn failure_in_a_batch_cancels_its_siblings() {
    init_tracing();
    let backend = FakeBackend::new()
        .delay("slow", Duration::from_secs(5))
        .fail("broken", ErrorKind::NonZeroExit);
    let (executor, _) = executor(backend);
    let commands = vec![cmd("slow"), concurrent("broken"), cmd("after")];

    let started = Instant::now();
    let err = with_timeout(executor.execute(&commands, &CancellationToken::new()))
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(2));
    match &err {
        RunqError::CommandFailed { index, name, .. } => {
            assert_eq!(*index, 2);
            assert_eq!(name, "broken");
        }
        other => panic!("expected CommandFailed, got {other:?}"),
    }

    let status = executor.get_status();
    assert_eq!(status.results.len(), 2);
    let slow = status.results.iter().find(|r| r.name == "slow").unwrap();
    assert_eq!(
        slow.error.as_ref().map(|e| e.kind),
        Some(ErrorKind::ContextCancelled)
    );
    assert!(!executor.backend().dispatched().contains(&"after".to_string()));
}

#[tokio::test]
async fn batch_results_keep_list_order_when_the_middle_command_fails() {
    init_tracing();
    let backend = FakeBackend::new()
        .fail("b", ErrorKind::NonZeroExit)
        .delay("c", Duration::from_millis(300));
    let (executor, reporter) = executor(backend);
    let commands = vec![cmd("a"), concurrent("b"), concurrent("c")];

    let err = with_timeout(executor.execute(&commands, &CancellationToken::new()))
        .await
        .unwrap_err();
    match &err {
        RunqError::CommandFailed { index, name, .. } => {
            assert_eq!(*index, 2);
            assert_eq!(name, "b");
        }
        other => panic!("expected CommandFailed, got {other:?}"),
    }

    let status = executor.get_status();
    let names: Vec<&str> = status.results.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, ["a", "b", "c"]);
    assert_eq!(status.state, ExecutionState::Failed);
    assert_eq!(
        status.last_error.as_ref().map(|e| e.kind),
        Some(ErrorKind::NonZeroExit)
    );

    let failures: Vec<String> = reporter
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            Recorded::Failure { name, .. } => Some(name),
            _ => None,
        })
        .collect();
    assert_eq!(failures, ["b"]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// For any list and any failing position, exactly the prefix up to and
    /// including the failure is dispatched and recorded.
    #[test]
    fn results_cover_exactly_the_executed_prefix(
        len in 1usize..8,
        fail_at in proptest::option::of(0usize..8),
    ) {
        let names: Vec<String> = (0..len).map(|i| format!("cmd_{i}")).collect();
        let fail_at = fail_at.filter(|i| *i < len);

        let mut backend = FakeBackend::new();
        if let Some(i) = fail_at {
            backend = backend.fail(&names[i], ErrorKind::NonZeroExit);
        }
        let executor = SequentialExecutor::new(backend, Arc::new(RecordingReporter::new()));
        let commands: Vec<CommandSpec> = names.iter().map(|n| cmd(n)).collect();

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let outcome = rt.block_on(executor.execute(&commands, &CancellationToken::new()));

        let expected = fail_at.map_or(len, |i| i + 1);
        let status = executor.get_status();
        prop_assert_eq!(status.results.len(), expected);
        prop_assert_eq!(executor.backend().dispatched(), names[..expected].to_vec());
        prop_assert!(status.completed <= status.total);

        match fail_at {
            Some(i) => {
                prop_assert_eq!(status.state, ExecutionState::Failed);
                let is_expected = matches!(
                    outcome,
                    Err(RunqError::CommandFailed { index, .. }) if index == i + 1
                );
                prop_assert!(is_expected);
            }
            None => {
                prop_assert!(outcome.is_ok());
                prop_assert_eq!(status.state, ExecutionState::Success);
            }
        }
    }
}
