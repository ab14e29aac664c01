// src/engine/sequential.rs

//! The sequential executor.
//!
//! Commands run in list order. A command flagged `concurrent` is started
//! together with the one before it; such a group is a *batch* and the
//! executor waits for the whole batch before moving on. The first failure
//! ends the run.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CommandSpec;
use crate::errors::{ErrorKind, ExecError, Result, RunqError};
use crate::exec::{ExecutorBackend, RealExecutorBackend};
use crate::monitor::{HealthMonitorEvent, HealthSummary, ProcessHealth};
use crate::report::Reporter;
use crate::tracker::ProcessInfo;
use crate::types::ExecutionMode;

use super::{ExecutionResult, ExecutionStatus, StatusCell};

/// Drives a command list through Ready → Running → Success/Failed.
///
/// One executor runs one list; `execute` on an executor that already ran
/// is refused.
pub struct SequentialExecutor<B> {
    backend: Arc<B>,
    reporter: Arc<dyn Reporter>,
    status: StatusCell,
    stop_requested: AtomicBool,
}

impl<B> SequentialExecutor<B>
where
    B: ExecutorBackend + 'static,
{
    pub fn new(backend: B, reporter: Arc<dyn Reporter>) -> Self {
        Self::from_shared(Arc::new(backend), reporter)
    }

    /// Build around a backend the caller keeps a handle to.
    pub fn from_shared(backend: Arc<B>, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            backend,
            reporter,
            status: StatusCell::new(),
            stop_requested: AtomicBool::new(false),
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Run `commands` in order.
    ///
    /// Returns [`RunqError::ConfigError`] for an empty list (the state stays
    /// Ready) and [`RunqError::CommandFailed`] for the first command that
    /// fails. keepAlive processes started before a failure keep running.
    pub async fn execute(&self, commands: &[CommandSpec], cancel: &CancellationToken) -> Result<()> {
        if commands.is_empty() {
            return Err(RunqError::ConfigError("no commands to execute".to_string()));
        }

        let total = commands.len();
        if !self.status.begin(total) {
            return Err(RunqError::ConfigError(
                "this executor has already run a command list".to_string(),
            ));
        }

        info!(total, "executing command list");
        self.reporter.on_start(total);

        for batch in batches(commands) {
            self.ensure_not_stopped(batch.start, commands, cancel)?;

            if batch.len() == 1 {
                let index = batch.start;
                let spec = &commands[index];
                self.announce(index, spec);
                let result = dispatch(self.backend.as_ref(), spec, cancel).await;
                self.record(index, spec, result)?;
            } else {
                self.run_batch(batch, commands, cancel).await?;
            }
        }

        let status = self.status.finish_success();
        info!(completed = status.completed, total, "command list finished");
        self.reporter.on_complete(&status);
        Ok(())
    }

    /// Snapshot of the current status.
    pub fn get_status(&self) -> ExecutionStatus {
        self.status.snapshot()
    }

    /// Halt the run before its next batch and gracefully terminate every
    /// keepAlive process. Safe to call more than once and from another task
    /// while `execute` is running.
    pub async fn stop(&self) {
        if !self.stop_requested.swap(true, Ordering::SeqCst) {
            info!("stop requested");
        }
        let stopped = self.backend.terminate_all().await;
        if stopped > 0 {
            info!(stopped, "keepAlive processes stopped");
        }
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn has_active_keep_alive_processes(&self) -> bool {
        self.backend.has_active_processes()
    }

    fn announce(&self, index: usize, spec: &CommandSpec) {
        let total = self.status.snapshot().total;
        self.status.set_current(index, &spec.name);
        debug!(index = index + 1, total, command = %spec.name, mode = %spec.mode, "dispatching command");
        self.reporter.on_command_start(index, total, spec);
    }

    fn ensure_not_stopped(
        &self,
        index: usize,
        commands: &[CommandSpec],
        cancel: &CancellationToken,
    ) -> Result<()> {
        if !self.is_stop_requested() && !cancel.is_cancelled() {
            return Ok(());
        }

        let spec = &commands[index];
        info!(index = index + 1, command = %spec.name, "execution halted before command started");
        self.status.set_current(index, &spec.name);
        let err = ExecError::new(
            ErrorKind::ContextCancelled,
            spec.command_line(),
            "execution stopped before this command started",
        );
        let result = ExecutionResult::failed(&spec.name, Utc::now(), "", err);
        self.record(index, spec, result)
    }

    /// Start every command of the batch together and wait for all of them.
    /// The first failure to complete cancels the Once commands still running.
    async fn run_batch(
        &self,
        batch: Range<usize>,
        commands: &[CommandSpec],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let batch_cancel = cancel.child_token();
        let mut set = JoinSet::new();

        for index in batch.clone() {
            let spec = commands[index].clone();
            self.announce(index, &spec);
            let backend = Arc::clone(&self.backend);
            let token = batch_cancel.clone();
            set.spawn(async move {
                let result = dispatch(backend.as_ref(), &spec, &token).await;
                (index, result)
            });
        }

        let mut results: BTreeMap<usize, ExecutionResult> = BTreeMap::new();
        let mut first_failure: Option<usize> = None;

        while let Some(joined) = set.join_next().await {
            let (index, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "command task failed");
                    continue;
                }
            };
            if !result.success && first_failure.is_none() {
                first_failure = Some(index);
                batch_cancel.cancel();
            }
            results.insert(index, result);
        }

        // A task that panicked still gets a result slot.
        for index in batch.clone() {
            if !results.contains_key(&index) {
                let spec = &commands[index];
                let err = ExecError::new(
                    ErrorKind::SystemError,
                    spec.command_line(),
                    "command task panicked",
                );
                results.insert(index, ExecutionResult::failed(&spec.name, Utc::now(), "", err));
                first_failure.get_or_insert(index);
            }
        }

        // Strict list order; only the first failure decides the error.
        let total = commands.len();
        let mut outcome = Ok(());
        for (index, result) in results {
            if Some(index) == first_failure {
                outcome = self.record(index, &commands[index], result);
                continue;
            }
            self.status.push_result(result.clone());
            if result.success {
                self.reporter.on_command_success(index, total, &result);
            }
        }
        outcome
    }

    /// Append a result; on failure move to Failed and build the error.
    fn record(&self, index: usize, spec: &CommandSpec, result: ExecutionResult) -> Result<()> {
        let total = self.status.snapshot().total;
        self.status.push_result(result.clone());

        if result.success {
            self.reporter.on_command_success(index, total, &result);
            return Ok(());
        }

        let source = result.error.clone().unwrap_or_else(|| {
            ExecError::new(ErrorKind::SystemError, spec.command_line(), "command failed")
        });
        self.status.finish_failed(source.clone());
        warn!(
            index = index + 1,
            total,
            command = %spec.name,
            kind = %source.kind,
            "command failed; stopping"
        );
        self.reporter.on_command_failure(index, total, &result);

        Err(RunqError::CommandFailed {
            index: index + 1,
            total,
            name: spec.name.clone(),
            source,
        })
    }
}

/// Accessors only the production backend can answer.
impl SequentialExecutor<RealExecutorBackend> {
    /// Tracker records, including processes from earlier invocations.
    pub fn get_tracked_processes(&self) -> BTreeMap<u32, ProcessInfo> {
        self.backend.tracked_processes()
    }

    /// Start the periodic health check. Returns `false` if it was running.
    pub fn start_health_monitoring(&self) -> bool {
        self.backend.monitor().start()
    }

    pub async fn stop_health_monitoring(&self) {
        self.backend.monitor().stop().await;
    }

    pub fn get_process_health(&self) -> HashMap<String, ProcessHealth> {
        self.backend.monitor().get_process_health()
    }

    pub fn get_health_summary(&self) -> HealthSummary {
        self.backend.monitor().get_health_summary()
    }

    /// The health event stream. Only the first caller gets it.
    pub fn health_events(&self) -> Option<mpsc::Receiver<HealthMonitorEvent>> {
        self.backend.monitor().take_events()
    }
}

async fn dispatch<B>(backend: &B, spec: &CommandSpec, cancel: &CancellationToken) -> ExecutionResult
where
    B: ExecutorBackend + ?Sized,
{
    match &spec.mode {
        ExecutionMode::Once => backend.run_once(spec, cancel).await,
        ExecutionMode::KeepAlive => backend.start_keep_alive(spec).await,
        ExecutionMode::Unsupported(raw) => {
            warn!(command = %spec.name, mode = %raw, "unsupported execution mode");
            let err = ExecError::new(
                ErrorKind::UnsupportedMode,
                spec.command_line(),
                format!("unsupported execution mode '{raw}' (expected \"once\" or \"keepAlive\")"),
            );
            ExecutionResult::failed(&spec.name, Utc::now(), "", err)
        }
    }
}

/// Split the list into batches: each batch starts at a non-concurrent
/// command and extends over the concurrent commands that follow it. The
/// first command always starts a batch.
fn batches(commands: &[CommandSpec]) -> Vec<Range<usize>> {
    let mut out = Vec::new();
    let mut start = 0;
    for i in 1..=commands.len() {
        if i == commands.len() || !commands[i].concurrent {
            out.push(start..i);
            start = i;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, concurrent: bool) -> CommandSpec {
        CommandSpec {
            name: name.to_string(),
            command: "true".to_string(),
            args: Vec::new(),
            mode: ExecutionMode::Once,
            work_dir: None,
            env: Default::default(),
            concurrent,
            timeout_secs: None,
        }
    }

    #[test]
    fn sequential_list_is_one_batch_per_command() {
        let list = vec![spec("a", false), spec("b", false), spec("c", false)];
        assert_eq!(batches(&list), vec![0..1, 1..2, 2..3]);
    }

    #[test]
    fn concurrent_commands_join_their_predecessor() {
        let list = vec![
            spec("a", false),
            spec("b", true),
            spec("c", true),
            spec("d", false),
            spec("e", true),
        ];
        assert_eq!(batches(&list), vec![0..3, 3..5]);
    }

    #[test]
    fn concurrent_flag_on_first_command_is_ignored() {
        let list = vec![spec("a", true), spec("b", false)];
        assert_eq!(batches(&list), vec![0..1, 1..2]);
    }

    #[test]
    fn empty_list_has_no_batches() {
        assert!(batches(&[]).is_empty());
    }
}
