use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use runq::config::CommandSpec;
use runq::engine::ExecutionResult;
use runq::errors::{ErrorKind, ExecError};
use runq::exec::{BackendFuture, ExecutorBackend};

/// A fake backend that:
/// - records which commands were dispatched, in dispatch order
/// - succeeds unless a failure was scripted for the command name
/// - optionally sleeps per command (cancellable) to exercise concurrency
/// - keeps a set of "running" keepAlive names for `terminate_all`
#[derive(Default)]
pub struct FakeBackend {
    failures: HashMap<String, ErrorKind>,
    delays: HashMap<String, Duration>,
    dispatched: Mutex<Vec<String>>,
    finished: Mutex<Vec<String>>,
    running: Mutex<HashSet<String>>,
    next_pid: AtomicU32,
    terminate_calls: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            next_pid: AtomicU32::new(1000),
            ..Self::default()
        }
    }

    /// Make the command named `name` fail with `kind`.
    pub fn fail(mut self, name: &str, kind: ErrorKind) -> Self {
        self.failures.insert(name.to_string(), kind);
        self
    }

    /// Make the Once command named `name` take `delay` to finish.
    pub fn delay(mut self, name: &str, delay: Duration) -> Self {
        self.delays.insert(name.to_string(), delay);
        self
    }

    /// Names in the order they were dispatched.
    pub fn dispatched(&self) -> Vec<String> {
        self.dispatched.lock().unwrap().clone()
    }

    /// Names in the order they finished.
    pub fn finished(&self) -> Vec<String> {
        self.finished.lock().unwrap().clone()
    }

    pub fn running(&self) -> Vec<String> {
        let mut names: Vec<String> = self.running.lock().unwrap().iter().cloned().collect();
        names.sort();
        names
    }

    pub fn terminate_calls(&self) -> usize {
        self.terminate_calls.load(Ordering::SeqCst)
    }

    fn failure(&self, spec: &CommandSpec, kind: ErrorKind) -> ExecutionResult {
        let mut err = ExecError::new(kind, spec.command_line(), format!("scripted {kind}"));
        if kind == ErrorKind::NonZeroExit {
            err = err.with_exit_code(1).with_stderr("scripted failure\n");
        }
        ExecutionResult::failed(&spec.name, Utc::now(), "", err)
    }
}

impl ExecutorBackend for FakeBackend {
    fn run_once<'a>(
        &'a self,
        spec: &'a CommandSpec,
        cancel: &'a CancellationToken,
    ) -> BackendFuture<'a, ExecutionResult> {
        Box::pin(async move {
            self.dispatched.lock().unwrap().push(spec.name.clone());

            if let Some(delay) = self.delays.get(&spec.name) {
                tokio::select! {
                    _ = tokio::time::sleep(*delay) => {}
                    _ = cancel.cancelled() => {
                        self.finished.lock().unwrap().push(spec.name.clone());
                        return self.failure(spec, ErrorKind::ContextCancelled);
                    }
                }
            }

            self.finished.lock().unwrap().push(spec.name.clone());
            match self.failures.get(&spec.name) {
                Some(kind) => self.failure(spec, *kind),
                None => ExecutionResult::succeeded(&spec.name, Utc::now(), 0, format!("{}\n", spec.name)),
            }
        })
    }

    fn start_keep_alive<'a>(&'a self, spec: &'a CommandSpec) -> BackendFuture<'a, ExecutionResult> {
        Box::pin(async move {
            self.dispatched.lock().unwrap().push(spec.name.clone());
            self.finished.lock().unwrap().push(spec.name.clone());

            if let Some(kind) = self.failures.get(&spec.name) {
                return self.failure(spec, *kind);
            }

            let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
            self.running.lock().unwrap().insert(spec.name.clone());
            ExecutionResult::succeeded(
                &spec.name,
                Utc::now(),
                0,
                format!("started '{}' (PID {pid})", spec.name),
            )
            .with_pid(pid)
        })
    }

    fn terminate_all(&self) -> BackendFuture<'_, usize> {
        Box::pin(async move {
            self.terminate_calls.fetch_add(1, Ordering::SeqCst);
            let mut running = self.running.lock().unwrap();
            let count = running.len();
            running.clear();
            count
        })
    }

    fn has_active_processes(&self) -> bool {
        !self.running.lock().unwrap().is_empty()
    }
}
