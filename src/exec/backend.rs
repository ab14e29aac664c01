// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The sequential executor talks to an `ExecutorBackend` instead of spawning
//! processes itself. This makes it easy to swap in a fake backend in tests
//! while keeping the production implementation here.
//!
//! - `RealExecutorBackend` is the default implementation used by `runq`. It
//!   runs Once commands via [`run_once`], starts keepAlive commands via
//!   [`start_keep_alive`] and owns the registry, tracker and health monitor
//!   they are supervised by.
//! - Tests can provide their own `ExecutorBackend` that, for example, records
//!   which commands were dispatched and returns scripted results.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::CommandSpec;
use crate::engine::ExecutionResult;
use crate::monitor::{HealthMonitor, HealthMonitorConfig};
use crate::report::ProcessStatusUpdate;
use crate::tracker::{ProcessInfo, ProcessTracker};

use super::keep_alive::start_keep_alive;
use super::once::run_once;
use super::process::ProcessRegistry;
use super::terminate::{ExitWatch, Terminator};
use super::{ExecContext, Supervision};

pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait abstracting how commands are executed.
///
/// Production code uses [`RealExecutorBackend`]; tests can provide their own
/// implementation that doesn't spawn real processes.
pub trait ExecutorBackend: Send + Sync {
    /// Run a command to completion. Cancelling `cancel` must end the command
    /// and yield a `ContextCancelled` failure.
    fn run_once<'a>(
        &'a self,
        spec: &'a CommandSpec,
        cancel: &'a CancellationToken,
    ) -> BackendFuture<'a, ExecutionResult>;

    /// Start a command in the background and return once it is running.
    fn start_keep_alive<'a>(&'a self, spec: &'a CommandSpec) -> BackendFuture<'a, ExecutionResult>;

    /// Gracefully terminate every running keepAlive process. Resolves to the
    /// number of processes that are confirmed gone.
    fn terminate_all(&self) -> BackendFuture<'_, usize>;

    fn has_active_processes(&self) -> bool;
}

/// Real executor backend used in production.
pub struct RealExecutorBackend {
    ctx: ExecContext,
    sup: Supervision,
    terminator: Terminator,
}

impl RealExecutorBackend {
    /// Create a backend with the default health monitor settings.
    ///
    /// Processes are tracked in `tracker`, which callers usually open at the
    /// default path so later invocations can find them.
    pub fn new(ctx: ExecContext, tracker: Arc<ProcessTracker>) -> Self {
        Self::with_health_config(ctx, tracker, HealthMonitorConfig::default())
    }

    pub fn with_health_config(
        ctx: ExecContext,
        tracker: Arc<ProcessTracker>,
        config: HealthMonitorConfig,
    ) -> Self {
        let registry = Arc::new(ProcessRegistry::new());
        let monitor = Arc::new(HealthMonitor::new(
            config,
            registry.clone(),
            ctx.control.clone(),
            ctx.reporter.clone(),
        ));
        let terminator = Terminator::new(ctx.control.clone());
        Self {
            ctx,
            sup: Supervision {
                registry,
                tracker,
                monitor,
            },
            terminator,
        }
    }

    /// Override the termination grace period and fallback timeout.
    pub fn with_termination_timeouts(mut self, grace: Duration, fallback: Duration) -> Self {
        self.terminator = self.terminator.with_timeouts(grace, fallback);
        self
    }

    pub fn context(&self) -> &ExecContext {
        &self.ctx
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.sup.registry
    }

    pub fn tracker(&self) -> &Arc<ProcessTracker> {
        &self.sup.tracker
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.sup.monitor
    }

    pub fn tracked_processes(&self) -> BTreeMap<u32, ProcessInfo> {
        self.sup.tracker.get_all_processes()
    }
}

impl ExecutorBackend for RealExecutorBackend {
    fn run_once<'a>(
        &'a self,
        spec: &'a CommandSpec,
        cancel: &'a CancellationToken,
    ) -> BackendFuture<'a, ExecutionResult> {
        Box::pin(run_once(spec, &self.ctx, cancel))
    }

    fn start_keep_alive<'a>(&'a self, spec: &'a CommandSpec) -> BackendFuture<'a, ExecutionResult> {
        Box::pin(start_keep_alive(spec, &self.ctx, &self.sup))
    }

    fn terminate_all(&self) -> BackendFuture<'_, usize> {
        // Clone what the tasks need so they don't borrow `self`.
        let processes = self.sup.registry.snapshot();
        let terminator = self.terminator.clone();
        let reporter = self.ctx.reporter.clone();

        Box::pin(async move {
            if processes.is_empty() {
                return 0;
            }
            info!(count = processes.len(), "stopping keepAlive processes");

            let mut set = JoinSet::new();
            for process in processes {
                let terminator = terminator.clone();
                let reporter = reporter.clone();
                set.spawn(async move {
                    let mut probe = ExitWatch::new(process.exit_receiver());
                    let outcome = terminator
                        .terminate(process.pid, &process.name, &mut probe)
                        .await;
                    process.stop_streams();
                    reporter.on_process_status(
                        &process.name,
                        process.pid,
                        &ProcessStatusUpdate::Terminated(outcome),
                    );
                    outcome
                });
            }

            let mut stopped = 0;
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok(outcome) if outcome.terminated() => stopped += 1,
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "termination task failed"),
                }
            }
            stopped
        })
    }

    fn has_active_processes(&self) -> bool {
        self.sup
            .registry
            .snapshot()
            .iter()
            .any(|p| !p.has_exited())
    }
}
