// src/report/mod.rs

//! Side-effecting notification hooks.
//!
//! The engine, the keepAlive watcher and the health monitor call into a
//! [`Reporter`]; none of them print anything themselves. Every hook has a
//! no-op default so implementations only override what they care about.

use tracing::{debug, error, info, trace, warn};

use crate::config::CommandSpec;
use crate::engine::{ExecutionResult, ExecutionStatus};
use crate::exec::stream::OutputLine;
use crate::exec::terminate::TerminationOutcome;
use crate::monitor::{HealthEventKind, HealthMonitorEvent, HealthSummary, ProcessHealth};

/// Change in the lifecycle of a keepAlive process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatusUpdate {
    Started,
    Exited { exit_code: Option<i32> },
    Terminated(TerminationOutcome),
}

/// Hooks invoked during a run. `index` is the 0-based position in the
/// command list.
pub trait Reporter: Send + Sync {
    fn on_start(&self, _total: usize) {}

    fn on_command_start(&self, _index: usize, _total: usize, _spec: &CommandSpec) {}

    fn on_command_success(&self, _index: usize, _total: usize, _result: &ExecutionResult) {}

    fn on_command_failure(&self, _index: usize, _total: usize, _result: &ExecutionResult) {}

    fn on_complete(&self, _status: &ExecutionStatus) {}

    fn on_output_line(&self, _line: &OutputLine) {}

    fn on_process_status(&self, _name: &str, _pid: u32, _update: &ProcessStatusUpdate) {}

    fn on_health(&self, _health: &ProcessHealth) {}

    fn on_lifecycle_event(&self, _event: &HealthMonitorEvent) {}

    fn on_health_summary(&self, _summary: &HealthSummary) {}
}

/// Reporter that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl Reporter for NoopReporter {}

/// Reporter used by the CLI.
///
/// Lifecycle hooks become `tracing` events (stderr); streamed output lines
/// are printed to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn on_start(&self, total: usize) {
        info!(total, "starting command queue");
    }

    fn on_command_start(&self, index: usize, total: usize, spec: &CommandSpec) {
        info!(
            index = index + 1,
            total,
            command = %spec.name,
            mode = %spec.mode,
            "[{}/{}] {}",
            index + 1,
            total,
            spec.command_line()
        );
    }

    fn on_command_success(&self, index: usize, total: usize, result: &ExecutionResult) {
        match result.pid {
            Some(pid) => info!(
                index = index + 1,
                total,
                command = %result.name,
                pid,
                "started in background"
            ),
            None => info!(
                index = index + 1,
                total,
                command = %result.name,
                exit_code = result.exit_code,
                duration_ms = result.duration.as_millis() as u64,
                "completed"
            ),
        }
    }

    fn on_command_failure(&self, index: usize, total: usize, result: &ExecutionResult) {
        let details = result
            .error
            .as_ref()
            .map(|e| e.details())
            .unwrap_or_else(|| "unknown error".to_string());
        error!(
            index = index + 1,
            total,
            command = %result.name,
            exit_code = result.exit_code,
            "command failed: {details}"
        );
    }

    fn on_complete(&self, status: &ExecutionStatus) {
        info!(
            completed = status.completed,
            total = status.total,
            "all commands completed"
        );
    }

    fn on_output_line(&self, line: &OutputLine) {
        println!("{line}");
    }

    fn on_process_status(&self, name: &str, pid: u32, update: &ProcessStatusUpdate) {
        match update {
            ProcessStatusUpdate::Started => debug!(command = %name, pid, "process started"),
            ProcessStatusUpdate::Exited { exit_code } => {
                debug!(command = %name, pid, ?exit_code, "process exited")
            }
            ProcessStatusUpdate::Terminated(outcome) if outcome.terminated() => {
                info!(command = %name, pid, %outcome, "process stopped")
            }
            ProcessStatusUpdate::Terminated(outcome) => {
                warn!(command = %name, pid, %outcome, "process could not be stopped")
            }
        }
    }

    fn on_health(&self, health: &ProcessHealth) {
        trace!(
            command = %health.name,
            pid = health.pid,
            status = %health.status,
            uptime_s = health.uptime.as_secs(),
            "health check"
        );
    }

    fn on_lifecycle_event(&self, event: &HealthMonitorEvent) {
        match event.kind {
            HealthEventKind::Started => {
                info!(command = %event.name, pid = event.health.pid, "{}", event.message)
            }
            HealthEventKind::Exited => {
                info!(command = %event.name, pid = event.health.pid, "{}", event.message)
            }
            HealthEventKind::Failed | HealthEventKind::ThresholdExceeded => {
                warn!(command = %event.name, pid = event.health.pid, kind = %event.kind, "{}", event.message)
            }
        }
    }

    fn on_health_summary(&self, summary: &HealthSummary) {
        debug!(%summary, "health summary");
    }
}
