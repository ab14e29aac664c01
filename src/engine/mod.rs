// src/engine/mod.rs

//! Orchestration engine for runq.
//!
//! - [`sequential`] holds the [`SequentialExecutor`], which drives the command
//!   list through the Ready → Running → Success/Failed state machine.
//! - [`status`] holds the lock-guarded status cell the executor mutates and
//!   callers read through clones.
//!
//! The result and status types below are what the CLI and reporters see.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::ExecError;

pub mod sequential;
pub mod status;

pub use sequential::SequentialExecutor;
pub use status::StatusCell;

/// Lifecycle of one `execute` call. Each state is entered at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExecutionState {
    Ready,
    Running,
    Success,
    Failed,
}

impl Default for ExecutionState {
    fn default() -> Self {
        ExecutionState::Ready
    }
}

/// Outcome of one dispatched command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub name: String,
    pub success: bool,
    pub exit_code: i32,
    pub output: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration: Duration,
    /// Set for keepAlive commands that started.
    pub pid: Option<u32>,
    pub error: Option<ExecError>,
}

impl ExecutionResult {
    /// A successful result finishing now.
    pub fn succeeded(
        name: impl Into<String>,
        started_at: DateTime<Utc>,
        exit_code: i32,
        output: impl Into<String>,
    ) -> Self {
        let finished_at = Utc::now();
        Self {
            name: name.into(),
            success: true,
            exit_code,
            output: output.into(),
            started_at,
            finished_at,
            duration: elapsed(started_at, finished_at),
            pid: None,
            error: None,
        }
    }

    /// A failed result finishing now. The exit code is taken from the error
    /// when it has one, `-1` otherwise.
    pub fn failed(
        name: impl Into<String>,
        started_at: DateTime<Utc>,
        output: impl Into<String>,
        error: ExecError,
    ) -> Self {
        let finished_at = Utc::now();
        Self {
            name: name.into(),
            success: false,
            exit_code: error.exit_code.unwrap_or(-1),
            output: output.into(),
            started_at,
            finished_at,
            duration: elapsed(started_at, finished_at),
            pid: None,
            error: Some(error),
        }
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }
}

fn elapsed(start: DateTime<Utc>, end: DateTime<Utc>) -> Duration {
    (end - start).to_std().unwrap_or_default()
}

/// Aggregate state of the executor. Callers only ever see clones.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionStatus {
    pub state: ExecutionState,
    /// 0-based index of the command being dispatched.
    pub current_index: Option<usize>,
    pub current_command: Option<String>,
    pub completed: usize,
    pub total: usize,
    pub results: Vec<ExecutionResult>,
    pub last_error: Option<ExecError>,
}
