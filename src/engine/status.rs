// src/engine/status.rs

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::errors::ExecError;

use super::{ExecutionResult, ExecutionState, ExecutionStatus};

/// Lock-guarded [`ExecutionStatus`].
///
/// All mutation goes through the methods below, which keep
/// `completed <= total` and only move the state forward.
#[derive(Debug, Default)]
pub struct StatusCell {
    inner: Mutex<ExecutionStatus>,
}

impl StatusCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ExecutionStatus {
        self.lock().clone()
    }

    pub fn state(&self) -> ExecutionState {
        self.lock().state
    }

    /// Ready → Running. Returns `false` (and changes nothing) if this cell was
    /// already used for a run.
    pub fn begin(&self, total: usize) -> bool {
        let mut status = self.lock();
        if status.state != ExecutionState::Ready {
            return false;
        }
        status.state = ExecutionState::Running;
        status.total = total;
        true
    }

    pub fn set_current(&self, index: usize, name: &str) {
        let mut status = self.lock();
        status.current_index = Some(index);
        status.current_command = Some(name.to_string());
    }

    pub fn push_result(&self, result: ExecutionResult) {
        let mut status = self.lock();
        status.results.push(result);
        status.completed = status.results.len().min(status.total);
    }

    pub fn finish_success(&self) -> ExecutionStatus {
        let mut status = self.lock();
        if status.state == ExecutionState::Running {
            status.state = ExecutionState::Success;
        }
        status.current_index = None;
        status.current_command = None;
        status.clone()
    }

    pub fn finish_failed(&self, error: ExecError) -> ExecutionStatus {
        let mut status = self.lock();
        if status.state == ExecutionState::Running {
            status.state = ExecutionState::Failed;
        }
        status.last_error = Some(error);
        status.clone()
    }

    fn lock(&self) -> MutexGuard<'_, ExecutionStatus> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
