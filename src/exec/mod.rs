// src/exec/mod.rs

//! Process execution layer.
//!
//! This module is responsible for actually running commands, using
//! `tokio::process::Command`, and supervising the ones that stay alive.
//!
//! - [`invocation`] builds the `Command` for a [`CommandSpec`]: working dir,
//!   environment layering, process group.
//! - [`once`] runs a command to completion.
//! - [`keep_alive`] starts a command in the background and hands it to a
//!   watcher task.
//! - [`process`] holds the in-memory registry of running keepAlive processes.
//! - [`stream`] reads child stdout/stderr line by line.
//! - [`terminate`] implements graceful group termination.
//! - [`backend`] provides the `ExecutorBackend` trait and a concrete
//!   `RealExecutorBackend` that the engine uses in production, and which
//!   tests can replace with a fake implementation.
//!
//! [`CommandSpec`]: crate::config::CommandSpec

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::monitor::HealthMonitor;
use crate::platform::{self, ProcessControl};
use crate::report::{NoopReporter, Reporter};
use crate::tracker::ProcessTracker;

pub mod backend;
pub mod invocation;
pub mod keep_alive;
pub mod once;
pub mod process;
pub mod stream;
pub mod terminate;

pub use backend::{BackendFuture, ExecutorBackend, RealExecutorBackend};
pub use process::{ManagedProcess, ProcessRegistry};
pub use terminate::{TerminationOutcome, Terminator};

/// Settings shared by every command an executor dispatches.
#[derive(Clone)]
pub struct ExecContext {
    /// Used when a command has no `workDir` of its own.
    pub default_work_dir: Option<PathBuf>,
    /// Echo command output to the reporter as it arrives.
    pub verbose: bool,
    pub reporter: Arc<dyn Reporter>,
    pub control: Arc<dyn ProcessControl>,
}

impl ExecContext {
    pub fn new(reporter: Arc<dyn Reporter>) -> Self {
        Self {
            default_work_dir: None,
            verbose: false,
            reporter,
            control: platform::native(),
        }
    }

    pub fn with_work_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.default_work_dir = dir;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_control(mut self, control: Arc<dyn ProcessControl>) -> Self {
        self.control = control;
        self
    }
}

impl Default for ExecContext {
    fn default() -> Self {
        Self::new(Arc::new(NoopReporter))
    }
}

impl fmt::Debug for ExecContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecContext")
            .field("default_work_dir", &self.default_work_dir)
            .field("verbose", &self.verbose)
            .finish_non_exhaustive()
    }
}

/// Everything a running keepAlive process is registered with.
#[derive(Clone)]
pub struct Supervision {
    pub registry: Arc<ProcessRegistry>,
    pub tracker: Arc<ProcessTracker>,
    pub monitor: Arc<HealthMonitor>,
}
