// src/exec/process.rs

//! In-memory map of live keepAlive processes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::CommandSpec;
use crate::exec::stream::OutputBuffer;

/// How a supervised process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A running keepAlive process.
///
/// The OS `Child` handle itself is owned by the watcher task spawned in
/// [`crate::exec::keep_alive`]; this struct is the supervisor's view of it.
/// Clones share the exit channel, output buffer and stop token.
#[derive(Debug, Clone)]
pub struct ManagedProcess {
    pub name: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub spec: CommandSpec,
    pub work_dir: Option<PathBuf>,
    exit_rx: watch::Receiver<Option<ProcessExit>>,
    output: OutputBuffer,
    stop_streams: CancellationToken,
}

impl ManagedProcess {
    pub fn new(
        spec: CommandSpec,
        pid: u32,
        work_dir: Option<PathBuf>,
        exit_rx: watch::Receiver<Option<ProcessExit>>,
        output: OutputBuffer,
        stop_streams: CancellationToken,
    ) -> Self {
        Self {
            name: spec.name.clone(),
            pid,
            started_at: Utc::now(),
            spec,
            work_dir,
            exit_rx,
            output,
            stop_streams,
        }
    }

    /// `Some` once the watcher has reaped the process.
    pub fn exit(&self) -> Option<ProcessExit> {
        *self.exit_rx.borrow()
    }

    pub fn has_exited(&self) -> bool {
        self.exit().is_some()
    }

    /// A fresh receiver for waiting on exit.
    pub fn exit_receiver(&self) -> watch::Receiver<Option<ProcessExit>> {
        self.exit_rx.clone()
    }

    /// Most recent output lines (empty unless output is streamed).
    pub fn recent_output(&self) -> OutputBuffer {
        self.output.clone()
    }

    pub fn stop_streams(&self) {
        self.stop_streams.cancel();
    }
}

/// Name-keyed registry of [`ManagedProcess`]es, at most one per name.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    inner: Mutex<HashMap<String, ManagedProcess>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless the name is already taken. On conflict the rejected
    /// process is handed back.
    pub fn insert(&self, process: ManagedProcess) -> Result<(), ManagedProcess> {
        let mut map = self.lock();
        if map.contains_key(&process.name) {
            return Err(process);
        }
        map.insert(process.name.clone(), process);
        Ok(())
    }

    /// Remove `name` only if it still refers to `pid`; a newer process under
    /// the same name is left alone.
    pub fn remove_if_pid(&self, name: &str, pid: u32) -> Option<ManagedProcess> {
        let mut map = self.lock();
        match map.get(name) {
            Some(p) if p.pid == pid => map.remove(name),
            _ => None,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<ManagedProcess> {
        self.lock().get(name).cloned()
    }

    pub fn snapshot(&self) -> Vec<ManagedProcess> {
        self.lock().values().cloned().collect()
    }

    /// Name → PID for every registered process.
    pub fn pids(&self) -> HashMap<String, u32> {
        self.lock()
            .iter()
            .map(|(name, p)| (name.clone(), p.pid))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ManagedProcess>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
