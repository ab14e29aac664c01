// src/tracker/mod.rs

//! Durable registry of keepAlive processes.
//!
//! The registry is a single JSON document (PID → [`ProcessInfo`]) stored under
//! the OS temp directory, so a later `runq status` / `runq kill` invocation can
//! find processes started by an earlier `runq run`.
//!
//! The on-disk file is a weakly consistent store: every mutation rewrites the
//! whole document atomically, but two invocations writing at the same time can
//! lose one of the updates.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::CommandSpec;
use crate::fs::{FileSystem, RealFileSystem};
use crate::platform::{self, ProcessControl};
use crate::types::ExecutionMode;

/// File name of the registry inside the temp directory.
pub const TRACKER_FILE_NAME: &str = "runq-processes.json";

/// Persisted metadata for one supervised process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    pub start_time: DateTime<Utc>,
    pub mode: ExecutionMode,
}

impl ProcessInfo {
    pub fn from_spec(
        pid: u32,
        spec: &CommandSpec,
        work_dir: Option<PathBuf>,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            pid,
            name: spec.name.clone(),
            command: spec.command.clone(),
            args: spec.args.clone(),
            work_dir,
            start_time,
            mode: spec.mode.clone(),
        }
    }

    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.args.join(" "))
        }
    }
}

/// Default registry location: `<temp_dir>/runq-processes.json`.
pub fn default_tracker_path() -> PathBuf {
    std::env::temp_dir().join(TRACKER_FILE_NAME)
}

/// File-backed process registry.
///
/// One mutex guards both the in-memory map and the file I/O, so the two views
/// never diverge inside this process.
pub struct ProcessTracker {
    path: PathBuf,
    fs: Arc<dyn FileSystem>,
    control: Arc<dyn ProcessControl>,
    processes: Mutex<BTreeMap<u32, ProcessInfo>>,
}

impl std::fmt::Debug for ProcessTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessTracker")
            .field("path", &self.path)
            .field("processes", &self.lock().len())
            .finish_non_exhaustive()
    }
}

impl ProcessTracker {
    /// Open the registry at the default location with the real filesystem.
    pub fn open_default() -> Result<Self> {
        Self::open(default_tracker_path())
    }

    /// Open the registry at `path` with the real filesystem.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::with_parts(path, Arc::new(RealFileSystem), platform::native())
    }

    /// Open the registry with explicit collaborators (used by tests).
    pub fn with_parts(
        path: impl Into<PathBuf>,
        fs: Arc<dyn FileSystem>,
        control: Arc<dyn ProcessControl>,
    ) -> Result<Self> {
        let path = path.into();
        let processes = load(fs.as_ref(), &path)?;
        debug!(path = %path.display(), count = processes.len(), "process tracker opened");

        Ok(Self {
            path,
            fs,
            control,
            processes: Mutex::new(processes),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a process and persist immediately.
    pub fn add_process(&self, info: ProcessInfo) -> Result<()> {
        let mut guard = self.lock();
        debug!(pid = info.pid, name = %info.name, "tracking process");
        guard.insert(info.pid, info);
        self.persist(&guard)
    }

    /// Forget a process and persist immediately.
    ///
    /// Returns the removed record, if any. Nothing is written when the PID was
    /// not tracked.
    pub fn remove_process(&self, pid: u32) -> Result<Option<ProcessInfo>> {
        let mut guard = self.lock();
        let removed = guard.remove(&pid);
        if removed.is_some() {
            debug!(pid, "untracking process");
            self.persist(&guard)?;
        }
        Ok(removed)
    }

    pub fn get_process(&self, pid: u32) -> Option<ProcessInfo> {
        self.lock().get(&pid).cloned()
    }

    /// Copy of every tracked record, keyed by PID.
    pub fn get_all_processes(&self) -> BTreeMap<u32, ProcessInfo> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop every record whose PID no longer answers the liveness probe.
    ///
    /// Persists only when something was removed. Returns the removed records.
    pub fn cleanup_dead_processes(&self) -> Result<Vec<ProcessInfo>> {
        let mut guard = self.lock();

        let dead: Vec<u32> = guard
            .keys()
            .copied()
            .filter(|pid| !self.control.is_alive(*pid))
            .collect();

        if dead.is_empty() {
            return Ok(Vec::new());
        }

        let removed: Vec<ProcessInfo> = dead.iter().filter_map(|pid| guard.remove(pid)).collect();
        for info in &removed {
            info!(pid = info.pid, name = %info.name, "removing dead process from tracker");
        }
        self.persist(&guard)?;

        Ok(removed)
    }

    /// Replace the in-memory view with what is currently on disk.
    pub fn reload(&self) -> Result<()> {
        let mut guard = self.lock();
        *guard = load(self.fs.as_ref(), &self.path)?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u32, ProcessInfo>> {
        self.processes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, processes: &BTreeMap<u32, ProcessInfo>) -> Result<()> {
        let json = serde_json::to_vec_pretty(processes).context("serializing process tracker")?;
        self.fs
            .write_atomic(&self.path, &json)
            .with_context(|| format!("persisting process tracker to {}", self.path.display()))
    }
}

fn load(fs: &dyn FileSystem, path: &Path) -> Result<BTreeMap<u32, ProcessInfo>> {
    let Some(contents) = fs.read_to_string(path)? else {
        return Ok(BTreeMap::new());
    };

    if contents.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    match serde_json::from_str(&contents) {
        Ok(map) => Ok(map),
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "process tracker file is unreadable; starting with an empty registry"
            );
            Ok(BTreeMap::new())
        }
    }
}
