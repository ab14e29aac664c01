// src/monitor/types.rs

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Health of one supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum HealthStatus {
    Running,
    /// Exited with code 0, or vanished from supervision without a code.
    Exited,
    /// Exited with a non-zero code or stopped answering the liveness probe.
    Failed,
    /// Started again under a name that already had a health entry.
    Restarted,
}

impl HealthStatus {
    /// Whether the process is believed to be running.
    pub fn is_alive(&self) -> bool {
        matches!(self, HealthStatus::Running | HealthStatus::Restarted)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Running => "running",
            HealthStatus::Exited => "exited",
            HealthStatus::Failed => "failed",
            HealthStatus::Restarted => "restarted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessHealth {
    pub name: String,
    pub pid: u32,
    pub status: HealthStatus,
    pub started_at: DateTime<Utc>,
    pub uptime: Duration,
    pub last_check: DateTime<Utc>,
    pub exit_code: Option<i32>,
    pub reason: Option<String>,
    /// Bumped on every start notification for this name.
    pub generation: u64,
}

impl ProcessHealth {
    pub(crate) fn running(name: &str, pid: u32, started_at: DateTime<Utc>, generation: u64) -> Self {
        let now = Utc::now();
        Self {
            name: name.to_string(),
            pid,
            status: if generation > 1 {
                HealthStatus::Restarted
            } else {
                HealthStatus::Running
            },
            started_at,
            uptime: (now - started_at).to_std().unwrap_or_default(),
            last_check: now,
            exit_code: None,
            reason: None,
            generation,
        }
    }

    pub(crate) fn refresh(&mut self) {
        let now = Utc::now();
        self.uptime = (now - self.started_at).to_std().unwrap_or_default();
        self.last_check = now;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthEventKind {
    Started,
    Exited,
    Failed,
    /// The number of failed processes reached the configured threshold.
    ThresholdExceeded,
}

impl fmt::Display for HealthEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthEventKind::Started => "started",
            HealthEventKind::Exited => "exited",
            HealthEventKind::Failed => "failed",
            HealthEventKind::ThresholdExceeded => "threshold exceeded",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthMonitorEvent {
    pub kind: HealthEventKind,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub health: ProcessHealth,
}

/// Counts of monitored processes by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealthSummary {
    pub total: usize,
    pub running: usize,
    pub exited: usize,
    pub failed: usize,
    pub restarted: usize,
}

impl HealthSummary {
    pub fn from_statuses<'a>(statuses: impl IntoIterator<Item = &'a HealthStatus>) -> Self {
        let mut summary = HealthSummary::default();
        for status in statuses {
            summary.total += 1;
            match status {
                HealthStatus::Running => summary.running += 1,
                HealthStatus::Exited => summary.exited += 1,
                HealthStatus::Failed => summary.failed += 1,
                HealthStatus::Restarted => summary.restarted += 1,
            }
        }
        summary
    }

    pub fn alive(&self) -> usize {
        self.running + self.restarted
    }
}

impl fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} monitored: {} running, {} restarted, {} exited, {} failed",
            self.total, self.running, self.restarted, self.exited, self.failed
        )
    }
}
