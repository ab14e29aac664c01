// src/monitor/mod.rs

//! Background health monitoring of keepAlive processes.
//!
//! Two inputs feed the health map:
//! - immediate notifications from the keepAlive executor and its watcher
//!   ([`HealthMonitor::notify_started`], [`HealthMonitor::notify_exited`]);
//! - a periodic tick ([`HealthMonitor::check_once`]) that reconciles the map
//!   against the process registry and re-probes liveness.
//!
//! A state already recorded for a PID is never reported twice, so the two
//! inputs can race freely. Events go to a bounded channel with `try_send`;
//! when the consumer falls behind, events are dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::exec::process::ProcessRegistry;
use crate::platform::ProcessControl;
use crate::report::Reporter;

pub mod types;

pub use types::{HealthEventKind, HealthMonitorEvent, HealthStatus, HealthSummary, ProcessHealth};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthMonitorConfig {
    pub interval: Duration,
    pub event_capacity: usize,
    /// Number of `Failed` processes that triggers `ThresholdExceeded`.
    pub failure_threshold: usize,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            event_capacity: 100,
            failure_threshold: 3,
        }
    }
}

#[derive(Debug, Default)]
struct HealthState {
    entries: HashMap<String, ProcessHealth>,
    generations: HashMap<String, u64>,
    threshold_reported: bool,
}

impl HealthState {
    fn next_generation(&mut self, name: &str) -> u64 {
        let generation = self.generations.entry(name.to_string()).or_insert(0);
        *generation += 1;
        *generation
    }

    fn failed_count(&self) -> usize {
        self.entries
            .values()
            .filter(|h| h.status == HealthStatus::Failed)
            .count()
    }

    fn summary(&self) -> HealthSummary {
        HealthSummary::from_statuses(self.entries.values().map(|h| &h.status))
    }
}

pub struct HealthMonitor {
    config: HealthMonitorConfig,
    registry: Arc<ProcessRegistry>,
    control: Arc<dyn ProcessControl>,
    reporter: Arc<dyn Reporter>,
    state: Mutex<HealthState>,
    events_tx: mpsc::Sender<HealthMonitorEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<HealthMonitorEvent>>>,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl HealthMonitor {
    pub fn new(
        config: HealthMonitorConfig,
        registry: Arc<ProcessRegistry>,
        control: Arc<dyn ProcessControl>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(config.event_capacity.max(1));
        Self {
            config,
            registry,
            control,
            reporter,
            state: Mutex::new(HealthState::default()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &HealthMonitorConfig {
        &self.config
    }

    /// Record a start. A start over an existing entry bumps the generation
    /// and is reported as a restart; repeating the start of the PID already
    /// recorded as alive does nothing.
    pub fn notify_started(&self, name: &str, pid: u32, started_at: DateTime<Utc>) {
        let mut events = Vec::new();
        let health = {
            let mut state = self.lock();
            if let Some(existing) = state.entries.get(name) {
                if existing.pid == pid && existing.status.is_alive() {
                    return;
                }
            }
            let generation = state.next_generation(name);
            let health = ProcessHealth::running(name, pid, started_at, generation);
            state.entries.insert(name.to_string(), health.clone());
            if state.failed_count() < self.config.failure_threshold {
                state.threshold_reported = false;
            }
            events.push(started_event(&health));
            health
        };

        self.reporter.on_health(&health);
        self.publish(events);
    }

    /// Record an exit reported by the process watcher.
    ///
    /// Exit code 0 is `Exited`; anything else, including a signal death, is
    /// `Failed`. Notifications for a PID the entry no longer refers to are
    /// ignored. At most one exit event is published per process.
    pub fn notify_exited(&self, name: &str, pid: u32, exit_code: Option<i32>) {
        let mut events = Vec::new();
        let health = {
            let mut state = self.lock();
            let Some(entry) = state.entries.get_mut(name) else {
                debug!(command = %name, pid, "exit for a process the monitor never saw");
                return;
            };
            if entry.pid != pid || entry.exit_code.is_some() {
                return;
            }

            let status = match exit_code {
                Some(0) => HealthStatus::Exited,
                _ => HealthStatus::Failed,
            };
            let reason = match exit_code {
                Some(code) => format!("exited with code {code}"),
                None => "terminated by signal".to_string(),
            };

            // A tick may already have announced this exit; the real code
            // still lands in the entry, but without a second exit event.
            let announced = !entry.status.is_alive();
            let changed = entry.status != status;
            entry.status = status;
            entry.exit_code = exit_code;
            entry.reason = Some(reason);
            entry.refresh();
            let health = entry.clone();

            if changed {
                if !announced {
                    events.push(exit_event(&health));
                }
                self.check_threshold(&mut state, &health, &mut events);
            }
            health
        };

        self.reporter.on_health(&health);
        self.publish(events);
    }

    /// One reconciliation pass. Returns whether any status changed.
    pub fn check_once(&self) -> bool {
        let live: HashMap<String, (u32, bool, DateTime<Utc>)> = self
            .registry
            .snapshot()
            .into_iter()
            .map(|p| (p.name.clone(), (p.pid, p.has_exited(), p.started_at)))
            .collect();

        let mut events = Vec::new();
        let mut refreshed = Vec::new();
        let summary = {
            let mut state = self.lock();
            let mut changed_names = Vec::new();

            for (name, health) in state.entries.iter_mut() {
                if !health.status.is_alive() {
                    continue;
                }
                match live.get(name) {
                    Some(&(pid, exited, _)) if pid == health.pid => {
                        // The watcher reports real exits with their code.
                        if !exited && !self.control.is_alive(pid) {
                            health.status = HealthStatus::Failed;
                            health.reason = Some("liveness probe failed".to_string());
                            health.refresh();
                            events.push(exit_event(health));
                            changed_names.push(name.clone());
                        } else {
                            health.refresh();
                        }
                    }
                    _ => {
                        health.status = HealthStatus::Exited;
                        health.reason = Some("no longer supervised".to_string());
                        health.refresh();
                        events.push(exit_event(health));
                        changed_names.push(name.clone());
                    }
                }
                refreshed.push(health.clone());
            }

            for (name, &(pid, exited, started_at)) in &live {
                if exited {
                    continue;
                }
                let known = state.entries.get(name).is_some_and(|h| h.pid == pid);
                if known {
                    continue;
                }
                let generation = state.next_generation(name);
                let health = ProcessHealth::running(name, pid, started_at, generation);
                state.entries.insert(name.clone(), health.clone());
                events.push(started_event(&health));
                changed_names.push(name.clone());
                refreshed.push(health);
            }

            for name in &changed_names {
                if let Some(health) = state.entries.get(name).cloned() {
                    if health.status == HealthStatus::Failed {
                        self.check_threshold(&mut state, &health, &mut events);
                    }
                }
            }

            (!changed_names.is_empty()).then(|| state.summary())
        };

        for health in &refreshed {
            self.reporter.on_health(health);
        }
        self.publish(events);

        match summary {
            Some(summary) => {
                self.reporter.on_health_summary(&summary);
                true
            }
            None => false,
        }
    }

    /// Start the periodic tick. Returns `false` if it was already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            return false;
        }

        let token = CancellationToken::new();
        let monitor = Arc::clone(self);
        let handle = tokio::spawn(monitor.run_loop(token.clone()));
        *task = Some((token, handle));
        info!(interval_ms = self.config.interval.as_millis() as u64, "health monitoring started");
        true
    }

    /// Stop the periodic tick and wait for it to finish.
    pub async fn stop(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((token, handle)) = task {
            token.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "health monitor task failed");
            }
            info!("health monitoring stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Copies of every entry, with uptime of alive entries brought up to date.
    pub fn get_process_health(&self) -> HashMap<String, ProcessHealth> {
        let state = self.lock();
        state
            .entries
            .iter()
            .map(|(name, health)| {
                let mut health = health.clone();
                if health.status.is_alive() {
                    health.refresh();
                }
                (name.clone(), health)
            })
            .collect()
    }

    pub fn get_health_summary(&self) -> HealthSummary {
        self.lock().summary()
    }

    /// Take the event receiver. Only the first caller gets it.
    pub fn take_events(&self) -> Option<mpsc::Receiver<HealthMonitorEvent>> {
        self.events_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    async fn run_loop(self: Arc<Self>, token: CancellationToken) {
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    self.check_once();
                }
            }
        }
    }

    fn check_threshold(
        &self,
        state: &mut HealthState,
        trigger: &ProcessHealth,
        events: &mut Vec<HealthMonitorEvent>,
    ) {
        let failed = state.failed_count();
        if failed < self.config.failure_threshold {
            state.threshold_reported = false;
            return;
        }
        if state.threshold_reported {
            return;
        }
        state.threshold_reported = true;
        events.push(HealthMonitorEvent {
            kind: HealthEventKind::ThresholdExceeded,
            name: trigger.name.clone(),
            timestamp: Utc::now(),
            message: format!(
                "{failed} processes failed (threshold {})",
                self.config.failure_threshold
            ),
            health: trigger.clone(),
        });
    }

    fn publish(&self, events: Vec<HealthMonitorEvent>) {
        for event in events {
            self.reporter.on_lifecycle_event(&event);
            match self.events_tx.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    debug!(command = %event.name, kind = %event.kind, "health event channel full; dropping event");
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HealthState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn started_event(health: &ProcessHealth) -> HealthMonitorEvent {
    let message = match health.status {
        HealthStatus::Restarted => format!(
            "restarted (PID {}, generation {})",
            health.pid, health.generation
        ),
        _ => format!("started (PID {})", health.pid),
    };
    HealthMonitorEvent {
        kind: HealthEventKind::Started,
        name: health.name.clone(),
        timestamp: Utc::now(),
        message,
        health: health.clone(),
    }
}

fn exit_event(health: &ProcessHealth) -> HealthMonitorEvent {
    let kind = match health.status {
        HealthStatus::Failed => HealthEventKind::Failed,
        _ => HealthEventKind::Exited,
    };
    let reason = health.reason.as_deref().unwrap_or("exited");
    HealthMonitorEvent {
        kind,
        name: health.name.clone(),
        timestamp: Utc::now(),
        message: format!("{reason} (PID {})", health.pid),
        health: health.clone(),
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use tokio::process::Command;

    use super::*;
    use crate::report::NoopReporter;

    struct AlwaysAlive;

    impl ProcessControl for AlwaysAlive {
        fn configure_group(&self, _cmd: &mut Command) {}
        fn signal_group(&self, _pid: u32, _force: bool) -> io::Result<()> {
            Ok(())
        }
        fn signal_process(&self, _pid: u32, _force: bool) -> io::Result<()> {
            Ok(())
        }
        fn is_alive(&self, _pid: u32) -> bool {
            true
        }
    }

    fn monitor(config: HealthMonitorConfig) -> HealthMonitor {
        HealthMonitor::new(
            config,
            Arc::new(ProcessRegistry::new()),
            Arc::new(AlwaysAlive),
            Arc::new(NoopReporter),
        )
    }

    fn drain(rx: &mut mpsc::Receiver<HealthMonitorEvent>) -> Vec<HealthEventKind> {
        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind);
        }
        kinds
    }

    #[test]
    fn repeated_notifications_for_the_same_pid_are_deduplicated() {
        let monitor = monitor(HealthMonitorConfig::default());
        let mut rx = monitor.take_events().unwrap();

        monitor.notify_started("api", 10, Utc::now());
        monitor.notify_started("api", 10, Utc::now());
        monitor.notify_exited("api", 10, Some(0));
        monitor.notify_exited("api", 10, Some(0));

        assert_eq!(
            drain(&mut rx),
            vec![HealthEventKind::Started, HealthEventKind::Exited]
        );
        assert_eq!(monitor.get_process_health()["api"].status, HealthStatus::Exited);
    }

    #[test]
    fn second_start_under_a_name_is_a_restart() {
        let monitor = monitor(HealthMonitorConfig::default());
        monitor.notify_started("api", 10, Utc::now());
        monitor.notify_exited("api", 10, Some(1));
        monitor.notify_started("api", 11, Utc::now());

        let health = &monitor.get_process_health()["api"];
        assert_eq!(health.status, HealthStatus::Restarted);
        assert_eq!(health.generation, 2);
        assert_eq!(health.pid, 11);
    }

    #[test]
    fn stale_exit_for_an_old_pid_is_ignored() {
        let monitor = monitor(HealthMonitorConfig::default());
        monitor.notify_started("api", 10, Utc::now());
        monitor.notify_started("api", 11, Utc::now());
        monitor.notify_exited("api", 10, Some(1));

        assert!(monitor.get_process_health()["api"].status.is_alive());
    }

    #[test]
    fn threshold_is_reported_once() {
        let monitor = monitor(HealthMonitorConfig {
            failure_threshold: 2,
            ..HealthMonitorConfig::default()
        });
        let mut rx = monitor.take_events().unwrap();

        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            monitor.notify_started(name, 100 + i as u32, Utc::now());
            monitor.notify_exited(name, 100 + i as u32, Some(2));
        }

        let kinds = drain(&mut rx);
        let thresholds = kinds
            .iter()
            .filter(|k| **k == HealthEventKind::ThresholdExceeded)
            .count();
        assert_eq!(thresholds, 1, "{kinds:?}");
        assert_eq!(monitor.get_health_summary().failed, 3);
    }

    #[test]
    fn full_channel_drops_events_without_blocking() {
        let monitor = monitor(HealthMonitorConfig {
            event_capacity: 1,
            ..HealthMonitorConfig::default()
        });
        let mut rx = monitor.take_events().unwrap();

        monitor.notify_started("a", 1, Utc::now());
        monitor.notify_started("b", 2, Utc::now());

        assert_eq!(drain(&mut rx).len(), 1);
        assert_eq!(monitor.get_health_summary().running, 2);
    }

    #[test]
    fn tick_marks_entries_missing_from_the_registry_as_exited() {
        let monitor = monitor(HealthMonitorConfig::default());
        monitor.notify_started("gone", 42, Utc::now());

        assert!(monitor.check_once());
        assert_eq!(monitor.get_process_health()["gone"].status, HealthStatus::Exited);
        assert!(!monitor.check_once(), "nothing left to change");
    }

    #[test]
    fn exit_after_a_tick_already_marked_the_entry_emits_no_second_event() {
        let monitor = monitor(HealthMonitorConfig::default());
        let mut rx = monitor.take_events().unwrap();

        monitor.notify_started("w", 4242, Utc::now());
        assert!(monitor.check_once());
        monitor.notify_exited("w", 4242, Some(4));

        assert_eq!(
            drain(&mut rx),
            vec![HealthEventKind::Started, HealthEventKind::Exited]
        );
        let health = &monitor.get_process_health()["w"];
        assert_eq!(health.status, HealthStatus::Failed);
        assert_eq!(health.exit_code, Some(4));
    }

    #[test]
    fn tick_skips_an_entry_whose_exit_was_already_reported() {
        let monitor = monitor(HealthMonitorConfig::default());
        let mut rx = monitor.take_events().unwrap();

        monitor.notify_started("w", 7, Utc::now());
        monitor.notify_exited("w", 7, Some(0));
        assert!(!monitor.check_once());

        assert_eq!(
            drain(&mut rx),
            vec![HealthEventKind::Started, HealthEventKind::Exited]
        );
    }

    #[test]
    fn events_receiver_can_only_be_taken_once() {
        let monitor = monitor(HealthMonitorConfig::default());
        assert!(monitor.take_events().is_some());
        assert!(monitor.take_events().is_none());
    }
}
