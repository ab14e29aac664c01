// src/exec/terminate.rs

//! Graceful termination of a process group.
//!
//! Escalation, per target:
//! 1. graceful signal to the whole group, wait up to the grace period for
//!    the leader and then every other group member to exit;
//! 2. forced signal to the whole group, wait up to the fallback timeout;
//! 3. if a group operation fails, repeat the escalation against the single
//!    process instead (starting from the phase that failed).
//!
//! A process that survives all of this is reported as
//! [`TerminationOutcome::Unresponsive`] and logged as a warning. Termination
//! never returns an error and never waits longer than
//! `grace + fallback` per level.

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};

use crate::exec::process::ProcessExit;
use crate::platform::ProcessControl;

/// Time allowed between the graceful signal and escalation.
pub const GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Time allowed after a forced kill before giving up.
pub const FALLBACK_TIMEOUT: Duration = Duration::from_secs(3);

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TerminationOutcome {
    AlreadyExited,
    /// Exited after the group-wide graceful signal.
    Graceful,
    /// Exited after the group-wide forced kill.
    Forced,
    /// Group signalling failed; exited after a graceful signal to the process.
    FallbackGraceful,
    /// Group signalling failed; exited after a forced kill of the process.
    FallbackForced,
    /// Still alive after every escalation step.
    Unresponsive,
}

impl TerminationOutcome {
    pub fn terminated(&self) -> bool {
        !matches!(self, TerminationOutcome::Unresponsive)
    }
}

impl fmt::Display for TerminationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TerminationOutcome::AlreadyExited => "already exited",
            TerminationOutcome::Graceful => "terminated gracefully",
            TerminationOutcome::Forced => "force killed",
            TerminationOutcome::FallbackGraceful => "terminated gracefully (single process)",
            TerminationOutcome::FallbackForced => "force killed (single process)",
            TerminationOutcome::Unresponsive => "unresponsive",
        };
        f.write_str(s)
    }
}

/// Observes whether the target has exited.
pub trait ExitProbe: Send {
    fn has_exited(&mut self) -> bool;

    /// Resolve to `true` as soon as the target exits, or `false` once
    /// `within` has elapsed.
    fn wait_for_exit(&mut self, within: Duration) -> Pin<Box<dyn Future<Output = bool> + Send + '_>>;
}

/// Probe backed by the exit channel of a supervised child.
#[derive(Debug)]
pub struct ExitWatch {
    rx: watch::Receiver<Option<ProcessExit>>,
}

impl ExitWatch {
    pub fn new(rx: watch::Receiver<Option<ProcessExit>>) -> Self {
        Self { rx }
    }
}

impl ExitProbe for ExitWatch {
    fn has_exited(&mut self) -> bool {
        self.rx.borrow().is_some()
    }

    fn wait_for_exit(&mut self, within: Duration) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async move {
            match timeout(within, self.rx.wait_for(|exit| exit.is_some())).await {
                Ok(Ok(_)) => true,
                // The watcher only drops its sender after reaping the child.
                Ok(Err(_closed)) => true,
                Err(_elapsed) => false,
            }
        })
    }
}

/// Probe that polls the platform liveness check. Used for processes this
/// invocation did not spawn.
pub struct PidPoll {
    pid: u32,
    control: Arc<dyn ProcessControl>,
}

impl PidPoll {
    pub fn new(pid: u32, control: Arc<dyn ProcessControl>) -> Self {
        Self { pid, control }
    }
}

impl ExitProbe for PidPoll {
    fn has_exited(&mut self) -> bool {
        !self.control.is_alive(self.pid)
    }

    fn wait_for_exit(&mut self, within: Duration) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async move {
            let deadline = Instant::now() + within;
            loop {
                if !self.control.is_alive(self.pid) {
                    return true;
                }
                if Instant::now() >= deadline {
                    return false;
                }
                sleep(POLL_INTERVAL).await;
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Group,
    Process,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Graceful,
    Force,
}

/// Runs the escalation protocol against a PID.
#[derive(Clone)]
pub struct Terminator {
    control: Arc<dyn ProcessControl>,
    grace: Duration,
    fallback: Duration,
}

impl fmt::Debug for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Terminator")
            .field("grace", &self.grace)
            .field("fallback", &self.fallback)
            .finish_non_exhaustive()
    }
}

impl Terminator {
    pub fn new(control: Arc<dyn ProcessControl>) -> Self {
        Self {
            control,
            grace: GRACE_PERIOD,
            fallback: FALLBACK_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, grace: Duration, fallback: Duration) -> Self {
        self.grace = grace;
        self.fallback = fallback;
        self
    }

    pub fn control(&self) -> &Arc<dyn ProcessControl> {
        &self.control
    }

    pub async fn terminate(
        &self,
        pid: u32,
        name: &str,
        probe: &mut dyn ExitProbe,
    ) -> TerminationOutcome {
        if probe.has_exited() {
            debug!(command = %name, pid, "process already exited; nothing to terminate");
            return TerminationOutcome::AlreadyExited;
        }

        let failed_phase = match self.escalate(pid, name, probe, Scope::Group, Phase::Graceful).await {
            Ok(outcome) => return outcome,
            Err((phase, e)) => {
                warn!(
                    command = %name,
                    pid,
                    error = %e,
                    "process group signalling failed; falling back to the single process"
                );
                phase
            }
        };

        match self.escalate(pid, name, probe, Scope::Process, failed_phase).await {
            Ok(TerminationOutcome::Graceful) => TerminationOutcome::FallbackGraceful,
            Ok(TerminationOutcome::Forced) => TerminationOutcome::FallbackForced,
            Ok(other) => other,
            Err((_, e)) => {
                if probe.has_exited() {
                    return TerminationOutcome::FallbackForced;
                }
                warn!(
                    command = %name,
                    pid,
                    error = %e,
                    "could not signal process; it may still be running"
                );
                TerminationOutcome::Unresponsive
            }
        }
    }

    async fn escalate(
        &self,
        pid: u32,
        name: &str,
        probe: &mut dyn ExitProbe,
        scope: Scope,
        start: Phase,
    ) -> Result<TerminationOutcome, (Phase, io::Error)> {
        if start == Phase::Graceful {
            self.send(pid, scope, false).map_err(|e| (Phase::Graceful, e))?;
            debug!(command = %name, pid, ?scope, "sent graceful termination signal");

            let deadline = Instant::now() + self.grace;
            if probe.wait_for_exit(self.grace).await {
                if self.wait_for_group(pid, scope, deadline).await {
                    info!(command = %name, pid, ?scope, "process terminated gracefully");
                    return Ok(TerminationOutcome::Graceful);
                }
                info!(
                    command = %name,
                    pid,
                    "group members outlived the leader; force killing the group"
                );
            } else {
                info!(
                    command = %name,
                    pid,
                    grace_ms = self.grace.as_millis() as u64,
                    "process ignored graceful termination; force killing"
                );
            }
        }

        self.send(pid, scope, true).map_err(|e| (Phase::Force, e))?;

        let deadline = Instant::now() + self.fallback;
        if probe.wait_for_exit(self.fallback).await {
            if !self.wait_for_group(pid, scope, deadline).await {
                warn!(command = %name, pid, "group members still present after force kill");
            }
            info!(command = %name, pid, ?scope, "process force killed");
            return Ok(TerminationOutcome::Forced);
        }

        warn!(
            command = %name,
            pid,
            timeout_ms = self.fallback.as_millis() as u64,
            "process still alive after force kill; giving up"
        );
        Ok(TerminationOutcome::Unresponsive)
    }

    /// Once the leader is gone, wait until `deadline` for the rest of its
    /// group to disappear. Always `true` for single-process scope.
    async fn wait_for_group(&self, pid: u32, scope: Scope, deadline: Instant) -> bool {
        if scope == Scope::Process {
            return true;
        }
        loop {
            if !self.control.group_alive(pid) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    fn send(&self, pid: u32, scope: Scope, force: bool) -> io::Result<()> {
        match scope {
            Scope::Group => self.control.signal_group(pid, force),
            Scope::Process => self.control.signal_process(pid, force),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Scripted control: records calls and decides which ones fail and which
    /// signal actually ends the process.
    #[derive(Default)]
    struct ScriptedControl {
        calls: Mutex<Vec<(&'static str, bool)>>,
        group_fails: bool,
        exits_on: Option<(&'static str, bool)>,
        exited: Mutex<bool>,
        /// Group members that ignore the graceful signal and only die on a
        /// forced group kill.
        stubborn_members: Mutex<bool>,
    }

    impl ProcessControl for ScriptedControl {
        fn configure_group(&self, _cmd: &mut tokio::process::Command) {}

        fn signal_group(&self, _pid: u32, force: bool) -> io::Result<()> {
            self.calls.lock().unwrap().push(("group", force));
            if self.group_fails {
                return Err(io::Error::from(io::ErrorKind::PermissionDenied));
            }
            if self.exits_on == Some(("group", force)) {
                *self.exited.lock().unwrap() = true;
            }
            if force {
                *self.stubborn_members.lock().unwrap() = false;
            }
            Ok(())
        }

        fn signal_process(&self, _pid: u32, force: bool) -> io::Result<()> {
            self.calls.lock().unwrap().push(("process", force));
            if self.exits_on == Some(("process", force)) {
                *self.exited.lock().unwrap() = true;
            }
            Ok(())
        }

        fn is_alive(&self, _pid: u32) -> bool {
            !*self.exited.lock().unwrap()
        }

        fn group_alive(&self, pid: u32) -> bool {
            self.is_alive(pid) || *self.stubborn_members.lock().unwrap()
        }
    }

    fn run(control: ScriptedControl) -> (TerminationOutcome, Vec<(&'static str, bool)>) {
        let control = Arc::new(control);
        let terminator = Terminator::new(control.clone())
            .with_timeouts(Duration::from_millis(150), Duration::from_millis(150));
        let mut probe = PidPoll::new(42, control.clone());

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let outcome = rt.block_on(terminator.terminate(42, "t", &mut probe));
        let calls = control.calls.lock().unwrap().clone();
        (outcome, calls)
    }

    #[test]
    fn graceful_group_signal_is_enough_for_cooperative_processes() {
        let (outcome, calls) = run(ScriptedControl {
            exits_on: Some(("group", false)),
            ..Default::default()
        });
        assert_eq!(outcome, TerminationOutcome::Graceful);
        assert_eq!(calls, vec![("group", false)]);
    }

    #[test]
    fn lingering_group_members_are_force_killed_after_leader_exits() {
        let (outcome, calls) = run(ScriptedControl {
            exits_on: Some(("group", false)),
            stubborn_members: Mutex::new(true),
            ..Default::default()
        });
        assert_eq!(outcome, TerminationOutcome::Forced);
        assert_eq!(calls, vec![("group", false), ("group", true)]);
    }

    #[test]
    fn escalates_to_group_kill_after_grace_period() {
        let (outcome, calls) = run(ScriptedControl {
            exits_on: Some(("group", true)),
            ..Default::default()
        });
        assert_eq!(outcome, TerminationOutcome::Forced);
        assert_eq!(calls, vec![("group", false), ("group", true)]);
    }

    #[test]
    fn falls_back_to_single_process_when_group_signal_fails() {
        let (outcome, calls) = run(ScriptedControl {
            group_fails: true,
            exits_on: Some(("process", true)),
            ..Default::default()
        });
        assert_eq!(outcome, TerminationOutcome::FallbackForced);
        assert_eq!(
            calls,
            vec![("group", false), ("process", false), ("process", true)]
        );
    }

    #[test]
    fn unkillable_process_is_reported_not_awaited_forever() {
        let (outcome, calls) = run(ScriptedControl::default());
        assert_eq!(outcome, TerminationOutcome::Unresponsive);
        assert_eq!(calls, vec![("group", false), ("group", true)]);
    }

    #[test]
    fn already_exited_process_is_not_signalled() {
        let control = ScriptedControl::default();
        *control.exited.lock().unwrap() = true;
        let (outcome, calls) = run(control);
        assert_eq!(outcome, TerminationOutcome::AlreadyExited);
        assert!(calls.is_empty());
    }
}
