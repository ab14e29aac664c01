// src/platform/unix.rs

use std::io;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill, killpg};
use nix::unistd::Pid;
use tokio::process::Command;

use super::ProcessControl;

#[derive(Debug, Default, Clone, Copy)]
pub struct UnixProcessControl;

impl UnixProcessControl {
    pub fn new() -> Self {
        Self
    }
}

/// `None` for PIDs that would address a group or "every process" when passed
/// to `kill(2)`.
fn to_pid(pid: u32) -> Option<Pid> {
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => Some(Pid::from_raw(raw)),
        _ => None,
    }
}

fn signal_for(force: bool) -> Signal {
    if force { Signal::SIGKILL } else { Signal::SIGTERM }
}

fn invalid_pid(pid: u32) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, format!("invalid pid {pid}"))
}

impl ProcessControl for UnixProcessControl {
    fn configure_group(&self, cmd: &mut Command) {
        cmd.process_group(0);
    }

    fn signal_group(&self, pid: u32, force: bool) -> io::Result<()> {
        let pgid = to_pid(pid).ok_or_else(|| invalid_pid(pid))?;
        match killpg(pgid, signal_for(force)) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(io::Error::from(e)),
        }
    }

    fn signal_process(&self, pid: u32, force: bool) -> io::Result<()> {
        let pid = to_pid(pid).ok_or_else(|| invalid_pid(pid))?;
        match kill(pid, signal_for(force)) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(io::Error::from(e)),
        }
    }

    fn is_alive(&self, pid: u32) -> bool {
        let Some(target) = to_pid(pid) else {
            return false;
        };

        match kill(target, None) {
            Ok(()) => !is_zombie(pid),
            // Exists but belongs to someone else.
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    fn group_alive(&self, pid: u32) -> bool {
        let Some(pgid) = to_pid(pid) else {
            return false;
        };

        match killpg(pgid, None) {
            Ok(()) | Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }
}

/// Exited-but-unreaped processes still answer signal 0.
#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    // Format: `pid (comm) state ...`; comm may itself contain ')'.
    stat.rfind(')')
        .and_then(|idx| stat[idx + 1..].split_whitespace().next())
        .is_some_and(|state| state == "Z" || state == "X")
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(_pid: u32) -> bool {
    false
}
