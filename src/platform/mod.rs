// src/platform/mod.rs

//! Platform process control.
//!
//! Everything OS-specific about process groups lives behind
//! [`ProcessControl`]. The termination protocol, the tracker and the health
//! monitor only talk to this trait:
//!
//! - Unix: children call `setpgid(0, 0)` via `Command::process_group(0)`;
//!   group signals go through `killpg`.
//! - Windows: children get `CREATE_NEW_PROCESS_GROUP`; group termination is a
//!   `taskkill /T` tree kill.

use std::io;
use std::sync::Arc;

use tokio::process::Command;

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
pub use unix::UnixProcessControl;
#[cfg(windows)]
pub use windows::WindowsProcessControl;

/// OS primitives needed to supervise a process and its subtree.
pub trait ProcessControl: Send + Sync {
    /// Arrange for the spawned child to lead its own process group.
    fn configure_group(&self, cmd: &mut Command);

    /// Signal the whole group led by `pid`. `force = false` asks politely
    /// (SIGTERM / tree kill), `force = true` does not (SIGKILL / forced tree
    /// kill). A group that no longer exists is not an error.
    fn signal_group(&self, pid: u32, force: bool) -> io::Result<()>;

    /// Signal only the process itself, with the same escalation levels.
    fn signal_process(&self, pid: u32, force: bool) -> io::Result<()>;

    /// Best-effort liveness probe.
    fn is_alive(&self, pid: u32) -> bool;

    /// Whether any member of the group led by `pid` is still running. The
    /// leader may already be gone while members it spawned linger.
    fn group_alive(&self, pid: u32) -> bool {
        self.is_alive(pid)
    }
}

/// The process control implementation for the current OS.
pub fn native() -> Arc<dyn ProcessControl> {
    #[cfg(unix)]
    {
        Arc::new(UnixProcessControl::new())
    }

    #[cfg(windows)]
    {
        Arc::new(WindowsProcessControl::new())
    }

    #[cfg(not(any(unix, windows)))]
    {
        compile_error!("Unsupported platform");
    }
}
