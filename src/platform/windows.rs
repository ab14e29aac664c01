// src/platform/windows.rs

use std::io;
use std::process::Stdio;

use tokio::process::Command;
use windows_sys::Win32::Foundation::{CloseHandle, STILL_ACTIVE};
use windows_sys::Win32::System::Threading::{
    CREATE_NEW_PROCESS_GROUP, GetExitCodeProcess, OpenProcess,
    PROCESS_QUERY_LIMITED_INFORMATION,
};

use super::ProcessControl;

/// Windows PIDs are multiples of four and well below this bound in practice.
const MAX_PLAUSIBLE_PID: u32 = 0x00FF_FFFF;

#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsProcessControl;

impl WindowsProcessControl {
    pub fn new() -> Self {
        Self
    }
}

fn taskkill(pid: u32, tree: bool, force: bool) -> io::Result<()> {
    let mut cmd = std::process::Command::new("taskkill");
    if tree {
        cmd.arg("/T");
    }
    if force {
        cmd.arg("/F");
    }
    cmd.arg("/PID")
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    let status = cmd.status()?;
    // 128: no such process.
    if status.success() || status.code() == Some(128) {
        Ok(())
    } else {
        Err(io::Error::other(format!(
            "taskkill for pid {pid} exited with {status}"
        )))
    }
}

impl ProcessControl for WindowsProcessControl {
    fn configure_group(&self, cmd: &mut Command) {
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }

    fn signal_group(&self, pid: u32, force: bool) -> io::Result<()> {
        taskkill(pid, true, force)
    }

    fn signal_process(&self, pid: u32, force: bool) -> io::Result<()> {
        taskkill(pid, false, force)
    }

    /// Approximate: a recycled PID is indistinguishable from the original
    /// process.
    fn is_alive(&self, pid: u32) -> bool {
        if pid == 0 || pid > MAX_PLAUSIBLE_PID {
            return false;
        }

        unsafe {
            let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
            if handle.is_null() {
                return false;
            }

            let mut code: u32 = 0;
            let ok = GetExitCodeProcess(handle, &mut code);
            CloseHandle(handle);

            ok != 0 && code == STILL_ACTIVE as u32
        }
    }
}
