// src/exec/invocation.rs

//! Building the OS command for a [`CommandSpec`].

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::config::CommandSpec;
use crate::platform::ProcessControl;

/// Working directory for `spec`: its own `workDir` beats the executor default.
pub fn resolve_work_dir(spec: &CommandSpec, default_dir: Option<&Path>) -> Option<PathBuf> {
    spec.work_dir
        .clone()
        .or_else(|| default_dir.map(Path::to_path_buf))
}

/// Build a `tokio::process::Command` for `spec`.
///
/// - Arguments are passed as-is, no shell involved.
/// - The parent environment is always inherited; `spec.env` entries are
///   layered on top one key at a time.
/// - stdin is closed; stdout/stderr are piped when `capture` is set and
///   discarded otherwise.
/// - The child leads its own process group so its whole subtree can be
///   signalled at once.
pub fn build_command(
    spec: &CommandSpec,
    work_dir: Option<&Path>,
    capture: bool,
    control: &dyn ProcessControl,
) -> Command {
    let mut cmd = Command::new(&spec.command);
    cmd.args(&spec.args);

    if let Some(dir) = work_dir {
        cmd.current_dir(dir);
    }

    for (key, value) in &spec.env {
        cmd.env(key, value);
    }

    cmd.stdin(Stdio::null());
    if capture {
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    } else {
        cmd.stdout(Stdio::null()).stderr(Stdio::null());
    }

    control.configure_group(&mut cmd);
    cmd
}
