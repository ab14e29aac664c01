// src/exec/once.rs

//! Run-to-completion execution.

use std::process::ExitStatus;
use std::time::Duration;

use chrono::Utc;
use tokio::process::Child;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CommandSpec;
use crate::engine::ExecutionResult;
use crate::errors::{ErrorKind, ExecError};
use crate::exec::ExecContext;
use crate::exec::invocation::{build_command, resolve_work_dir};
use crate::exec::stream::{OutputBuffer, OutputStreamer, StreamKind, join_readers};

/// How long to keep reading pipes after the child has exited.
const OUTPUT_DRAIN: Duration = Duration::from_secs(2);

enum Waited {
    Exited(std::io::Result<ExitStatus>),
    Cancelled,
    TimedOut(Duration),
}

/// Run `spec` and block until it finishes, is cancelled, or times out.
///
/// stdout and stderr are always captured into the result's `output`; in
/// verbose mode each line is also echoed to the reporter as it arrives.
/// `result.error` is set exactly when the command did not succeed.
pub async fn run_once(
    spec: &CommandSpec,
    ctx: &ExecContext,
    cancel: &CancellationToken,
) -> ExecutionResult {
    let started_at = Utc::now();
    let work_dir = resolve_work_dir(spec, ctx.default_work_dir.as_deref());
    let command_line = spec.command_line();

    info!(command = %spec.name, cmd = %command_line, "running command");

    let mut cmd = build_command(spec, work_dir.as_deref(), true, ctx.control.as_ref());
    cmd.kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            let kind = ErrorKind::from_spawn_error(&e);
            warn!(command = %spec.name, error = %e, %kind, "failed to start command");
            let err = ExecError::new(kind, &command_line, format!("failed to start: {e}"))
                .with_work_dir(work_dir);
            return ExecutionResult::failed(&spec.name, started_at, "", err);
        }
    };

    let pid = child.id();
    debug!(command = %spec.name, pid, "command started");

    let buffer = OutputBuffer::new();
    let stop_readers = CancellationToken::new();
    let mut streamer = OutputStreamer::new(&spec.name, buffer.clone(), stop_readers.clone());
    if ctx.verbose {
        streamer = streamer.echo_to(ctx.reporter.clone());
    }
    let readers = streamer.attach(child.stdout.take(), child.stderr.take());

    let limit = spec.timeout_secs.map(Duration::from_secs);
    let waited = tokio::select! {
        status = child.wait() => Waited::Exited(status),
        _ = cancel.cancelled() => Waited::Cancelled,
        _ = deadline(limit) => Waited::TimedOut(limit.unwrap_or_default()),
    };

    if !matches!(waited, Waited::Exited(_)) {
        kill_group(&mut child, pid, ctx, &spec.name).await;
    }

    join_readers(&spec.name, readers, &stop_readers, OUTPUT_DRAIN).await;
    let output = buffer.render();

    let err = match waited {
        Waited::Exited(Ok(status)) if status.success() => {
            info!(command = %spec.name, exit_code = 0, "command finished");
            return ExecutionResult::succeeded(&spec.name, started_at, 0, output);
        }
        Waited::Exited(Ok(status)) => {
            let code = status.code().unwrap_or(-1);
            let message = match status.code() {
                Some(code) => format!("exited with code {code}"),
                None => "terminated by signal".to_string(),
            };
            warn!(command = %spec.name, exit_code = code, "command failed");
            ExecError::new(ErrorKind::NonZeroExit, &command_line, message)
                .with_exit_code(code)
                .with_stderr(buffer.render_stream(StreamKind::Stderr))
        }
        Waited::Exited(Err(e)) => {
            warn!(command = %spec.name, error = %e, "failed waiting for command");
            ExecError::new(
                ErrorKind::SystemError,
                &command_line,
                format!("failed waiting for process: {e}"),
            )
        }
        Waited::Cancelled => {
            info!(command = %spec.name, "command cancelled");
            ExecError::new(ErrorKind::ContextCancelled, &command_line, "cancelled while running")
        }
        Waited::TimedOut(limit) => {
            warn!(command = %spec.name, timeout_secs = limit.as_secs(), "command timed out");
            ExecError::new(
                ErrorKind::Timeout,
                &command_line,
                format!("did not finish within {}s", limit.as_secs()),
            )
            .with_stderr(buffer.render_stream(StreamKind::Stderr))
        }
    };

    ExecutionResult::failed(&spec.name, started_at, output, err.with_work_dir(work_dir))
}

async fn deadline(limit: Option<Duration>) {
    match limit {
        Some(limit) => sleep(limit).await,
        None => std::future::pending().await,
    }
}

/// Force-kill the child's whole group, then reap the child itself.
async fn kill_group(child: &mut Child, pid: Option<u32>, ctx: &ExecContext, name: &str) {
    if let Some(pid) = pid {
        if let Err(e) = ctx.control.signal_group(pid, true) {
            debug!(command = %name, pid, error = %e, "group kill failed; killing process only");
        }
    }
    if let Err(e) = child.kill().await {
        debug!(command = %name, error = %e, "kill after group kill failed");
    }
}
