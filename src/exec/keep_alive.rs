// src/exec/keep_alive.rs

//! Background (keepAlive) execution.
//!
//! `start_keep_alive` spawns the process and returns as soon as it is
//! registered. A watcher task owns the `Child`, waits for it to exit and then
//! unregisters it everywhere it was registered.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::process::Child;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CommandSpec;
use crate::engine::ExecutionResult;
use crate::errors::{ErrorKind, ExecError};
use crate::exec::invocation::{build_command, resolve_work_dir};
use crate::exec::process::{ManagedProcess, ProcessExit};
use crate::exec::stream::{OutputBuffer, OutputStreamer, join_readers};
use crate::exec::{ExecContext, Supervision};
use crate::report::{ProcessStatusUpdate, Reporter};
use crate::tracker::ProcessInfo;

/// Lines of recent output kept per keepAlive process.
pub const KEEP_ALIVE_OUTPUT_LINES: usize = 256;

const OUTPUT_DRAIN: Duration = Duration::from_millis(500);

/// Start `spec` in the background.
///
/// On success the process is in the registry, in the tracker and known to the
/// health monitor by the time this returns, and the result's output names the
/// PID. Any failure here is a [`ErrorKind::StartupFailure`].
pub async fn start_keep_alive(
    spec: &CommandSpec,
    ctx: &ExecContext,
    sup: &Supervision,
) -> ExecutionResult {
    let started_at = Utc::now();
    let work_dir = resolve_work_dir(spec, ctx.default_work_dir.as_deref());
    let command_line = spec.command_line();

    let startup_failure = |message: String| {
        let err = ExecError::new(ErrorKind::StartupFailure, &command_line, message)
            .with_work_dir(work_dir.clone());
        ExecutionResult::failed(&spec.name, started_at, "", err)
    };

    if sup.registry.contains(&spec.name) {
        warn!(command = %spec.name, "keepAlive process with this name is already running");
        return startup_failure(format!(
            "a process named '{}' is already running",
            spec.name
        ));
    }

    info!(command = %spec.name, cmd = %command_line, "starting keepAlive process");

    // No kill_on_drop: detached runs leave these processes behind on purpose.
    let mut cmd = build_command(spec, work_dir.as_deref(), ctx.verbose, ctx.control.as_ref());

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            let kind = ErrorKind::from_spawn_error(&e);
            warn!(command = %spec.name, error = %e, cause = %kind, "failed to start keepAlive process");
            return startup_failure(format!("failed to start ({kind}): {e}"));
        }
    };

    let Some(pid) = child.id() else {
        return startup_failure("process exited before its PID could be read".to_string());
    };

    let output = OutputBuffer::bounded(KEEP_ALIVE_OUTPUT_LINES);
    let stop_streams = CancellationToken::new();
    let readers = if ctx.verbose {
        OutputStreamer::new(&spec.name, output.clone(), stop_streams.clone())
            .echo_to(ctx.reporter.clone())
            .attach(child.stdout.take(), child.stderr.take())
    } else {
        Vec::new()
    };

    let (exit_tx, exit_rx) = watch::channel(None);
    let process = ManagedProcess::new(
        spec.clone(),
        pid,
        work_dir.clone(),
        exit_rx,
        output,
        stop_streams.clone(),
    );
    let process_started_at = process.started_at;

    if sup.registry.insert(process).is_err() {
        // Lost a race against another start under the same name.
        if let Err(e) = ctx.control.signal_group(pid, true) {
            debug!(command = %spec.name, pid, error = %e, "failed to kill process group of duplicate start");
        }
        if let Err(e) = child.kill().await {
            debug!(command = %spec.name, pid, error = %e, "failed to kill duplicate start");
        }
        return startup_failure(format!(
            "a process named '{}' is already running",
            spec.name
        ));
    }

    let info = ProcessInfo::from_spec(pid, spec, work_dir, process_started_at);
    if let Err(e) = sup.tracker.add_process(info) {
        warn!(command = %spec.name, pid, error = %e, "failed to persist keepAlive process to tracker");
    }

    sup.monitor.notify_started(&spec.name, pid, process_started_at);
    ctx.reporter
        .on_process_status(&spec.name, pid, &ProcessStatusUpdate::Started);

    tokio::spawn(watch_process(WatchedChild {
        name: spec.name.clone(),
        pid,
        child,
        readers,
        stop_streams,
        exit_tx,
        sup: sup.clone(),
        reporter: ctx.reporter.clone(),
    }));

    info!(command = %spec.name, pid, "keepAlive process started");
    ExecutionResult::succeeded(
        &spec.name,
        started_at,
        0,
        format!("started '{}' (PID {pid})", spec.name),
    )
    .with_pid(pid)
}

struct WatchedChild {
    name: String,
    pid: u32,
    child: Child,
    readers: Vec<JoinHandle<usize>>,
    stop_streams: CancellationToken,
    exit_tx: watch::Sender<Option<ProcessExit>>,
    sup: Supervision,
    reporter: Arc<dyn Reporter>,
}

/// Owns the child until it exits, then unregisters it.
///
/// Unregistration happens before the exit is published, so anyone waiting on
/// the exit channel observes an already-clean registry and tracker.
async fn watch_process(mut w: WatchedChild) {
    let exit = match w.child.wait().await {
        Ok(status) => ProcessExit {
            code: status.code(),
        },
        Err(e) => {
            warn!(command = %w.name, pid = w.pid, error = %e, "failed waiting for keepAlive process");
            ProcessExit { code: None }
        }
    };

    // The monitor hears first, so a tick never sees the entry vanish from
    // the registry while it still looks alive.
    w.sup.monitor.notify_exited(&w.name, w.pid, exit.code);
    w.sup.registry.remove_if_pid(&w.name, w.pid);
    if let Err(e) = w.sup.tracker.remove_process(w.pid) {
        warn!(command = %w.name, pid = w.pid, error = %e, "failed to remove exited process from tracker");
    }
    w.reporter.on_process_status(
        &w.name,
        w.pid,
        &ProcessStatusUpdate::Exited { exit_code: exit.code },
    );

    match exit.code {
        Some(0) => info!(command = %w.name, pid = w.pid, exit_code = 0, "keepAlive process exited"),
        Some(code) => warn!(command = %w.name, pid = w.pid, exit_code = code, "keepAlive process exited with failure"),
        None => info!(command = %w.name, pid = w.pid, "keepAlive process terminated by signal"),
    }

    w.exit_tx.send_replace(Some(exit));

    join_readers(&w.name, w.readers, &w.stop_streams, OUTPUT_DRAIN).await;
    debug!(command = %w.name, pid = w.pid, "keepAlive watcher finished");
}

