// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod monitor;
pub mod platform;
pub mod report;
pub mod tracker;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cli::{CliArgs, Command, KillArgs, RunArgs};
use crate::config::load_and_validate;
use crate::engine::SequentialExecutor;
use crate::exec::terminate::PidPoll;
use crate::exec::{ExecContext, RealExecutorBackend, Terminator};
use crate::monitor::HealthMonitorConfig;
use crate::report::{LogReporter, Reporter};
use crate::tracker::{ProcessInfo, ProcessTracker, default_tracker_path};

/// How often `runq run` checks whether any keepAlive process is left.
const SUPERVISE_POLL: Duration = Duration::from_millis(500);

/// High-level entry point used by `main.rs`.
pub async fn run(args: CliArgs) -> Result<()> {
    let tracker_path = args
        .tracker_file
        .clone()
        .unwrap_or_else(default_tracker_path);

    match args.command {
        Command::Run(run_args) => run_queue(run_args, tracker_path).await,
        Command::Status => show_status(&tracker_path),
        Command::Kill(kill_args) => kill_tracked(kill_args, &tracker_path).await,
    }
}

/// `runq run`: execute the list, then supervise what is left running.
///
/// This wires together:
/// - config loading
/// - tracker + backend + sequential executor
/// - Ctrl-C handling
/// - health monitoring while keepAlive processes remain
async fn run_queue(args: RunArgs, tracker_path: PathBuf) -> Result<()> {
    let cfg = load_and_validate(&args.config)
        .with_context(|| format!("loading config from {}", args.config.display()))?;

    let tracker = Arc::new(ProcessTracker::open(&tracker_path)?);
    let stale = tracker.cleanup_dead_processes()?;
    if !stale.is_empty() {
        debug!(count = stale.len(), "dropped stale tracker entries");
    }

    let reporter: Arc<dyn Reporter> = Arc::new(LogReporter);
    let ctx = ExecContext::new(reporter.clone())
        .with_work_dir(cfg.work_dir.clone())
        .verbose(args.verbose);
    let health = HealthMonitorConfig {
        interval: Duration::from_millis(args.health_interval_ms.max(10)),
        ..HealthMonitorConfig::default()
    };
    let backend = RealExecutorBackend::with_health_config(ctx, tracker, health);
    let executor = SequentialExecutor::new(backend, reporter);

    // Ctrl-C → cancel the in-flight command; keepAlive processes are
    // stopped below once `execute` returns.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            info!("interrupt received; shutting down");
            cancel.cancel();
        });
    }

    if let Err(err) = executor.execute(&cfg.commands, &cancel).await {
        if cancel.is_cancelled() {
            executor.stop().await;
        } else if executor.has_active_keep_alive_processes() {
            info!(
                tracker = %tracker_path.display(),
                "keepAlive processes started before the failure are still running; use `runq kill` to stop them"
            );
        }
        return Err(err.into());
    }

    if !executor.has_active_keep_alive_processes() {
        return Ok(());
    }

    if args.detach {
        println!("detached; still running:");
        print_processes(&executor.get_tracked_processes());
        return Ok(());
    }

    supervise(&executor, &cancel).await;
    Ok(())
}

/// Monitor keepAlive processes until Ctrl-C or until all of them exit, then
/// stop whatever is left.
async fn supervise(executor: &SequentialExecutor<RealExecutorBackend>, cancel: &CancellationToken) {
    executor.start_health_monitoring();

    let drain = executor.health_events().map(|mut rx| {
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                debug!(command = %event.name, kind = %event.kind, "health event");
            }
        })
    });

    info!("supervising keepAlive processes; press Ctrl-C to stop");

    let mut poll = interval(SUPERVISE_POLL);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = poll.tick() => {
                if !executor.has_active_keep_alive_processes() {
                    info!("all keepAlive processes have exited");
                    break;
                }
            }
        }
    }

    executor.stop_health_monitoring().await;
    executor.stop().await;
    if let Some(handle) = drain {
        handle.abort();
    }

    info!(summary = %executor.get_health_summary(), "supervision finished");
}

/// `runq status`.
fn show_status(tracker_path: &Path) -> Result<()> {
    let tracker = ProcessTracker::open(tracker_path)?;
    let removed = tracker.cleanup_dead_processes()?;
    if !removed.is_empty() {
        info!(count = removed.len(), "removed dead processes from tracker");
    }

    let processes = tracker.get_all_processes();
    if processes.is_empty() {
        println!("no tracked processes");
        return Ok(());
    }
    print_processes(&processes);
    Ok(())
}

/// `runq kill`: terminate tracked processes from any invocation.
async fn kill_tracked(args: KillArgs, tracker_path: &Path) -> Result<()> {
    let tracker = Arc::new(ProcessTracker::open(tracker_path)?);
    tracker.cleanup_dead_processes()?;

    let targets: Vec<ProcessInfo> = tracker
        .get_all_processes()
        .into_values()
        .filter(|p| args.name.as_ref().is_none_or(|name| &p.name == name))
        .filter(|p| args.pid.is_none_or(|pid| p.pid == pid))
        .collect();

    if targets.is_empty() {
        if args.name.is_some() || args.pid.is_some() {
            bail!("no tracked process matches the given name or PID");
        }
        println!("no tracked processes");
        return Ok(());
    }

    let control = platform::native();
    let terminator = Terminator::new(control.clone());

    let mut set = JoinSet::new();
    for info in targets {
        let terminator = terminator.clone();
        let control = control.clone();
        set.spawn(async move {
            let mut probe = PidPoll::new(info.pid, control);
            let outcome = terminator.terminate(info.pid, &info.name, &mut probe).await;
            (info, outcome)
        });
    }

    let mut unresponsive = 0;
    while let Some(joined) = set.join_next().await {
        let (info, outcome) = joined.context("termination task failed")?;
        if outcome.terminated() {
            if let Err(e) = tracker.remove_process(info.pid) {
                warn!(pid = info.pid, error = %e, "failed to remove process from tracker");
            }
            println!("stopped {} (PID {}): {outcome}", info.name, info.pid);
        } else {
            unresponsive += 1;
            println!("could not stop {} (PID {})", info.name, info.pid);
        }
    }

    if unresponsive > 0 {
        bail!("{unresponsive} process(es) could not be stopped");
    }
    Ok(())
}

fn print_processes(processes: &std::collections::BTreeMap<u32, ProcessInfo>) {
    println!("{:<8} {:<20} {:<20} COMMAND", "PID", "NAME", "STARTED");
    for info in processes.values() {
        println!(
            "{:<8} {:<20} {:<20} {}",
            info.pid,
            info.name,
            info.start_time.format("%Y-%m-%d %H:%M:%S"),
            info.command_line()
        );
    }
}
