// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Command-line arguments for `runq`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "runq",
    version,
    about = "Run a queue of commands, once or kept alive in the background.",
    long_about = None
)]
pub struct CliArgs {
    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `RUNQ_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Process tracker file. Defaults to `runq-processes.json` in the OS
    /// temp directory.
    #[arg(long, global = true, value_name = "PATH")]
    pub tracker_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Execute the command list from a config file.
    Run(RunArgs),
    /// List tracked keepAlive processes, dropping the ones that are gone.
    Status,
    /// Terminate tracked keepAlive processes.
    Kill(KillArgs),
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Path to the config file (JSON).
    #[arg(long, value_name = "PATH", default_value = "runq.json")]
    pub config: PathBuf,

    /// Stream command output to stdout as it is produced.
    #[arg(short, long)]
    pub verbose: bool,

    /// Exit after the list completes, leaving keepAlive processes running.
    #[arg(long)]
    pub detach: bool,

    /// Health check interval while supervising keepAlive processes.
    #[arg(long, value_name = "MS", default_value_t = 1000)]
    pub health_interval_ms: u64,
}

#[derive(Debug, Clone, Args)]
pub struct KillArgs {
    /// Only the process started under this command name.
    #[arg(long, value_name = "NAME", conflicts_with = "pid")]
    pub name: Option<String>,

    /// Only the process with this PID.
    #[arg(long, value_name = "PID")]
    pub pid: Option<u32>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_defaults() {
        let args = CliArgs::try_parse_from(["runq", "run"]).unwrap();
        let Command::Run(run) = args.command else {
            panic!("expected run subcommand");
        };
        assert_eq!(run.config, PathBuf::from("runq.json"));
        assert!(!run.verbose);
        assert!(!run.detach);
        assert_eq!(run.health_interval_ms, 1000);
    }

    #[test]
    fn global_flags_are_accepted_after_the_subcommand() {
        let args = CliArgs::try_parse_from([
            "runq",
            "status",
            "--tracker-file",
            "/tmp/t.json",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert!(matches!(args.command, Command::Status));
        assert_eq!(args.tracker_file, Some(PathBuf::from("/tmp/t.json")));
        assert!(matches!(args.log_level, Some(LogLevel::Debug)));
    }

    #[test]
    fn kill_name_and_pid_conflict() {
        assert!(CliArgs::try_parse_from(["runq", "kill", "--name", "a", "--pid", "1"]).is_err());
        let args = CliArgs::try_parse_from(["runq", "kill", "--pid", "42"]).unwrap();
        let Command::Kill(kill) = args.command else {
            panic!("expected kill subcommand");
        };
        assert_eq!(kill.pid, Some(42));
    }
}
