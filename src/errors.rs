// src/errors.rs

//! Crate-wide error types.
//!
//! - [`ErrorKind`] is the failure taxonomy reported for a single command.
//! - [`ExecError`] carries that kind plus the context a user needs to act on
//!   it (command line, exit code, captured stderr, working directory).
//! - [`RunqError`] is the crate-level error returned by config loading and by
//!   the sequential executor.

use std::fmt;
use std::io;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Category of a command failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    CommandNotFound,
    PermissionDenied,
    NonZeroExit,
    Timeout,
    ContextCancelled,
    /// A keepAlive process could not be started. Failures after a successful
    /// start are only visible through health events.
    StartupFailure,
    SystemError,
    UnsupportedMode,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::CommandNotFound => "command not found",
            ErrorKind::PermissionDenied => "permission denied",
            ErrorKind::NonZeroExit => "non-zero exit",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ContextCancelled => "cancelled",
            ErrorKind::StartupFailure => "startup failure",
            ErrorKind::SystemError => "system error",
            ErrorKind::UnsupportedMode => "unsupported mode",
        }
    }

    /// Classify an error returned while spawning a Once command.
    pub fn from_spawn_error(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => ErrorKind::CommandNotFound,
            io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            _ => ErrorKind::SystemError,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured failure detail attached to an `ExecutionResult`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{kind}: {message}")]
pub struct ExecError {
    pub kind: ErrorKind,
    /// Rendered command line (`program arg1 arg2`).
    pub command: String,
    pub message: String,
    pub exit_code: Option<i32>,
    pub stderr: Option<String>,
    pub work_dir: Option<PathBuf>,
}

impl ExecError {
    pub fn new(kind: ErrorKind, command: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            command: command.into(),
            message: message.into(),
            exit_code: None,
            stderr: None,
            work_dir: None,
        }
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    /// Attach captured stderr; blank output is ignored.
    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        let stderr = stderr.into();
        if !stderr.trim().is_empty() {
            self.stderr = Some(stderr);
        }
        self
    }

    pub fn with_work_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.work_dir = dir;
        self
    }

    /// Multi-line description for terminal output.
    pub fn details(&self) -> String {
        let mut out = format!("{} (`{}`)", self, self.command);
        if let Some(code) = self.exit_code {
            out.push_str(&format!("\n  exit code: {code}"));
        }
        if let Some(dir) = &self.work_dir {
            out.push_str(&format!("\n  working dir: {}", dir.display()));
        }
        if let Some(stderr) = &self.stderr {
            out.push_str("\n  stderr:");
            for line in stderr.lines() {
                out.push_str("\n    ");
                out.push_str(line);
            }
        }
        out
    }
}

#[derive(Error, Debug)]
pub enum RunqError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("command {index}/{total} '{name}' failed ({}): {}", .source.kind, .source.message)]
    CommandFailed {
        /// 1-based position in the command list.
        index: usize,
        total: usize,
        name: String,
        #[source]
        source: ExecError,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RunqError {
    /// Failure category, when this error came from a command.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            RunqError::CommandFailed { source, .. } => Some(source.kind),
            _ => None,
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, RunqError>;
