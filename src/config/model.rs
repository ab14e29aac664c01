// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::ExecutionMode;

/// One entry of the command list.
///
/// ```json
/// { "name": "api", "command": "./server", "args": ["--port", "8080"],
///   "mode": "keepAlive", "workDir": "services/api",
///   "env": { "RUST_LOG": "debug" } }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandSpec {
    /// Unique name within one run.
    pub name: String,

    /// Executable to run. Not interpreted by a shell.
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub mode: ExecutionMode,

    /// Overrides the executor's default working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,

    /// Applied on top of the inherited parent environment.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Start this command without waiting for the previous one to finish.
    #[serde(default)]
    pub concurrent: bool,

    /// Upper bound on the runtime of a `once` command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl CommandSpec {
    /// `program arg1 arg2`, for logs and error messages.
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.args.join(" "))
        }
    }
}

/// Config file as deserialized, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawConfigFile {
    /// Default working directory for commands without their own `workDir`.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,

    #[serde(default)]
    pub commands: Vec<CommandSpec>,
}

/// Validated configuration. Only constructible through
/// `TryFrom<RawConfigFile>` (see `validate.rs`).
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub work_dir: Option<PathBuf>,
    pub commands: Vec<CommandSpec>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(work_dir: Option<PathBuf>, commands: Vec<CommandSpec>) -> Self {
        Self { work_dir, commands }
    }
}
