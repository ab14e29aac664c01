#![allow(dead_code)]

use std::path::PathBuf;

use runq::config::{CommandSpec, ConfigFile, RawConfigFile};
use runq::types::ExecutionMode;

/// Builder for `CommandSpec` to simplify test setup.
pub struct CommandSpecBuilder {
    spec: CommandSpec,
}

impl CommandSpecBuilder {
    pub fn new(name: &str, command: &str) -> Self {
        Self {
            spec: CommandSpec {
                name: name.to_string(),
                command: command.to_string(),
                args: vec![],
                mode: ExecutionMode::Once,
                work_dir: None,
                env: Default::default(),
                concurrent: false,
                timeout_secs: None,
            },
        }
    }

    pub fn arg(mut self, arg: &str) -> Self {
        self.spec.args.push(arg.to_string());
        self
    }

    pub fn args(mut self, args: &[&str]) -> Self {
        self.spec.args.extend(args.iter().map(|a| a.to_string()));
        self
    }

    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.spec.mode = mode;
        self
    }

    pub fn keep_alive(self) -> Self {
        self.mode(ExecutionMode::KeepAlive)
    }

    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spec.work_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.spec.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn concurrent(mut self, val: bool) -> Self {
        self.spec.concurrent = val;
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.spec.timeout_secs = Some(secs);
        self
    }

    pub fn build(self) -> CommandSpec {
        self.spec
    }
}

/// `sh -c <script>` run once.
pub fn once(name: &str, script: &str) -> CommandSpec {
    CommandSpecBuilder::new(name, "sh").args(&["-c", script]).build()
}

/// `sh -c <script>` kept alive.
pub fn keep_alive(name: &str, script: &str) -> CommandSpec {
    CommandSpecBuilder::new(name, "sh")
        .args(&["-c", script])
        .keep_alive()
        .build()
}

/// Validated `ConfigFile` from a list of commands.
pub fn config_from(commands: Vec<CommandSpec>) -> ConfigFile {
    ConfigFile::try_from(RawConfigFile {
        work_dir: None,
        commands,
    })
    .expect("Failed to build valid config from commands")
}
