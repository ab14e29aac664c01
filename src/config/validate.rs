// src/config/validate.rs

use std::collections::HashSet;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{Result, RunqError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = RunqError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.work_dir, raw.commands))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_commands(cfg)?;
    validate_names(cfg)?;
    validate_commands(cfg)?;
    Ok(())
}

fn ensure_has_commands(cfg: &RawConfigFile) -> Result<()> {
    if cfg.commands.is_empty() {
        return Err(RunqError::ConfigError(
            "config must contain at least one entry in `commands`".to_string(),
        ));
    }
    Ok(())
}

fn validate_names(cfg: &RawConfigFile) -> Result<()> {
    let mut seen = HashSet::new();
    for (idx, cmd) in cfg.commands.iter().enumerate() {
        if cmd.name.trim().is_empty() {
            return Err(RunqError::ConfigError(format!(
                "command #{} has an empty `name`",
                idx + 1
            )));
        }
        if !seen.insert(cmd.name.as_str()) {
            return Err(RunqError::ConfigError(format!(
                "duplicate command name '{}'",
                cmd.name
            )));
        }
    }
    Ok(())
}

fn validate_commands(cfg: &RawConfigFile) -> Result<()> {
    for cmd in cfg.commands.iter() {
        if cmd.command.trim().is_empty() {
            return Err(RunqError::ConfigError(format!(
                "command '{}' has an empty `command`",
                cmd.name
            )));
        }
        if cmd.timeout_secs == Some(0) {
            return Err(RunqError::ConfigError(format!(
                "command '{}' has `timeoutSecs` = 0; omit it or use a positive value",
                cmd.name
            )));
        }
    }
    Ok(())
}
