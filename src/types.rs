use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// How a command is executed.
///
/// - `Once`: run to completion before the queue advances.
/// - `KeepAlive`: start in the background and advance immediately; the
///   process stays supervised until it exits or is stopped.
/// - `Unsupported`: the raw mode string from the config did not name a known
///   mode. Loading still succeeds; the executor rejects the command when it
///   reaches it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExecutionMode {
    Once,
    KeepAlive,
    Unsupported(String),
}

impl ExecutionMode {
    pub fn as_str(&self) -> &str {
        match self {
            ExecutionMode::Once => "once",
            ExecutionMode::KeepAlive => "keepAlive",
            ExecutionMode::Unsupported(raw) => raw,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, ExecutionMode::Unsupported(_))
    }
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Once
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "once" => Ok(ExecutionMode::Once),
            "keepalive" | "keep_alive" | "keep-alive" => Ok(ExecutionMode::KeepAlive),
            other => Err(format!(
                "invalid mode: {other} (expected \"once\" or \"keepAlive\")"
            )),
        }
    }
}

impl From<&str> for ExecutionMode {
    fn from(s: &str) -> Self {
        s.parse()
            .unwrap_or_else(|_| ExecutionMode::Unsupported(s.to_string()))
    }
}

impl Serialize for ExecutionMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ExecutionMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(ExecutionMode::from(raw.as_str()))
    }
}
