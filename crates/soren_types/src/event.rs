//! Event Records
//!
//! Leveled log and event records published to the platform event channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event type of plain log records
pub const LOG_EVENT: &str = "log";

/// Severity of an event record, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single event as sent on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event: String,
    pub level: LogLevel,
    pub source: String,
    pub message: String,
    /// Unix seconds
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl EventRecord {
    /// Create a log record stamped with the current time
    pub fn log(
        level: LogLevel,
        source: impl Into<String>,
        message: impl Into<String>,
        details: Option<Value>,
    ) -> Self {
        Self::new(LOG_EVENT, level, source, message, details)
    }

    pub fn new(
        event: impl Into<String>,
        level: LogLevel,
        source: impl Into<String>,
        message: impl Into<String>,
        details: Option<Value>,
    ) -> Self {
        Self {
            event: event.into(),
            level,
            source: source.into(),
            message: message.into(),
            timestamp: chrono::Utc::now().timestamp(),
            details,
        }
    }
}
