//! Ordered, append-only record of a verification run
//!
//! Entries are diagnostic only. Each one is also forwarded to the `log`
//! facade so a binary can surface them with its logger of choice.

use std::fmt;

use serde::Serialize;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Transparency,
    Hardware,
    Comparison,
    Orchestrator,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Transparency => "transparency",
            Stage::Hardware => "hardware",
            Stage::Comparison => "comparison",
            Stage::Orchestrator => "orchestrator",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<Level> for log::Level {
    fn from(level: Level) -> Self {
        match level {
            Level::Debug => log::Level::Debug,
            Level::Info => log::Level::Info,
            Level::Warn => log::Level::Warn,
            Level::Error => log::Level::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventLogEntry {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub stage: Stage,
    pub level: Level,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct EventLog {
    entries: Vec<EventLogEntry>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, stage: Stage, level: Level, message: impl Into<String>) {
        let message = message.into();
        log::log!(log::Level::from(level), "[{}] {}", stage, message);
        self.entries.push(EventLogEntry {
            timestamp: OffsetDateTime::now_utc(),
            stage,
            level,
            message,
        });
    }

    pub fn info(&mut self, stage: Stage, message: impl Into<String>) {
        self.record(stage, Level::Info, message);
    }

    pub fn error(&mut self, stage: Stage, message: impl Into<String>) {
        self.record(stage, Level::Error, message);
    }

    pub fn entries(&self) -> &[EventLogEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<EventLogEntry> {
        self.entries
    }
}
