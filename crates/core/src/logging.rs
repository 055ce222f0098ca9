use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;

/// Severity of a progress record. Ordered from least to most severe.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One progress or diagnostic line emitted by a pipeline service.
///
/// `stage` carries the artifact name the record relates to, when there is one.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LogRecord {
    pub level: LogLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    pub message: String,
}

impl LogRecord {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            stage: None,
            message: message.into(),
        }
    }

    pub fn for_stage(level: LogLevel, stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage: Some(stage.into()),
            ..Self::new(level, message)
        }
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.level)?;
        if let Some(stage) = &self.stage {
            write!(f, "[{stage}]")?;
        }
        write!(f, " {}", self.message)
    }
}

pub trait LogSink: Send + Sync {
    fn log(&self, record: LogRecord);
}

#[derive(Default)]
pub struct NullLogSink;

impl LogSink for NullLogSink {
    fn log(&self, _record: LogRecord) {}
}

/// Keeps every record in memory.
#[derive(Default)]
pub struct VecLogSink {
    records: Mutex<Vec<LogRecord>>,
}

impl VecLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn messages_at(&self, level: LogLevel) -> Vec<String> {
        self.records()
            .into_iter()
            .filter_map(|record| (record.level == level).then_some(record.message))
            .collect()
    }
}

impl LogSink for VecLogSink {
    fn log(&self, record: LogRecord) {
        if let Ok(mut guard) = self.records.lock() {
            guard.push(record);
        }
    }
}

/// Terminal sink. Records below the threshold are dropped; warnings and
/// errors go to stderr so they survive redirecting the book output.
#[derive(Clone)]
pub struct StdoutLogSink {
    threshold: LogLevel,
}

impl Default for StdoutLogSink {
    fn default() -> Self {
        Self {
            threshold: LogLevel::Info,
        }
    }
}

impl StdoutLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.threshold = if verbose {
            LogLevel::Debug
        } else {
            LogLevel::Info
        };
        self
    }

    pub fn shows(&self, level: LogLevel) -> bool {
        level >= self.threshold
    }
}

impl LogSink for StdoutLogSink {
    fn log(&self, record: LogRecord) {
        if !self.shows(record.level) {
            return;
        }
        if record.level >= LogLevel::Warn {
            eprintln!("{record}");
        } else {
            println!("{record}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_stage_when_present() {
        let record = LogRecord::for_stage(LogLevel::Info, "premise", "generated");
        assert_eq!(record.to_string(), "[INFO][premise] generated");

        let plain = LogRecord::new(LogLevel::Warn, "careful");
        assert_eq!(plain.to_string(), "[WARN] careful");
    }

    #[test]
    fn vec_sink_filters_by_level() {
        let sink = VecLogSink::new();
        sink.log(LogRecord::new(LogLevel::Info, "one"));
        sink.log(LogRecord::new(LogLevel::Warn, "two"));
        sink.log(LogRecord::new(LogLevel::Info, "three"));

        assert_eq!(sink.records().len(), 3);
        assert_eq!(sink.messages_at(LogLevel::Info), vec!["one", "three"]);
    }

    #[test]
    fn stdout_sink_hides_debug_unless_verbose() {
        let quiet = StdoutLogSink::new();
        assert!(!quiet.shows(LogLevel::Debug));
        assert!(quiet.shows(LogLevel::Info));
        assert!(quiet.shows(LogLevel::Error));

        assert!(StdoutLogSink::new().verbose(true).shows(LogLevel::Debug));
    }
}
