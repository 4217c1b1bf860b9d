use std::fmt;
use std::io::Write;

use chrono::Local;
use log::{LevelFilter, Record, SetLoggerError};
use serde::Serialize;

/// One formatted log line
#[derive(Debug, Serialize, Clone)]
pub struct LogMessage {
    level: String,
    message: String,
    timestamp: String,
}

impl LogMessage {
    pub fn from_record(record: &Record) -> Self {
        Self {
            level: record.level().to_string(),
            message: record.args().to_string(),
            timestamp: Local::now().to_rfc3339(),
        }
    }
}

impl fmt::Display for LogMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}", self.timestamp, self.level, self.message)
    }
}

/// Installs the stderr logger. `RUST_LOG` overrides `default_level`.
pub fn init(default_level: LevelFilter) -> Result<(), SetLoggerError> {
    env_logger::Builder::new()
        .filter_level(default_level)
        .parse_default_env()
        .format(|buf, record| writeln!(buf, "{}", LogMessage::from_record(record)))
        .try_init()
}
