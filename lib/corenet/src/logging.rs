//! Structured logging setup. Every other component takes a `Logger` (or derives a child of
//! one via `log.new(o!(...))`) instead of reaching for a global — see `init` for the one
//! place a root logger actually gets constructed.

pub use slog::{crit, debug, error, info, o, trace, warn, Discard, Drain, Logger};

use serde_derive::{Deserialize, Serialize};
use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;
use std::path::PathBuf;

/// On-disk (or inline, in the server/client config file) shape of the logging config.
/// Deliberately narrower than `sloggers::LoggerConfig`: this repo only ever needs a
/// terminal sink or a file sink, selected by `destination`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub destination: LogDestination,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl From<LogLevel> for Severity {
    fn from(level: LogLevel) -> Severity {
        match level {
            LogLevel::Trace => Severity::Trace,
            LogLevel::Debug => Severity::Debug,
            LogLevel::Info => Severity::Info,
            LogLevel::Warning => Severity::Warning,
            LogLevel::Error => Severity::Error,
            LogLevel::Critical => Severity::Critical,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum LogDestination {
    Stdout,
    Stderr,
    File { path: PathBuf },
}

impl Default for LoggingConfig {
    fn default() -> LoggingConfig {
        LoggingConfig {
            level: LogLevel::Info,
            destination: LogDestination::Stderr,
        }
    }
}

/// Builds the process-wide root logger. Every subsystem logger passed around the codebase
/// is a child of whatever this returns; there is no implicit global logger to fall back on.
pub fn init(config: &LoggingConfig) -> Logger {
    match &config.destination {
        LogDestination::Stdout | LogDestination::Stderr => {
            let mut builder = TerminalLoggerBuilder::new();
            builder.level(config.level.into());
            builder.destination(match config.destination {
                LogDestination::Stdout => Destination::Stdout,
                _ => Destination::Stderr,
            });

            builder
                .build()
                .unwrap_or_else(|err| panic!("failed to build terminal logger: {}", err))
        }
        LogDestination::File { path } => {
            use sloggers::file::FileLoggerBuilder;

            let mut builder = FileLoggerBuilder::new(path);
            builder.level(config.level.into());

            builder
                .build()
                .unwrap_or_else(|err| panic!("failed to build file logger at {:?}: {}", path, err))
        }
    }
}

/// A logger that discards everything, for tests and defaults that don't care to observe logs.
pub fn discard() -> Logger {
    Logger::root(Discard, o!())
}
