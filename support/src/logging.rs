//! Logger construction. Every binary calls [`init`] once at startup and threads the resulting
//! [`Logger`] through constructors (`Runtime::new`, `SecureListener::new`, ...), each of which
//! takes a child logger via `log.new(o!("component" => "..."))`.

use serde::{Deserialize, Serialize};
use slog::Logger;
use sloggers::types::Severity;
use sloggers::Build;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogDestination {
    Stderr,
    Stdout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub destination: LogDestination,
}

impl Default for LogDestination {
    fn default() -> Self {
        LogDestination::Stderr
    }
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_level(),
            destination: LogDestination::Stderr,
        }
    }
}

/// Builds the root logger for a process. Falls back to a conservative terminal logger if the
/// configured level string cannot be parsed.
pub fn init(config: &LoggingConfig) -> Logger {
    let severity = config.level.parse::<Severity>().unwrap_or(Severity::Info);

    let mut builder = sloggers::terminal::TerminalLoggerBuilder::new();
    builder.level(severity);
    builder.destination(match config.destination {
        LogDestination::Stderr => sloggers::terminal::Destination::Stderr,
        LogDestination::Stdout => sloggers::terminal::Destination::Stdout,
    });

    builder
        .build()
        .unwrap_or_else(|_| Logger::root(slog::Discard, slog::o!()))
}

/// A logger that discards everything, used as a default in tests and library constructors that
/// are not given an explicit logger.
pub fn discard() -> Logger {
    Logger::root(slog::Discard, slog::o!())
}
