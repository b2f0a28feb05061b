//! Logging configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::Level;

/// Log output format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// Log severity level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn as_tracing_level(&self) -> Level {
        match self {
            Self::Trace => Level::TRACE,
            Self::Debug => Level::DEBUG,
            Self::Info => Level::INFO,
            Self::Warn => Level::WARN,
            Self::Error => Level::ERROR,
        }
    }

    /// Raise the level by `verbosity` steps (`-v` flags), never lowering it
    pub fn raised_by(&self, verbosity: u8) -> LogLevel {
        let base = match self {
            Self::Error => 0,
            Self::Warn => 1,
            Self::Info => 2,
            Self::Debug => 3,
            Self::Trace => 4,
        };
        match base + verbosity.min(4) {
            0 => Self::Error,
            1 => Self::Warn,
            2 => Self::Info,
            3 => Self::Debug,
            _ => Self::Trace,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            level: LogLevel::Info,
        }
    }
}

impl LoggingConfig {
    /// Install the global tracing subscriber.
    ///
    /// `verbosity` is the number of `-v` flags given on the command line.
    pub fn init(&self, verbosity: u8) -> anyhow::Result<()> {
        let level = self.level.raised_by(verbosity).as_tracing_level();
        let builder = tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(false);

        match self.format {
            LogFormat::Text => tracing::subscriber::set_global_default(builder.finish())?,
            LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_raises_level() {
        assert_eq!(LogLevel::Info.raised_by(0), LogLevel::Info);
        assert_eq!(LogLevel::Info.raised_by(1), LogLevel::Debug);
        assert_eq!(LogLevel::Info.raised_by(5), LogLevel::Trace);
        assert_eq!(LogLevel::Warn.raised_by(1), LogLevel::Info);
    }

    #[test]
    fn logging_config_from_toml() {
        let cfg: LoggingConfig = toml::from_str("format = \"json\"").unwrap();
        assert_eq!(cfg.format, LogFormat::Json);
        assert_eq!(cfg.level, LogLevel::Info);
    }
}
