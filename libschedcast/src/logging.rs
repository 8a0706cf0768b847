//! Tracing subscriber for the Schedcast binaries
//!
//! Everything is written to stderr so stdout stays free for command output.
//! `RUST_LOG` wins over the configured level when it is set.
//!
//! ```no_run
//! use libschedcast::logging::{LogFormat, LoggingConfig};
//!
//! LoggingConfig::new(LogFormat::Json, "info".to_string(), false).init();
//! ```

use std::str::FromStr;
use tracing_subscriber::EnvFilter;

pub const FORMAT_ENV: &str = "SCHEDCAST_LOG_FORMAT";
pub const LEVEL_ENV: &str = "SCHEDCAST_LOG_LEVEL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    /// Flattened events, one object per line
    Json,
    Pretty,
}

impl LogFormat {
    pub const ALL: [LogFormat; 3] = [LogFormat::Text, LogFormat::Json, LogFormat::Pretty];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
            LogFormat::Pretty => "pretty",
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|format| format.as_str() == wanted)
            .ok_or_else(|| format!("Unknown log format '{}' (expected text, json or pretty)", s))
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: String,
    /// Raises the fallback level to `debug`
    pub verbose: bool,
}

impl LoggingConfig {
    pub fn new(format: LogFormat, level: String, verbose: bool) -> Self {
        Self {
            format,
            level,
            verbose,
        }
    }

    /// Read [`FORMAT_ENV`] and [`LEVEL_ENV`]. An unparseable format falls
    /// back to text with a note on stderr.
    pub fn from_env(verbose: bool) -> Self {
        let format = match std::env::var(FORMAT_ENV) {
            Ok(raw) => raw.parse().unwrap_or_else(|e| {
                eprintln!("schedcast: {}, using text", e);
                LogFormat::Text
            }),
            Err(_) => LogFormat::Text,
        };
        let level = std::env::var(LEVEL_ENV).unwrap_or_else(|_| "info".to_string());
        Self::new(format, level, verbose)
    }

    /// Directive used when `RUST_LOG` is absent
    pub fn fallback_directive(&self) -> &str {
        if self.verbose {
            "debug"
        } else {
            self.level.as_str()
        }
    }

    /// Install the global subscriber. Later calls leave the first one in
    /// place.
    pub fn init(&self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.fallback_directive()));
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr);

        let installed = match self.format {
            LogFormat::Text => builder.with_target(false).try_init(),
            LogFormat::Json => builder
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .try_init(),
            LogFormat::Pretty => builder.pretty().with_line_number(true).try_init(),
        };

        if let Err(e) = installed {
            eprintln!("schedcast: keeping existing subscriber ({})", e);
        }
    }
}

/// [`LoggingConfig::from_env`] followed by [`LoggingConfig::init`].
pub fn init_default(verbose: bool) {
    LoggingConfig::from_env(verbose).init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_format_names() {
        for format in LogFormat::ALL {
            assert_eq!(format.as_str().parse::<LogFormat>().unwrap(), format);
        }
        assert_eq!(" JSON ".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().unwrap_err().contains("'xml'"));
    }

    #[test]
    fn test_verbose_overrides_level() {
        let quiet = LoggingConfig::new(LogFormat::Text, "warn".to_string(), false);
        assert_eq!(quiet.fallback_directive(), "warn");
        let loud = LoggingConfig::new(LogFormat::Text, "warn".to_string(), true);
        assert_eq!(loud.fallback_directive(), "debug");
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var(FORMAT_ENV, "pretty");
        std::env::set_var(LEVEL_ENV, "libschedcast=trace");
        let config = LoggingConfig::from_env(false);
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.level, "libschedcast=trace");

        std::env::set_var(FORMAT_ENV, "yaml");
        std::env::remove_var(LEVEL_ENV);
        let config = LoggingConfig::from_env(false);
        assert_eq!(config.format, LogFormat::Text);
        assert_eq!(config.level, "info");

        std::env::remove_var(FORMAT_ENV);
    }
}
