//! Logging setup shared by the Cadence binaries
//!
//! `cadence-server` initializes from `CADENCE_LOG_FORMAT` and
//! `CADENCE_LOG_LEVEL` via [`init_default`]; `cadence-queue` builds a
//! [`LoggingConfig`] from its `--verbose` flag. Everything goes to
//! stderr so command output stays pipeable.

use std::str::FromStr;

use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Plain text, one event per line
    Text,
    /// One JSON object per line, for collectors
    Json,
    /// Multi-line colored output for development
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            _ => Err(format!(
                "Invalid log format: '{}'. Valid options: text, json, pretty",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
            LogFormat::Pretty => "pretty",
        };
        write!(f, "{}", name)
    }
}

pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: String,
    /// Overrides `level` with `debug` when set.
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

    fn fallback_level(&self) -> &str {
        if self.verbose {
            "debug"
        } else {
            &self.level
        }
    }

    // RUST_LOG wins over the configured level when set.
    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.fallback_level()))
    }

    /// Install the global subscriber. Call once, at startup.
    ///
    /// # Panics
    ///
    /// Panics if a subscriber is already installed.
    pub fn init(&self) {
        let base = tracing_subscriber::fmt()
            .with_env_filter(self.filter())
            .with_writer(std::io::stderr);

        match self.format {
            LogFormat::Json => base
                .json()
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .init(),
            LogFormat::Pretty => base.pretty().with_target(true).init(),
            LogFormat::Text => base.with_target(false).init(),
        }
    }
}

/// Initialize from `CADENCE_LOG_FORMAT` and `CADENCE_LOG_LEVEL`,
/// defaulting to text at info level.
pub fn init_default() {
    let format = std::env::var("CADENCE_LOG_FORMAT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(LogFormat::Text);

    let level = std::env::var("CADENCE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    LoggingConfig::new(format, level, false).init();
}
