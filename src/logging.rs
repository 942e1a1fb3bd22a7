//! Structured logging setup.
//!
//! Thin wrapper over `tracing` and `tracing-subscriber`: level from the
//! application configuration (overridable via `RUST_LOG`), pretty, compact or
//! JSON output, idempotent initialization so tests and the binary can both
//! call it.

use crate::config::Settings;
use crate::error::{ObsError, ObsResult};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter, Layer,
};

/// Output format for log events.
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-oriented multi-line output with colors.
    Pretty,
    /// One line per event, no colors.
    Compact,
    /// JSON for log aggregation.
    Json,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub format: OutputFormat,
    pub with_span_events: bool,
    pub with_file_and_line: bool,
    pub with_ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Compact,
            with_span_events: false,
            with_file_and_line: false,
            with_ansi: true,
        }
    }
}

impl LogConfig {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Level from the application configuration.
    pub fn from_settings(settings: &Settings) -> ObsResult<Self> {
        Ok(Self::new(parse_log_level(&settings.application.log_level)?))
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Initialize logging from the loaded settings.
pub fn init_from_settings(settings: &Settings) -> ObsResult<()> {
    init(LogConfig::from_settings(settings)?)
}

/// Initialize the global subscriber. Safe to call more than once; later
/// calls are no-ops.
pub fn init(config: LogConfig) -> ObsResult<()> {
    // RUST_LOG wins over the configured level.
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    let span_events = if config.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    match config.format {
        OutputFormat::Pretty => {
            let layer = fmt::layer()
                .pretty()
                .with_span_events(span_events)
                .with_file(config.with_file_and_line)
                .with_line_number(config.with_file_and_line)
                .with_ansi(config.with_ansi)
                .with_filter(env_filter);
            tolerate_reinit(tracing_subscriber::registry().with(layer).try_init())
        }
        OutputFormat::Compact => {
            let layer = fmt::layer()
                .compact()
                .with_span_events(span_events)
                .with_file(config.with_file_and_line)
                .with_line_number(config.with_file_and_line)
                .with_ansi(config.with_ansi)
                .with_filter(env_filter);
            tolerate_reinit(tracing_subscriber::registry().with(layer).try_init())
        }
        OutputFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_span_events(span_events)
                .with_file(config.with_file_and_line)
                .with_line_number(config.with_file_and_line)
                .with_filter(env_filter);
            tolerate_reinit(tracing_subscriber::registry().with(layer).try_init())
        }
    }
}

fn tolerate_reinit(result: Result<(), TryInitError>) -> ObsResult<()> {
    match result {
        Ok(()) => Ok(()),
        // Another component (or an earlier test) already installed a
        // subscriber; keep it.
        Err(e) if e.to_string().contains("has already been set") => Ok(()),
        Err(e) => Err(ObsError::Configuration(format!(
            "failed to initialize logging: {e}"
        ))),
    }
}

fn parse_log_level(level: &str) -> ObsResult<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(ObsError::Configuration(format!(
            "invalid log level '{other}', must be one of: trace, debug, info, warn, error"
        ))),
    }
}
