//! `tracing-subscriber` setup for the binary and for tests.
//!
//! The library itself only emits events; installing a subscriber is left to
//! the application. Output goes to stderr so command results on stdout stay
//! machine-readable.

use crate::config::{LogFormat, LoggingConfig};
use thiserror::Error;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter \"{filter}\": {message}")]
    InvalidFilter { filter: String, message: String },

    #[error("failed to initialize tracing: {0}")]
    Init(String),
}

/// Subscriber options.
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Filter directive used when `RUST_LOG` is unset, e.g. "info" or "lambda_link=debug".
    pub filter: String,
    pub format: LogFormat,
    /// Emit span open/close events (shows per-command timing).
    pub with_span_events: bool,
    pub with_ansi: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Pretty,
            with_span_events: false,
            with_ansi: true,
        }
    }
}

impl From<&LoggingConfig> for LogOptions {
    fn from(config: &LoggingConfig) -> Self {
        Self {
            filter: config.level.clone(),
            format: config.format,
            ..Self::default()
        }
    }
}

impl LogOptions {
    /// Raise the default filter to at least debug (`-v`) or trace (`-vv`).
    pub fn with_verbosity(mut self, verbose: u8) -> Self {
        match verbose {
            0 => {}
            1 => self.filter = "debug".to_string(),
            _ => self.filter = "trace".to_string(),
        }
        self
    }
}

/// Build the filter: `RUST_LOG` wins, otherwise `default`.
pub fn env_filter(default: &str) -> Result<EnvFilter, LoggingError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default).map_err(|e| LoggingError::InvalidFilter {
            filter: default.to_string(),
            message: e.to_string(),
        }),
    }
}

/// Install the global subscriber.
///
/// Calling this more than once is not an error; the first subscriber stays.
pub fn init(options: &LogOptions) -> Result<(), LoggingError> {
    let filter = env_filter(&options.filter)?;
    let span_events = if options.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = match options.format {
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_writer(std::io::stderr)
            .with_span_events(span_events)
            .with_ansi(options.with_ansi)
            .with_filter(filter)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_span_events(span_events)
            .with_ansi(false)
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_span_events(span_events)
            .with_filter(filter)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .or_else(|e| {
            if e.to_string().contains("global default trace dispatcher has already been set") {
                Ok(())
            } else {
                Err(LoggingError::Init(e.to_string()))
            }
        })
}
