//! Logging initialization
//!
//! Installs a global `tracing` subscriber filtered by `RUST_LOG` (default
//! `info`) with either a compact or a JSON formatter. [`LogConfig::from_env`]
//! reads the formatter from `STRATUS_LOG_FORMAT`.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::{Error, Result};

/// Output format of log lines
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable single line per event
    #[default]
    Compact,
    /// One JSON object per event
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "compact" | "text" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(Error::validation(format!("unknown log format {:?}", other))),
        }
    }
}

/// Logging configuration
#[derive(Clone, Debug)]
pub struct LogConfig {
    /// Formatter to use
    pub format: LogFormat,
    /// Filter directive used when `RUST_LOG` is unset
    pub default_directive: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            default_directive: "info".to_string(),
        }
    }
}

impl LogConfig {
    /// Defaults with the format taken from `STRATUS_LOG_FORMAT` when set
    pub fn from_env() -> Result<Self> {
        Self::default().with_format_override(std::env::var("STRATUS_LOG_FORMAT").ok())
    }

    fn with_format_override(mut self, format: Option<String>) -> Result<Self> {
        if let Some(format) = format {
            self.format = format.parse()?;
        }
        Ok(self)
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_directive))
    }
}

/// Install the global subscriber
///
/// Fails if a subscriber is already installed.
pub fn init_logging(config: LogConfig) -> Result<()> {
    let registry = tracing_subscriber::registry().with(config.filter());

    let result = match config.format {
        LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true))
            .try_init(),
    };

    result.map_err(|e| Error::internal_with_context("telemetry", e.to_string()))
}
