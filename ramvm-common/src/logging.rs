//! Logging initialization using tracing.

use std::str::FromStr;

use anyhow::{bail, Result};
use tracing_subscriber::{
    fmt::{self, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable, one event per line
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => bail!("Unknown log format '{}' (expected pretty or json)", other),
        }
    }
}

/// Build the level filter. `RUST_LOG` wins over the configured level.
fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_ascii_lowercase()))
}

/// Initialize the tracing subscriber with the specified log level.
///
/// # Arguments
/// * `level` - Log level string (trace, debug, info, warn, error)
///
/// # Example
/// ```
/// ramvm_common::init_logging("info").unwrap();
/// ```
pub fn init_logging(level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::registry()
        .with(env_filter(level))
        .with(
            fmt::layer()
                .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
                .with_target(false)
                .with_writer(std::io::stderr),
        );

    subscriber.try_init()?;

    Ok(())
}

/// Initialize logging with JSON output format.
/// Suitable for CI runs where logs are collected and searched.
pub fn init_logging_json(level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::registry()
        .with(env_filter(level))
        .with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_writer(std::io::stderr),
        );

    subscriber.try_init()?;

    Ok(())
}
