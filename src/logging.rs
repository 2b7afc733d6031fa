//! Tracing subscriber setup

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{Error, Result};

/// Build the filter for `config`
///
/// `RUST_LOG` wins over the configured level when set.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let from_env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    filter_from(config, from_env.as_deref())
}

/// Build a filter from an explicit directive, falling back to the config level
pub fn filter_from(config: &LoggingConfig, directive: Option<&str>) -> Result<EnvFilter> {
    if let Some(filter) = directive.and_then(|d| EnvFilter::try_new(d).ok()) {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level)
        .map_err(|e| Error::Configuration(format!("Invalid log level '{}': {}", config.level, e)))
}

/// Install the global subscriber
///
/// Fails if a global subscriber is already set.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = env_filter(config)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let installed = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| Error::Configuration(format!("Failed to install subscriber: {}", e)))
}
