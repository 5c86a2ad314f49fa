//! Structured logging setup
//!
//! Provides JSON-formatted and human-readable logging with optional file
//! output, for hosts that do not install their own `tracing` subscriber.

use crate::config::LoggingConfig;
use anyhow::Result;
use std::fs::OpenOptions;
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging based on configuration.
///
/// `RUST_LOG` takes precedence over `config.level`. When `file_path` is set,
/// every line is also appended to that file.
///
/// # Errors
///
/// Returns an error if the level filter is invalid, the log file cannot be
/// opened, or a global subscriber is already installed.
///
/// # Examples
///
/// ```no_run
/// use reviewsync::config::LoggingConfig;
/// use reviewsync::logging::init_logging;
///
/// let config = LoggingConfig {
///     level: "debug".to_string(),
///     json_format: true,
///     file_path: None,
/// };
///
/// init_logging(&config).unwrap();
/// ```
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?;

    let registry = tracing_subscriber::registry().with(env_filter);

    let file = match &config.file_path {
        Some(path) => Some(Arc::new(
            OpenOptions::new().create(true).append(true).open(path)?,
        )),
        None => None,
    };

    if config.json_format {
        let stdout_layer = fmt::layer().json().with_current_span(true);
        let file_layer = file.map(|f| fmt::layer().json().with_current_span(true).with_writer(f));
        registry.with(stdout_layer).with(file_layer).try_init()?;
    } else {
        let stdout_layer = fmt::layer().with_target(true).with_level(true);
        let file_layer = file.map(|f| {
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(false)
                .with_writer(f)
        });
        registry.with(stdout_layer).with(file_layer).try_init()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_is_rejected() {
        // Only meaningful when RUST_LOG is unset; otherwise the env filter wins.
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = LoggingConfig {
            level: "reviewsync=notalevel".to_string(),
            json_format: false,
            file_path: None,
        };
        assert!(init_logging(&config).is_err());
    }
}
