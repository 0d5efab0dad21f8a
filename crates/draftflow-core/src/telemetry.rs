//! Tracing subscriber setup.
//!
//! Logs go to stderr so streamed text on stdout stays clean. An optional
//! file layer writes through a non-blocking appender whose guard must be
//! kept alive until exit.

use anyhow::{Context, Result};
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::config::LoggingConfig;

/// Flushes buffered file output when dropped.
#[must_use = "dropping the guard stops file logging"]
pub struct TelemetryGuard {
    _file: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Builds the filter: `RUST_LOG` wins over the configured directive.
fn build_filter(logging: &LoggingConfig, verbose: bool) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directive = if verbose { "debug" } else { logging.filter.as_str() };
    EnvFilter::try_new(directive).with_context(|| format!("Invalid log filter: {directive}"))
}

/// Installs the global subscriber.
///
/// # Errors
/// Returns an error if the filter is invalid or a subscriber is already set.
pub fn init(logging: &LoggingConfig, verbose: bool) -> Result<TelemetryGuard> {
    let filter = build_filter(logging, verbose)?;

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = vec![Box::new(
        tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(false),
    )];

    let mut file_guard = None;
    if let Some(path) = &logging.file {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| std::path::Path::new("."));
        let name = path
            .file_name()
            .with_context(|| format!("Log file path has no file name: {}", path.display()))?;
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

        let appender = tracing_appender::rolling::never(dir, name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        layers.push(Box::new(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true),
        ));
        file_guard = Some(guard);
    }

    layers.push(Box::new(filter));
    Registry::default()
        .with(layers)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(TelemetryGuard { _file: file_guard })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_is_rejected() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let logging = LoggingConfig {
            filter: "draftflow=notalevel".to_string(),
            file: None,
        };
        assert!(build_filter(&logging, false).is_err());
    }

    #[test]
    fn test_verbose_overrides_config_filter() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let logging = LoggingConfig {
            filter: "draftflow=notalevel".to_string(),
            file: None,
        };
        assert!(build_filter(&logging, true).is_ok());
    }
}
