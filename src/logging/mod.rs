// Logging module - tracing subscriber setup for the worker binary
//
// Human-readable logs go to stderr (stdout carries the event stream). When
// file logging is enabled, a second JSON layer writes to a rolling file
// through a non-blocking writer. The returned guard must live until exit or
// buffered lines are lost.
//
// Precedence: RUST_LOG env var > config level > "info"

use crate::config::LoggingConfig;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber
pub fn init(config: &LoggingConfig) -> Option<WorkerGuard> {
    let default_filter = format!("hwproxy_session={},reqwest=warn", config.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    let (file_layer, guard) = match file_writer(config) {
        Some((writer, guard)) => (
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_ansi(false),
            ),
            Some(guard),
        ),
        None => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(config.stderr_ansi),
        )
        .with(file_layer)
        .try_init();
    if let Err(e) = installed {
        eprintln!("Warning: logging already initialized: {}", e);
    }

    guard
}

/// Rolling non-blocking writer, or `None` when disabled or the directory is unusable
fn file_writer(config: &LoggingConfig) -> Option<(NonBlocking, WorkerGuard)> {
    if !config.file_enabled {
        return None;
    }

    if let Err(e) = std::fs::create_dir_all(&config.file_dir) {
        // Fall back to stderr-only logging
        eprintln!(
            "Warning: Could not create log directory {:?}: {}",
            config.file_dir, e
        );
        return None;
    }

    let appender = RollingFileAppender::new(
        config.file_rotation.into(),
        &config.file_dir,
        &config.file_prefix,
    );

    Some(tracing_appender::non_blocking(appender))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogRotation;

    #[test]
    fn test_file_writer_disabled() {
        assert!(file_writer(&LoggingConfig::default()).is_none());
    }

    #[test]
    fn test_file_writer_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            file_enabled: true,
            file_dir: dir.path().join("nested").join("logs"),
            file_rotation: LogRotation::Never,
            ..LoggingConfig::default()
        };

        let writer = file_writer(&config);
        assert!(writer.is_some());
        assert!(config.file_dir.is_dir());
    }
}
