//! Tracing bootstrap: human-readable stderr plus optional JSON file logging.

use narrascope_core::config::LoggingConfig;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Install the global subscriber.
///
/// `RUST_LOG` overrides `config.level` for the stderr layer. When
/// `json_log_dir` is set, debug-level JSON logs roll daily into that
/// directory; keep the returned guard alive so buffered lines are flushed.
/// If that directory cannot be created, a warning is logged and only the
/// stderr layer is installed.
/// A subscriber installed earlier (e.g. by a host application) is left in place.
pub fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(filter);

    let mut file_error = None;
    let (json_layer, guard) = match config.json_log_dir.as_deref().map(daily_appender) {
        Some(Ok(file_appender)) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(EnvFilter::new("debug"));
            (Some(layer), Some(guard))
        }
        Some(Err(e)) => {
            file_error = Some(e);
            (None, None)
        }
        None => (None, None),
    };

    if tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .try_init()
        .is_err()
    {
        tracing::debug!("Global tracing subscriber already installed");
    }
    if let Some(e) = file_error {
        tracing::warn!(
            dir = ?config.json_log_dir,
            error = %e,
            "JSON log directory unavailable; logging to stderr only"
        );
    }
    guard
}

fn daily_appender(log_dir: &Path) -> Result<RollingFileAppender, String> {
    std::fs::create_dir_all(log_dir).map_err(|e| e.to_string())?;
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("narrascope.log")
        .build(log_dir)
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_with_json_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = LoggingConfig {
            level: "warn".into(),
            json_log_dir: Some(dir.path().join("logs")),
        };
        let guard = init_logging(&config);
        assert!(guard.is_some());
        assert!(dir.path().join("logs").is_dir());
        // A second call must not panic.
        let _ = init_logging(&LoggingConfig::default());
    }

    #[test]
    fn test_unusable_log_dir_falls_back_to_stderr() {
        let dir = tempfile::TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();
        let config = LoggingConfig {
            level: "warn".into(),
            json_log_dir: Some(blocker.join("logs")),
        };
        assert!(init_logging(&config).is_none());
        assert!(!blocker.join("logs").exists());
    }
}
