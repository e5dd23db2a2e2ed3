use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "mastery-core.log";

pub struct FileLogGuard {
    _guard: WorkerGuard,
}

/// Directory for rolling log files, when `ENABLE_FILE_LOGS` is set.
pub fn file_log_dir() -> Option<String> {
    let enabled = std::env::var("ENABLE_FILE_LOGS")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);
    if !enabled {
        return None;
    }
    let log_dir = std::env::var("LOG_DIR").unwrap_or_else(|_| "./logs".to_string());
    match std::fs::create_dir_all(&log_dir) {
        Ok(()) => Some(log_dir),
        Err(err) => {
            eprintln!("failed to create log directory {log_dir}: {err}");
            None
        }
    }
}

/// Installs the global subscriber. Keep the returned guard alive for the
/// lifetime of the process or buffered file output is dropped.
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init_tracing(log_level: &str) -> Option<FileLogGuard> {
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match file_log_dir() {
        Some(dir) => {
            let appender = RollingFileAppender::new(Rotation::DAILY, &dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false).with_target(true);
            (Some(layer), Some(FileLogGuard { _guard: guard }))
        }
        None => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .with(file_layer)
        .try_init();
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }

    guard
}
