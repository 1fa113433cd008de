//! Tracing setup: env-filtered stdout always, optional daily-rolling file
//! output held alive by the returned guard.

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Keeps the non-blocking file writer's worker thread alive; dropping it
/// flushes whatever is still buffered.
pub struct FileLogGuard {
    _guard: WorkerGuard,
}

pub fn file_logging_enabled() -> bool {
    std::env::var("MNEMO_ENABLE_FILE_LOGS")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

/// Builds the non-blocking daily-rolling writer for the given directory,
/// or `None` when the directory cannot be created.
fn file_writer(log_dir: &str) -> Option<(NonBlocking, FileLogGuard)> {
    if let Err(err) = std::fs::create_dir_all(log_dir) {
        eprintln!("failed to create log directory {log_dir}: {err}");
        return None;
    }
    let appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "mnemo.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    Some((writer, FileLogGuard { _guard: guard }))
}

/// Installs the global subscriber: env-filtered stdout, plus a file layer
/// when `MNEMO_ENABLE_FILE_LOGS` is set. The returned guard must be held
/// for the lifetime of the process.
pub fn init_tracing(log_level: &str) -> Option<FileLogGuard> {
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(true);

    if file_logging_enabled() {
        let log_dir = std::env::var("MNEMO_LOG_DIR").unwrap_or_else(|_| "./logs".to_string());
        if let Some((writer, guard)) = file_writer(&log_dir) {
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            if let Err(err) = tracing_subscriber::registry()
                .with(env_filter)
                .with(stdout_layer)
                .with(file_layer)
                .try_init()
            {
                eprintln!("tracing already initialized: {err}");
            }
            return Some(guard);
        }
    }

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .try_init()
    {
        eprintln!("tracing already initialized: {err}");
    }
    None
}
