use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "analytics.log";

/// Where and how much the report runner logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub filter: String,
    /// Daily rolling log files are written here when set.
    pub file_dir: Option<PathBuf>,
}

impl LogSettings {
    /// `ENABLE_FILE_LOGS` turns on file output in `LOG_DIR` (default `./logs`).
    pub fn from_env(filter: &str) -> Self {
        Self::from_values(
            filter,
            std::env::var("ENABLE_FILE_LOGS").ok().as_deref(),
            std::env::var("LOG_DIR").ok().as_deref(),
        )
    }

    pub fn from_values(filter: &str, enable_file_logs: Option<&str>, log_dir: Option<&str>) -> Self {
        let enabled = matches!(enable_file_logs.map(str::trim), Some("true" | "1"));
        let file_dir = enabled.then(|| {
            log_dir
                .map(str::trim)
                .filter(|dir| !dir.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./logs"))
        });
        Self {
            filter: filter.to_string(),
            file_dir,
        }
    }
}

/// Flushes buffered file output when dropped.
pub struct FileLogGuard(WorkerGuard);

/// Installs the global subscriber. Events go to stderr so stdout carries only
/// the JSON report.
pub fn init_tracing(settings: &LogSettings) -> Option<FileLogGuard> {
    let filter = EnvFilter::try_new(&settings.filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let (file_writer, guard) = match settings.file_dir.as_deref().and_then(daily_file_writer) {
        Some((writer, guard)) => (Some(writer), Some(guard)),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_writer.map(|writer| fmt::layer().with_writer(writer).with_ansi(false)))
        .init();

    guard.map(FileLogGuard)
}

fn daily_file_writer(dir: &Path) -> Option<(NonBlocking, WorkerGuard)> {
    if let Err(err) = std::fs::create_dir_all(dir) {
        eprintln!("file logging disabled, cannot create {}: {err}", dir.display());
        return None;
    }
    Some(tracing_appender::non_blocking(rolling::daily(dir, LOG_FILE_PREFIX)))
}
