//! Logging infrastructure for tileseed.
//!
//! Logs go either to stdout or, for long-running agents, to a daily rolling
//! file `tileseed.<date>.<pid>.log` so that every worker process writes its
//! own file. `RUST_LOG` overrides the level derived from the verbosity.

use std::io;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Rolled log files kept per process.
pub const MAX_LOG_FILES: usize = 7;

/// Guard that must be kept alive for the duration of logging.
///
/// Dropping this guard will flush and close the log writer.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

/// Where and how much to log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoggingOptions {
    /// Number of `-v` flags
    pub verbosity: u8,
    /// Log to files in this directory instead of stdout
    pub file_dir: Option<PathBuf>,
}

impl LoggingOptions {
    pub fn new(verbosity: u8) -> Self {
        Self {
            verbosity,
            file_dir: None,
        }
    }

    pub fn with_file_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.file_dir = Some(dir.into());
        self
    }
}

/// Level directive for a verbosity count.
pub fn level_for_verbosity(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Default file log directory below a store root.
pub fn default_log_dir(store_root: &Path) -> PathBuf {
    store_root.join("log")
}

/// Initialize the global subscriber.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created.
pub fn init_logging(options: &LoggingOptions) -> Result<LoggingGuard, io::Error> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_for_verbosity(options.verbosity)));

    match &options.file_dir {
        Some(dir) => {
            let appender = file_appender(dir, std::process::id())?;
            let (writer, file_guard) = tracing_appender::non_blocking(appender);

            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer)
                .init();

            Ok(LoggingGuard {
                _file_guard: file_guard,
            })
        }
        None => {
            let (writer, stdout_guard) = tracing_appender::non_blocking(io::stdout());

            let stdout_layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(true);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(stdout_layer)
                .init();

            Ok(LoggingGuard {
                _file_guard: stdout_guard,
            })
        }
    }
}

fn file_appender(dir: &Path, pid: u32) -> Result<RollingFileAppender, io::Error> {
    std::fs::create_dir_all(dir)?;

    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("tileseed")
        .filename_suffix(format!("{}.log", pid))
        .max_log_files(MAX_LOG_FILES)
        .build(dir)
        .map_err(io::Error::other)
}
