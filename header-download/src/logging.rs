//! Logging setup for the header downloader.
//!
//! Everything in this crate logs through `tracing`. A host that has no subscriber of
//! its own can install one here: console output, a `run.log` file in a log directory,
//! or both. On every start the previous `run.log` is archived under a timestamped name
//! and the oldest archives beyond `max_files` are removed.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{LoggingError, LoggingResult};

const ARCHIVE_PREFIX: &str = "header-download.";
const ACTIVE_LOG_NAME: &str = "run.log";

/// Keeps the non-blocking file writer alive. Buffered lines are flushed on drop.
#[derive(Debug)]
pub struct LoggingGuard {
    _worker_guard: Option<WorkerGuard>,
}

/// Configuration for logging output.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level filter. `None` reads `RUST_LOG` and falls back to INFO.
    pub level: Option<LevelFilter>,
    /// Write to stderr.
    pub console: bool,
    /// Write to a rotating file.
    pub file: Option<LogFileConfig>,
}

/// Configuration for log file output.
#[derive(Debug, Clone)]
pub struct LogFileConfig {
    pub log_dir: PathBuf,
    /// Number of archived logs kept besides the active one.
    pub max_files: usize,
}

impl LoggingConfig {
    pub fn console(level: LevelFilter) -> Self {
        Self {
            level: Some(level),
            console: true,
            file: None,
        }
    }

    pub fn with_file(mut self, log_dir: impl Into<PathBuf>, max_files: usize) -> Self {
        self.file = Some(LogFileConfig {
            log_dir: log_dir.into(),
            max_files,
        });
        self
    }
}

/// Install a console-only subscriber.
pub fn init_console_logging(level: LevelFilter) -> LoggingResult<LoggingGuard> {
    init_logging(LoggingConfig::console(level))
}

/// Install the global subscriber described by `config`.
///
/// With neither console nor file output nothing is installed and the tracing macros
/// stay no-ops.
///
/// # Errors
///
/// Fails when the log directory cannot be prepared or a global subscriber is already set.
pub fn init_logging(config: LoggingConfig) -> LoggingResult<LoggingGuard> {
    if !config.console && config.file.is_none() {
        return Ok(LoggingGuard {
            _worker_guard: None,
        });
    }

    let env_filter = match config.level {
        Some(level) => EnvFilter::new(level.to_string()),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(LevelFilter::INFO.to_string())),
    };

    let (file_layer, guard) = match config.file {
        Some(ref file_config) => {
            let (writer, guard) = open_log_file(file_config)?;
            let layer = fmt::layer().with_target(true).with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console_layer = config.console.then(|| fmt::layer().with_target(true));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| LoggingError::SubscriberInit(e.to_string()))?;

    Ok(LoggingGuard {
        _worker_guard: guard,
    })
}

fn open_log_file(config: &LogFileConfig) -> LoggingResult<(NonBlocking, WorkerGuard)> {
    fs::create_dir_all(&config.log_dir)?;
    archive_active_log(&config.log_dir)?;
    prune_archives(&config.log_dir, config.max_files)?;

    let file = File::create(config.log_dir.join(ACTIVE_LOG_NAME))?;
    Ok(tracing_appender::non_blocking(file))
}

/// Rename `run.log` to `header-download.<mtime>.log`, adding a numeric suffix on collision.
fn archive_active_log(log_dir: &Path) -> LoggingResult<()> {
    let active = log_dir.join(ACTIVE_LOG_NAME);
    if !active.exists() {
        return Ok(());
    }

    let stamp = modified_at(&active).unwrap_or_else(Local::now).format("%Y-%m-%d.%H%M%S");
    let target = std::iter::once(format!("{ARCHIVE_PREFIX}{stamp}.log"))
        .chain((1..=999).map(|i| format!("{ARCHIVE_PREFIX}{stamp}-{i}.log")))
        .map(|name| log_dir.join(name))
        .find(|path| !path.exists())
        .ok_or_else(|| {
            LoggingError::RotationFailed("too many log files with same timestamp".to_string())
        })?;

    fs::rename(&active, &target).map_err(|e| LoggingError::RotationFailed(e.to_string()))
}

fn modified_at(path: &Path) -> Option<DateTime<Local>> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::from(modified))
}

fn is_archive(name: &str) -> bool {
    name.starts_with(ARCHIVE_PREFIX) && name.ends_with(".log")
}

/// Delete the oldest archives until at most `max_files` remain. The active log is never touched.
fn prune_archives(log_dir: &Path, max_files: usize) -> LoggingResult<()> {
    let mut archives: Vec<(PathBuf, Option<std::time::SystemTime>)> = fs::read_dir(log_dir)
        .map_err(|e| LoggingError::RotationFailed(format!("failed to read log dir: {}", e)))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_str().is_some_and(is_archive))
        .map(|entry| {
            let modified = entry.metadata().and_then(|m| m.modified()).ok();
            (entry.path(), modified)
        })
        .collect();

    if archives.len() <= max_files {
        return Ok(());
    }

    archives.sort_by(|a, b| a.1.cmp(&b.1));
    let excess = archives.len() - max_files;
    for (path, _) in archives.into_iter().take(excess) {
        if let Err(e) = fs::remove_file(&path) {
            tracing::warn!("Failed to remove old log file {:?}: {}", path, e);
        }
    }

    Ok(())
}
