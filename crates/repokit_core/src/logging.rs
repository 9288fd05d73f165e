//! Process-wide file logging bootstrap.
//!
//! # Responsibility
//! - Start rotating file logs for the `log` facade exactly once per process.
//! - Report which configuration is active.
//!
//! # Invariants
//! - Initialization never panics.
//! - Repeating initialization with the same level and directory is a no-op.
//! - Switching level or directory after initialization is rejected.

use crate::config::LoggingConfig;
use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::info;
use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};
use thiserror::Error;

const LOG_FILE_BASENAME: &str = "repokit";
const MAX_LOG_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const MAX_LOG_FILES: usize = 5;

static LOGGING_STATE: OnceCell<LoggingState> = OnceCell::new();

struct LoggingState {
    level: &'static str,
    directory: PathBuf,
    _handle: LoggerHandle,
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("unsupported log level `{0}`; expected trace|debug|info|warn|error")]
    UnsupportedLevel(String),
    #[error("log directory is not configured")]
    MissingDirectory,
    #[error("log directory must be an absolute path, got `{0}`")]
    RelativeDirectory(PathBuf),
    #[error("failed to create log directory `{path}`: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to start logger: {0}")]
    Backend(#[from] flexi_logger::FlexiLoggerError),
    #[error("logging already initialized with {active}; refusing to switch to {requested}")]
    AlreadyInitialized { active: String, requested: String },
}

/// Starts file logging for `config`.
///
/// # Errors
/// - `MissingDirectory` / `RelativeDirectory` for unusable directories.
/// - `AlreadyInitialized` when a different level or directory is active.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let level = normalize_level(&config.level)?;
    let directory = normalize_directory(config.directory.as_deref())?;

    let state = LOGGING_STATE.get_or_try_init(|| start_logger(level, &directory))?;
    if state.level != level || state.directory != directory {
        return Err(LoggingError::AlreadyInitialized {
            active: format!("level `{}` at `{}`", state.level, state.directory.display()),
            requested: format!("level `{level}` at `{}`", directory.display()),
        });
    }
    Ok(())
}

/// Active `(level, directory)`, or `None` before initialization.
pub fn logging_status() -> Option<(&'static str, PathBuf)> {
    LOGGING_STATE
        .get()
        .map(|state| (state.level, state.directory.clone()))
}

fn start_logger(level: &'static str, directory: &Path) -> Result<LoggingState, LoggingError> {
    std::fs::create_dir_all(directory).map_err(|source| LoggingError::CreateDirectory {
        path: directory.to_path_buf(),
        source,
    })?;

    let handle = Logger::try_with_str(level)?
        .log_to_file(
            FileSpec::default()
                .directory(directory)
                .basename(LOG_FILE_BASENAME),
        )
        .rotate(
            Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(MAX_LOG_FILES),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .append()
        .format_for_files(flexi_logger::detailed_format)
        .start()?;

    info!(
        "event=logging_init module=logging status=ok level={} log_dir={} version={}",
        level,
        directory.display(),
        env!("CARGO_PKG_VERSION")
    );

    Ok(LoggingState {
        level,
        directory: directory.to_path_buf(),
        _handle: handle,
    })
}

fn normalize_level(level: &str) -> Result<&'static str, LoggingError> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" => Ok("error"),
        other => Err(LoggingError::UnsupportedLevel(other.to_string())),
    }
}

fn normalize_directory(directory: Option<&Path>) -> Result<PathBuf, LoggingError> {
    let directory = directory
        .filter(|path| !path.as_os_str().is_empty())
        .ok_or(LoggingError::MissingDirectory)?;
    if !directory.is_absolute() {
        return Err(LoggingError::RelativeDirectory(directory.to_path_buf()));
    }
    Ok(directory.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::{init_logging, logging_status, normalize_directory, normalize_level, LoggingError};
    use crate::config::LoggingConfig;
    use std::path::Path;

    #[test]
    fn level_names_are_normalized() {
        assert_eq!(normalize_level(" WARNING ").unwrap(), "warn");
        assert!(matches!(
            normalize_level("loud"),
            Err(LoggingError::UnsupportedLevel(level)) if level == "loud"
        ));
    }

    #[test]
    fn directory_must_be_present_and_absolute() {
        assert!(matches!(
            normalize_directory(None),
            Err(LoggingError::MissingDirectory)
        ));
        assert!(matches!(
            normalize_directory(Some(Path::new("logs"))),
            Err(LoggingError::RelativeDirectory(_))
        ));
    }

    #[test]
    fn init_is_idempotent_and_rejects_reconfiguration() {
        let root = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            level: "debug".to_string(),
            directory: Some(root.path().join("logs")),
        };

        init_logging(&config).unwrap();
        init_logging(&config).unwrap();
        let (level, directory) = logging_status().unwrap();
        assert_eq!(level, "debug");
        assert_eq!(directory, root.path().join("logs"));

        let moved = LoggingConfig {
            directory: Some(root.path().join("elsewhere")),
            ..config
        };
        assert!(matches!(
            init_logging(&moved),
            Err(LoggingError::AlreadyInitialized { .. })
        ));
    }
}
