//! Runtime configuration resolved from the command line.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::CliArgs;
use crate::error::{Error, Result};

/// Everything the tailer needs to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory whose newest file is followed.
    pub directory: PathBuf,
    /// Existing lines printed when a file starts being followed.
    pub history_lines: usize,
    /// Legacy read delay. Reported at startup, not used for reading.
    pub micro_delay: Duration,
    /// Time allowed for cleanup after a termination signal.
    pub grace: Duration,
}

impl Config {
    /// Resolves the arguments and checks that the directory is usable.
    ///
    /// Runs before any watching starts, so a bad directory is reported up
    /// front.
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let directory = args.directory.clone().unwrap_or_else(default_log_dir);
        check_directory(&directory)?;

        Ok(Config {
            directory,
            history_lines: args.lines,
            micro_delay: Duration::from_micros(args.usec),
            grace: Duration::from_millis(args.grace_ms),
        })
    }
}

fn check_directory(path: &Path) -> Result<()> {
    let meta = std::fs::metadata(path).map_err(|source| Error::DirectoryUnavailable {
        path: path.to_path_buf(),
        source,
    })?;

    if !meta.is_dir() {
        return Err(Error::NotADirectory(path.to_path_buf()));
    }

    // Listing must work too, or the first ranking would fail anyway.
    std::fs::read_dir(path).map_err(|source| Error::DirectoryUnavailable {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(())
}

/// The BigFix client log directory for the host platform.
pub fn default_log_dir() -> PathBuf {
    if cfg!(target_os = "macos") {
        PathBuf::from("/Library/Application Support/BigFix/BES Agent/__BESData/__Global/Logs")
    } else if cfg!(target_os = "windows") {
        PathBuf::from(
            "C:\\Program Files (x86)\\BigFix Enterprise\\BES Client\\__BESData\\__Global\\Logs",
        )
    } else {
        PathBuf::from("/var/opt/BESClient/__BESData/__Global/Logs")
    }
}
