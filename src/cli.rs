//! Command-line arguments, parsed with `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `curtail`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "curtail",
    version,
    about = "Tail the newest log file in a directory, following it across rotations.",
    long_about = None
)]
pub struct CliArgs {
    /// Directory to watch.
    ///
    /// Defaults to the BigFix client log directory for this platform.
    #[arg(value_name = "DIRECTORY")]
    pub directory: Option<PathBuf>,

    /// Microsecond delay to wait for the next line. Informational only.
    #[arg(long, value_name = "N", default_value_t = 150)]
    pub usec: u64,

    /// Number of existing lines to print when a file starts being followed.
    #[arg(short = 'n', long, value_name = "N", default_value_t = crate::session::DEFAULT_HISTORY_LINES)]
    pub lines: usize,

    /// How long to wait for cleanup after a termination signal, in milliseconds.
    #[arg(long, value_name = "MS", default_value_t = 2000)]
    pub grace_ms: u64,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `CURTAIL_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// The level as a filter directive.
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = CliArgs::try_parse_from(["curtail"]).unwrap();
        assert_eq!(args.directory, None);
        assert_eq!(args.usec, 150);
        assert_eq!(args.lines, 10);
        assert_eq!(args.grace_ms, 2000);
        assert_eq!(args.log_level, None);
    }

    #[test]
    fn test_directory_and_flags() {
        let args = CliArgs::try_parse_from([
            "curtail",
            "--usec",
            "500",
            "-n",
            "3",
            "--log-level",
            "debug",
            "/var/log/app",
        ])
        .unwrap();

        assert_eq!(args.directory, Some(PathBuf::from("/var/log/app")));
        assert_eq!(args.usec, 500);
        assert_eq!(args.lines, 3);
        assert_eq!(args.log_level, Some(LogLevel::Debug));
    }

    #[test]
    fn test_level_directives() {
        assert_eq!(LogLevel::Warn.as_str(), "warn");
        assert_eq!(LogLevel::Trace.as_str(), "trace");
    }

    #[test]
    fn test_rejects_two_directories() {
        assert!(CliArgs::try_parse_from(["curtail", "/a", "/b"]).is_err());
    }

    #[test]
    fn test_rejects_bad_number() {
        assert!(CliArgs::try_parse_from(["curtail", "--usec", "soon"]).is_err());
    }
}
