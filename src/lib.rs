//! Follow the newest file in a directory, switching over whenever log
//! rotation makes a different file the newest.
//!
//! Directory events (driven by [`notify`](https://crates.io/crates/notify))
//! only *trigger* a decision; the decision itself always comes from a fresh
//! listing of the directory. At most one [`TailSession`] is designated as
//! current at any time, and every session is cancelled and has released its
//! file before [`RotationSupervisor::supervise`] returns.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use curtail::{RotationSupervisor, ShutdownCoordinator, StdoutSink};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), curtail::Error> {
//!     let shutdown = ShutdownCoordinator::default();
//!     shutdown.listen_for_signals();
//!
//!     let supervisor = RotationSupervisor::new("/var/log/myapp", Arc::new(StdoutSink))
//!         .history_lines(20);
//!
//!     shutdown.drive(supervisor.supervise(shutdown.token())).await?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
mod error;
mod events;
mod history;
pub mod logging;
mod ranker;
mod reader;
mod session;
mod shutdown;
mod sink;
mod supervisor;

pub use error::{Error, Result};
pub use events::{DirEvent, DirEventKind, DirEvents};
pub use history::{last_lines, History};
pub use ranker::{list, select, select_from, DirectoryEntry};
pub use reader::{Follower, StartPosition};
pub use session::{SessionEnd, TailSession, DEFAULT_HISTORY_LINES};
pub use shutdown::{Shutdown, ShutdownCoordinator, DEFAULT_GRACE};
pub use sink::{LineSink, MemorySink, StdoutSink};
pub use supervisor::RotationSupervisor;

use std::sync::Arc;

use crate::cli::CliArgs;
use crate::config::Config;

/// High-level entry point used by `main.rs`.
///
/// Validates the directory, installs signal handling, and supervises the
/// directory until a termination signal arrives or the directory is lost.
///
/// On a signal, returns how cleanup went. Work still pending after
/// [`Shutdown::GraceExceeded`] is abandoned, and the caller is expected to
/// exit without waiting for it.
pub async fn run(args: CliArgs) -> anyhow::Result<Shutdown> {
    let config = Config::from_args(&args)?;

    tracing::info!(
        dir = %config.directory.display(),
        usec = config.micro_delay.as_micros() as u64,
        "tailing current log"
    );

    let shutdown = ShutdownCoordinator::new(config.grace);
    let _signals = shutdown.listen_for_signals();

    let supervisor = RotationSupervisor::new(&config.directory, Arc::new(StdoutSink))
        .history_lines(config.history_lines);

    match shutdown.drive(supervisor.supervise(shutdown.token())).await {
        Ok(outcome) => {
            tracing::debug!(?outcome, "shutdown finished");
            Ok(outcome)
        }
        Err(e) if e.is_directory_lost() => {
            Err(anyhow::Error::new(e).context("watched directory is no longer available"))
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(doctest)]
doc_comment::doctest!("../README.md");
