//! A single follow of a single file.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::history;
use crate::reader::{Follower, StartPosition};
use crate::sink::LineSink;

/// Number of historical lines printed when a session starts.
pub const DEFAULT_HISTORY_LINES: usize = 10;

/// Why a session stopped.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionEnd {
    /// Its cancellation token fired.
    Cancelled,
    /// The followed file went away.
    Closed,
    /// The file could not be read at all.
    Failed,
}

/// Prints the tail of one file, then follows it until cancelled.
pub struct TailSession {
    path: PathBuf,
    cancel: CancellationToken,
    history_lines: usize,
    sink: Arc<dyn LineSink>,
}

impl fmt::Debug for TailSession {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("TailSession")
            .field("path", &self.path)
            .field("history_lines", &self.history_lines)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl TailSession {
    pub fn new(
        path: impl Into<PathBuf>,
        cancel: CancellationToken,
        history_lines: usize,
        sink: Arc<dyn LineSink>,
    ) -> Self {
        TailSession {
            path: path.into(),
            cancel,
            history_lines,
            sink,
        }
    }

    /// Runs the session to completion.
    ///
    /// Every line is emitted at most once: the live follow starts exactly
    /// where the historical read ended. The follower is always stopped before
    /// this returns.
    pub async fn run(self) -> SessionEnd {
        tracing::info!(file = %self.path.display(), "now tailing");

        // Opening can block indefinitely (a FIFO with no writer, a hung
        // network mount), so both the history read and the open yield to
        // cancellation.
        let history = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return SessionEnd::Cancelled,
            res = history::last_lines(&self.path, self.history_lines) => match res {
                Ok(history) => history,
                // Rotated away before we got to it.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return SessionEnd::Closed,
                Err(e) => {
                    tracing::warn!(file = %self.path.display(), error = %e, "cannot read log file");
                    return SessionEnd::Failed;
                }
            },
        };

        let start = StartPosition::Offset(history.end_offset());
        for line in history.into_lines() {
            self.deliver(line);
        }

        let mut follower = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return SessionEnd::Cancelled,
            res = Follower::open(&self.path, start) => match res {
                Ok(follower) => follower,
                Err(e) => {
                    tracing::warn!(file = %self.path.display(), error = %e, "cannot follow log file");
                    return SessionEnd::Failed;
                }
            },
        };

        let end = self.pump(&mut follower).await;

        if let Err(e) = follower.stop().await {
            tracing::warn!(file = %self.path.display(), error = %e, "failed to release log file");
        }
        tracing::info!(file = %self.path.display(), reason = ?end, "stopped tailing");

        end
    }

    async fn pump(&self, follower: &mut Follower) -> SessionEnd {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return SessionEnd::Cancelled,
                line = follower.next_line() => match line {
                    Some(line) => self.deliver(line),
                    None => return SessionEnd::Closed,
                },
            }
        }
    }

    fn deliver(&self, line: std::io::Result<String>) {
        match line {
            Ok(text) => self.sink.emit(&text),
            Err(e) => {
                tracing::warn!(file = %self.path.display(), error = %e, "failed to read line");
            }
        }
    }
}
