//! Watches a directory and keeps exactly one [`TailSession`] on its newest
//! file, handing over whenever a newer file shows up.
//!
//! All state (the current file and the active session's handle) lives inside
//! [`RotationSupervisor::supervise`] and is touched by nobody else. Sessions
//! only ever see their own path and cancellation token.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::events::{DirEvent, DirEvents};
use crate::ranker;
use crate::session::{SessionEnd, TailSession, DEFAULT_HISTORY_LINES};
use crate::sink::LineSink;

type SessionId = u64;

/// The session currently designated as following the current file.
#[derive(Debug)]
struct ActiveSession {
    id: SessionId,
    path: PathBuf,
    cancel: CancellationToken,
}

/// What woke the supervisor up.
enum Step {
    Shutdown,
    Event(Option<Result<DirEvent>>),
    SessionDone(std::result::Result<(SessionId, SessionEnd), JoinError>),
}

pub struct RotationSupervisor {
    dir: PathBuf,
    history_lines: usize,
    sink: Arc<dyn LineSink>,
    on_rotate: Option<mpsc::UnboundedSender<PathBuf>>,

    active: Option<ActiveSession>,
    /// The active session plus any superseded ones still winding down.
    sessions: JoinSet<(SessionId, SessionEnd)>,
    next_id: SessionId,
}

impl fmt::Debug for RotationSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter) -> std::result::Result<(), fmt::Error> {
        f.debug_struct("RotationSupervisor")
            .field("dir", &self.dir)
            .field("history_lines", &self.history_lines)
            .field("active", &self.active)
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

impl RotationSupervisor {
    pub fn new(dir: impl Into<PathBuf>, sink: Arc<dyn LineSink>) -> Self {
        RotationSupervisor {
            dir: dir.into(),
            history_lines: DEFAULT_HISTORY_LINES,
            sink,
            on_rotate: None,
            active: None,
            sessions: JoinSet::new(),
            next_id: 0,
        }
    }

    /// Number of existing lines printed when a file starts being followed.
    pub fn history_lines(mut self, n: usize) -> Self {
        self.history_lines = n;
        self
    }

    /// Receives the path of every file the supervisor starts following.
    pub fn on_rotate(mut self, tx: mpsc::UnboundedSender<PathBuf>) -> Self {
        self.on_rotate = Some(tx);
        self
    }

    /// Runs until `parent` is cancelled or the directory can no longer be
    /// observed.
    ///
    /// Whichever way it ends, every session has been cancelled and has
    /// released its file by the time this returns.
    pub async fn supervise(mut self, parent: CancellationToken) -> Result<()> {
        let res = self.watch_loop(&parent).await;

        if let Err(e) = &res {
            tracing::error!(dir = %self.dir.display(), error = %e, "supervisor failed");
        }
        self.shutdown().await;

        res
    }

    async fn watch_loop(&mut self, parent: &CancellationToken) -> Result<()> {
        let mut events = DirEvents::new()?;
        // Watch before the first listing so nothing between the two is missed.
        let dir = events.watch_directory(&self.dir)?;
        self.dir = dir;

        self.rescan(parent)?;

        loop {
            let step = tokio::select! {
                biased;
                _ = parent.cancelled() => Step::Shutdown,
                res = self.sessions.join_next(), if !self.sessions.is_empty() => match res {
                    Some(res) => Step::SessionDone(res),
                    None => continue,
                },
                event = events.next_event() => Step::Event(event),
            };

            match step {
                Step::Shutdown => {
                    tracing::info!("shutdown requested, stopping directory watch");
                    return Ok(());
                }
                Step::Event(None) => return Err(Error::WatchClosed),
                Step::Event(Some(Err(e))) => {
                    tracing::warn!(error = %e, "directory watch error");
                }
                Step::Event(Some(Ok(event))) => {
                    tracing::trace!(kind = ?event.kind(), paths = ?event.paths(), "directory event");
                    // The directory itself being removed or moved only shows
                    // up as an event naming it; the listing will then fail.
                    if event.kind().triggers_rescan() || event.concerns(&self.dir) {
                        self.rescan(parent)?;
                    }
                }
                Step::SessionDone(res) => self.reap(res, parent)?,
            }
        }
    }

    /// Re-ranks the whole directory and hands over if the winner changed.
    fn rescan(&mut self, parent: &CancellationToken) -> Result<()> {
        let latest = match ranker::select(&self.dir)? {
            Some(latest) => latest,
            // Nothing to follow; keep whatever is running.
            None => return Ok(()),
        };

        let current = self.active.as_ref().map(|active| active.path.as_path());
        if current == Some(latest.as_path()) {
            return Ok(());
        }

        if current.is_some() {
            tracing::info!(file = %latest.display(), "newer log file detected");
        }
        self.handoff(latest, parent);

        Ok(())
    }

    /// Cancels the active session (without waiting for it) and starts a new
    /// one on `path`.
    fn handoff(&mut self, path: PathBuf, parent: &CancellationToken) {
        if let Some(old) = self.active.take() {
            tracing::debug!(file = %old.path.display(), session = old.id, "cancelling session");
            old.cancel.cancel();
        }

        let id = self.next_id;
        self.next_id += 1;

        let cancel = parent.child_token();
        let session = TailSession::new(
            path.clone(),
            cancel.clone(),
            self.history_lines,
            Arc::clone(&self.sink),
        );
        self.sessions.spawn(async move {
            // A panicking sink must not leave the session's id unaccounted for.
            let end = match std::panic::AssertUnwindSafe(session.run()).catch_unwind().await {
                Ok(end) => end,
                Err(_panic) => {
                    tracing::error!(session = id, "tail session panicked");
                    SessionEnd::Failed
                }
            };
            (id, end)
        });

        if let Some(tx) = &self.on_rotate {
            let _ = tx.send(path.clone());
        }

        self.active = Some(ActiveSession { id, path, cancel });
    }

    /// Handles a finished session task.
    fn reap(
        &mut self,
        res: std::result::Result<(SessionId, SessionEnd), JoinError>,
        parent: &CancellationToken,
    ) -> Result<()> {
        let (id, end) = match res {
            Ok(done) => done,
            Err(e) => {
                // Panics are caught inside the task, so this is a task torn
                // down from outside. Without an id, drop the active session
                // so the next rescan restarts it.
                tracing::error!(error = %e, "tail session task failed");
                if let Some(active) = self.active.take() {
                    active.cancel.cancel();
                }
                return Ok(());
            }
        };

        let was_active = self.active.as_ref().map_or(false, |active| active.id == id);
        if !was_active || end == SessionEnd::Cancelled {
            return Ok(());
        }

        // The current file stopped being followable on its own (deleted, or
        // unreadable). Go back to idle and see what is newest now.
        if let Some(active) = self.active.take() {
            tracing::info!(file = %active.path.display(), reason = ?end, "current log file ended");
        }

        if end == SessionEnd::Failed {
            // Re-selecting immediately would pick the same unreadable file
            // again; wait for the next directory event instead.
            return Ok(());
        }

        self.rescan(parent)
    }

    /// Cancels every session and waits until all of them have finished.
    async fn shutdown(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
        }

        while let Some(res) = self.sessions.join_next().await {
            if let Err(e) = res {
                tracing::error!(error = %e, "tail session task failed");
            }
        }
    }
}
