//! Turning termination signals into one orderly shutdown.
//!
//! ## Signals
//! **Unix platforms:**
//! - `SIGINT` (Ctrl-C in terminal)
//! - `SIGTERM` (default kill signal, used by systemd/Kubernetes)
//! - `SIGQUIT`
//!
//! **Other platforms:**
//! - `Ctrl-C` via [`tokio::signal::ctrl_c`]

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default time allowed for cleanup once shutdown starts.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(2);

/// How a driven future finished after shutdown was requested.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Shutdown {
    /// Finished (on its own, or within the grace period).
    Completed,
    /// Still running when the grace period ran out; abandoned.
    GraceExceeded,
}

/// Owns the process-wide cancellation token.
///
/// Cloning is cheap and every clone refers to the same token.
#[derive(Clone, Debug)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    fired: Arc<AtomicBool>,
    grace: Duration,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE)
    }
}

impl ShutdownCoordinator {
    pub fn new(grace: Duration) -> Self {
        ShutdownCoordinator {
            token: CancellationToken::new(),
            fired: Arc::new(AtomicBool::new(false)),
            grace,
        }
    }

    /// The parent token; derive per-session tokens from it with
    /// [`CancellationToken::child_token`].
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    pub fn is_triggered(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Fires the parent token.
    ///
    /// Returns `true` only for the call that actually started the shutdown;
    /// later calls have no further effect.
    pub fn trigger(&self) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.token.cancel();
        true
    }

    /// Spawns a task that triggers shutdown on every termination signal.
    ///
    /// The handlers are registered before this returns, so a signal sent
    /// right afterwards is already a graceful shutdown.
    pub fn listen_for_signals(&self) -> JoinHandle<()> {
        let coordinator = self.clone();
        let signals = TerminationSignals::new();

        tokio::spawn(async move {
            let mut signals = match signals {
                Ok(signals) => signals,
                Err(e) => {
                    tracing::error!(error = %e, "failed to listen for termination signals");
                    return;
                }
            };

            loop {
                if let Err(e) = signals.recv().await {
                    tracing::error!(error = %e, "failed to listen for termination signals");
                    return;
                }

                if coordinator.trigger() {
                    tracing::info!("received termination signal, shutting down gracefully");
                } else {
                    tracing::info!("already shutting down");
                }
            }
        })
    }

    /// Drives `fut` to completion, giving it at most the grace period once
    /// shutdown has been triggered.
    ///
    /// Exceeding the grace period is logged and reported as
    /// [`Shutdown::GraceExceeded`] rather than as an error: the process is
    /// going away regardless.
    pub async fn drive<F, T, E>(&self, fut: F) -> Result<Shutdown, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        tokio::pin!(fut);

        tokio::select! {
            res = &mut fut => return res.map(|_| Shutdown::Completed),
            _ = self.token.cancelled() => {}
        }

        match tokio::time::timeout(self.grace, fut).await {
            Ok(res) => res.map(|_| Shutdown::Completed),
            Err(_elapsed) => {
                tracing::warn!(grace = ?self.grace, "cleanup did not finish within grace period");
                Ok(Shutdown::GraceExceeded)
            }
        }
    }
}

/// Registered termination signal handlers.
#[cfg(unix)]
struct TerminationSignals {
    sigint: tokio::signal::unix::Signal,
    sigterm: tokio::signal::unix::Signal,
    sigquit: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl TerminationSignals {
    fn new() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(TerminationSignals {
            sigint: signal(SignalKind::interrupt())?,
            sigterm: signal(SignalKind::terminate())?,
            sigquit: signal(SignalKind::quit())?,
        })
    }

    async fn recv(&mut self) -> std::io::Result<()> {
        tokio::select! {
            _ = self.sigint.recv()  => {},
            _ = self.sigterm.recv() => {},
            _ = self.sigquit.recv() => {},
        }
        Ok(())
    }
}

#[cfg(not(unix))]
struct TerminationSignals;

#[cfg(not(unix))]
impl TerminationSignals {
    fn new() -> std::io::Result<Self> {
        Ok(TerminationSignals)
    }

    async fn recv(&mut self) -> std::io::Result<()> {
        tokio::signal::ctrl_c().await
    }
}
