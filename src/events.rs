//! Everything related to watching a directory for file creations,
//! modifications and attribute changes.

use std::collections::HashSet;
use std::fmt::{self, Debug, Formatter};
use std::io;
use std::path::{Path, PathBuf};

use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Coarse classification of a directory notification.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DirEventKind {
    Create,
    Write,
    AttributeChange,
    Other,
}

impl DirEventKind {
    /// Whether an event of this kind may have changed which file is newest.
    pub fn triggers_rescan(self) -> bool {
        !matches!(self, DirEventKind::Other)
    }
}

impl From<&EventKind> for DirEventKind {
    fn from(kind: &EventKind) -> Self {
        match kind {
            EventKind::Create(_) => DirEventKind::Create,
            EventKind::Modify(ModifyKind::Metadata(_)) => DirEventKind::AttributeChange,
            // A name showing up in the directory is a creation as far as
            // ranking is concerned.
            EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Both)) => {
                DirEventKind::Create
            }
            EventKind::Modify(ModifyKind::Name(_)) => DirEventKind::Other,
            // Windows and the poll backend report `Any` for plain writes.
            EventKind::Modify(_) => DirEventKind::Write,
            _ => DirEventKind::Other,
        }
    }
}

/// A single filesystem notification for the watched directory.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DirEvent {
    kind: DirEventKind,
    paths: Vec<PathBuf>,
}

impl DirEvent {
    pub fn kind(&self) -> DirEventKind {
        self.kind
    }

    /// Paths named by the notification. Informational only: a notification
    /// proves that one file changed, not which file is newest.
    pub fn paths(&self) -> &[PathBuf] {
        self.paths.as_slice()
    }

    /// Returns `true` if the notification names `path` itself.
    pub fn concerns(&self, path: &Path) -> bool {
        self.paths.iter().any(|p| p == path)
    }
}

impl From<notify::Event> for DirEvent {
    fn from(event: notify::Event) -> Self {
        DirEvent {
            kind: DirEventKind::from(&event.kind),
            paths: event.paths,
        }
    }
}

/// Manages directory watches and hands out the resulting events.
///
/// Internally, `DirEvents` contains a [`notify::Watcher`] from where
/// filesystem events are proxied into an async channel.
///
/// [`notify::Watcher`]: ../notify/trait.Watcher.html
pub struct DirEvents {
    inner: notify::RecommendedWatcher,
    watched_directories: HashSet<PathBuf>,
    event_stream: mpsc::UnboundedReceiver<notify::Result<notify::Event>>,
}

impl Debug for DirEvents {
    fn fmt(&self, f: &mut Formatter) -> std::result::Result<(), fmt::Error> {
        f.debug_struct("DirEvents")
            .field("watched_directories", &self.watched_directories)
            .finish()
    }
}

impl DirEvents {
    /// Constructs a new `DirEvents` instance.
    pub fn new() -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = notify::RecommendedWatcher::new(
            move |res| {
                // The only way `send` can fail is if the receiver is dropped,
                // and `DirEvents` controls both.
                let _ = tx.send(res);
            },
            notify::Config::default(),
        )?;

        Ok(DirEvents {
            inner,
            watched_directories: HashSet::new(),
            event_stream: rx,
        })
    }

    /// Adds a non-recursive watch for the given directory.
    ///
    /// Returns the absolute version of the path originally supplied. Watching
    /// the same directory twice is a no-op.
    pub fn watch_directory(&mut self, path: impl Into<PathBuf>) -> Result<PathBuf> {
        let path = absolutify(path)?;

        let meta = std::fs::metadata(&path).map_err(|source| Error::DirectoryUnavailable {
            path: path.clone(),
            source,
        })?;
        if !meta.is_dir() {
            return Err(Error::NotADirectory(path));
        }

        if self.watched_directories.contains(&path) {
            return Ok(path);
        }

        self.inner.watch(&path, RecursiveMode::NonRecursive)?;
        self.watched_directories.insert(path.clone());

        Ok(path)
    }

    /// Waits for the next notification.
    ///
    /// `Some(Err(_))` is a transient watch error; the stream keeps going.
    /// `None` means the underlying watcher is gone.
    pub async fn next_event(&mut self) -> Option<Result<DirEvent>> {
        self.event_stream.recv().await.map(convert)
    }
}

fn convert(res: notify::Result<notify::Event>) -> Result<DirEvent> {
    res.map(DirEvent::from).map_err(|e| match e.kind {
        notify::ErrorKind::Io(io_err) => Error::Io(io_err),
        _ => Error::Watch(e),
    })
}

pub(crate) fn absolutify(path: impl Into<PathBuf>) -> io::Result<PathBuf> {
    let path = path.into();

    let path = if path.is_relative() {
        std::env::current_dir()?.join(path)
    } else {
        path
    };

    let path = if let Ok(abs_path) = path.canonicalize() {
        abs_path
    } else {
        path
    };

    Ok(path)
}
