//! Error taxonomy shared by every layer of the tailer.
//!
//! Only directory-level failures are represented here. Problems with a single
//! line or a single watch notification are absorbed (logged) where they occur
//! and never become an `Error`.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Error opening directory [{}]: {source}. Does it exist?", path.display())]
    DirectoryUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
    #[error("Failed to list directory [{}]: {source}", path.display())]
    Listing {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to watch directory: {0}")]
    Watch(#[from] notify::Error),
    #[error("Directory watch stopped delivering events")]
    WatchClosed,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Returns `true` if the error means the watched directory can no longer
    /// be observed.
    pub fn is_directory_lost(&self) -> bool {
        matches!(
            self,
            Error::DirectoryUnavailable { .. } | Error::NotADirectory(_) | Error::Listing { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
