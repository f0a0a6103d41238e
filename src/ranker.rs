//! Deciding which file in a directory is the "current" log.

use std::cmp::Ordering;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::{Error, Result};

/// One entry of a directory listing, as far as ranking cares.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DirectoryEntry {
    pub name: OsString,
    pub modified: SystemTime,
    /// Regular file (after following symlinks). Nothing else is followable.
    pub is_file: bool,
}

impl DirectoryEntry {
    pub fn new(name: impl Into<OsString>, modified: SystemTime, is_file: bool) -> Self {
        DirectoryEntry {
            name: name.into(),
            modified,
            is_file,
        }
    }

    /// Newest first; equal timestamps fall back to the larger name.
    fn rank(&self, other: &Self) -> Ordering {
        self.modified
            .cmp(&other.modified)
            .then_with(|| self.name.cmp(&other.name))
    }
}

/// Takes a fresh snapshot of `dir`.
///
/// Entries that vanish between being listed and being stat'ed, or that
/// cannot be stat'ed at all, are skipped. Failure to read the directory
/// itself is an [`Error::Listing`].
pub fn list(dir: &Path) -> Result<Vec<DirectoryEntry>> {
    let listing_err = |source: io::Error| Error::Listing {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(listing_err)? {
        let entry = entry.map_err(listing_err)?;

        let meta = match std::fs::metadata(entry.path()) {
            Ok(meta) => meta,
            // Vanished, or a dangling symlink.
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(entry = ?entry.file_name(), "entry vanished while listing");
                continue;
            }
            Err(e) => {
                tracing::warn!(entry = ?entry.file_name(), error = %e, "skipping unreadable entry");
                continue;
            }
        };
        let modified = meta.modified().map_err(listing_err)?;

        entries.push(DirectoryEntry::new(entry.file_name(), modified, meta.is_file()));
    }

    Ok(entries)
}

/// Picks the newest regular file. Directories, FIFOs, sockets and device
/// nodes never qualify. The result does not depend on the order of `entries`.
pub fn select_from(entries: &[DirectoryEntry]) -> Option<&DirectoryEntry> {
    entries
        .iter()
        .filter(|entry| entry.is_file)
        .max_by(|a, b| a.rank(b))
}

/// Lists `dir` and returns the full path of its current file, if any.
pub fn select(dir: &Path) -> Result<Option<PathBuf>> {
    let entries = list(dir)?;
    Ok(select_from(&entries).map(|entry| dir.join(&entry.name)))
}
