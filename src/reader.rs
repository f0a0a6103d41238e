//! Everything related to reading lines appended to a single file.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{RecursiveMode, Watcher};
use tokio::fs::{metadata, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Interval used when a notify watch cannot be placed on the file.
const FALLBACK_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Upper bound on how long `stop` waits for the reader task to wind down.
const STOP_TIMEOUT: Duration = Duration::from_secs(1);

const READ_CHUNK: usize = 8 * 1024;

/// Where a [`Follower`] starts reading.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StartPosition {
    /// Start at the given byte offset. An offset past the end of the file
    /// means the file was truncated, and reading starts at 0.
    Offset(u64),
    /// Start at the end of the file as of `open`.
    End,
}

/// Follows a single file, yielding every complete line appended to it.
///
/// The actual reading happens on a background task which owns the file
/// handle and the notify watch. Both are released when the follower is
/// stopped or dropped.
pub struct Follower {
    path: PathBuf,
    lines: mpsc::UnboundedReceiver<io::Result<String>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl fmt::Debug for Follower {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("Follower")
            .field("path", &self.path)
            .field("stopped", &self.task.is_none())
            .finish()
    }
}

impl Follower {
    /// Opens `path` and starts following it from `start`.
    pub async fn open(path: impl Into<PathBuf>, start: StartPosition) -> io::Result<Self> {
        let path = path.into();
        let mut file = File::open(&path).await?;
        let len = file.metadata().await?.len();

        let pos = match start {
            StartPosition::End => len,
            StartPosition::Offset(offset) if offset > len => 0,
            StartPosition::Offset(offset) => offset,
        };
        file.seek(io::SeekFrom::Start(pos)).await?;

        let wakeup = Wakeup::new(&path);
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let state = ReadState {
            path: path.clone(),
            file,
            pos,
            partial: Vec::new(),
            identity: None,
        };
        let task = tokio::spawn(follow(state, wakeup, tx, cancel.clone()));

        Ok(Follower {
            path,
            lines: rx,
            cancel,
            task: Some(task),
        })
    }

    /// Waits for the next line.
    ///
    /// `Some(Err(_))` is a per-line failure; later lines are still delivered.
    /// `None` means the file went away or the follower was stopped.
    pub async fn next_line(&mut self) -> Option<io::Result<String>> {
        self.lines.recv().await
    }

    /// Stops the background reader and waits for it to release the file.
    ///
    /// Calling `stop` more than once is harmless.
    pub async fn stop(&mut self) -> io::Result<()> {
        self.cancel.cancel();
        self.lines.close();

        let task = match self.task.take() {
            Some(task) => task,
            None => return Ok(()),
        };

        match tokio::time::timeout(STOP_TIMEOUT, task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(join_err)) => Err(io::Error::new(io::ErrorKind::Other, join_err)),
            Err(_elapsed) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("reader for {} did not stop in time", self.path.display()),
            )),
        }
    }
}

impl Drop for Follower {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Source of "the file may have changed" signals.
struct Wakeup {
    rx: mpsc::Receiver<()>,
    // Kept alive for as long as the reader task runs.
    _watcher: Option<notify::RecommendedWatcher>,
    poll: Option<tokio::time::Interval>,
}

impl Wakeup {
    fn new(path: &Path) -> Self {
        let (tx, rx) = mpsc::channel(1);

        // Watch the parent directory rather than the file so that a new file
        // appearing under the same name still wakes the reader.
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let name = path.file_name().map(|n| n.to_os_string());

        let watcher = notify::RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| {
                let event = match res {
                    Ok(event) => event,
                    Err(_) => return,
                };
                let relevant = event.paths.is_empty()
                    || event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == name.as_deref());
                if relevant {
                    // A full channel already holds a pending wakeup.
                    let _ = tx.try_send(());
                }
            },
            notify::Config::default(),
        )
        .and_then(|mut watcher| {
            watcher.watch(&dir, RecursiveMode::NonRecursive)?;
            Ok(watcher)
        });

        match watcher {
            Ok(watcher) => Wakeup {
                rx,
                _watcher: Some(watcher),
                poll: None,
            },
            Err(e) => {
                tracing::warn!(
                    file = %path.display(),
                    error = %e,
                    "file watch unavailable, falling back to polling"
                );
                let mut interval = tokio::time::interval(FALLBACK_POLL_INTERVAL);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                Wakeup {
                    rx,
                    _watcher: None,
                    poll: Some(interval),
                }
            }
        }
    }

    async fn changed(&mut self) {
        match self.poll.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => {
                if self.rx.recv().await.is_none() {
                    std::future::pending::<()>().await;
                }
            }
        }
    }
}

#[derive(Debug, Eq, PartialEq)]
enum ReadOutcome {
    Open,
    Gone,
}

struct ReadState {
    path: PathBuf,
    file: File,
    /// Byte offset of the next unread byte.
    pos: u64,
    /// Bytes after the last newline seen; an incomplete line.
    partial: Vec<u8>,
    identity: Option<FileIdentity>,
}

impl ReadState {
    /// Reads everything appended since the last call and forwards complete
    /// lines to `tx`.
    async fn read_available(
        &mut self,
        tx: &mpsc::UnboundedSender<io::Result<String>>,
    ) -> io::Result<ReadOutcome> {
        let on_disk = match metadata(&self.path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ReadOutcome::Gone),
            Err(e) => return Err(e),
        };

        let current = FileIdentity::of(&on_disk);
        if self.identity.is_none() {
            self.identity = FileIdentity::of(&self.file.metadata().await?);
        }

        if current.is_some() && current != self.identity {
            // Replaced under the same name; follow the new file from its start.
            tracing::info!(file = %self.path.display(), "file replaced, reopening");
            self.file = File::open(&self.path).await?;
            self.identity = current;
            self.rewind().await?;
        } else if on_disk.len() < self.pos {
            tracing::info!(
                file = %self.path.display(),
                old_pos = self.pos,
                new_len = on_disk.len(),
                "file truncated, reading from start"
            );
            self.rewind().await?;
        }

        let mut buf = [0u8; READ_CHUNK];
        loop {
            let n = self.file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            self.pos += n as u64;
            self.partial.extend_from_slice(&buf[..n]);
        }

        for line in split_complete_lines(&mut self.partial) {
            if tx.send(decode_line(line)).is_err() {
                // Nobody is listening anymore.
                return Ok(ReadOutcome::Gone);
            }
        }

        Ok(ReadOutcome::Open)
    }

    async fn rewind(&mut self) -> io::Result<()> {
        self.file.seek(io::SeekFrom::Start(0)).await?;
        self.pos = 0;
        self.partial.clear();
        Ok(())
    }
}

async fn follow(
    mut state: ReadState,
    mut wakeup: Wakeup,
    tx: mpsc::UnboundedSender<io::Result<String>>,
    cancel: CancellationToken,
) {
    loop {
        match state.read_available(&tx).await {
            Ok(ReadOutcome::Open) => {}
            Ok(ReadOutcome::Gone) => {
                tracing::debug!(file = %state.path.display(), "followed file is gone");
                break;
            }
            Err(e) => {
                if tx.send(Err(e)).is_err() {
                    break;
                }
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = wakeup.changed() => {}
        }
    }
}

/// Drains every newline-terminated line from the front of `buf`, leaving any
/// incomplete trailing line in place.
pub(crate) fn split_complete_lines(buf: &mut Vec<u8>) -> Vec<Vec<u8>> {
    let mut lines = Vec::new();

    while let Some(idx) = buf.iter().position(|&b| b == b'\n') {
        let mut line: Vec<u8> = buf.drain(..=idx).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        lines.push(line);
    }

    lines
}

pub(crate) fn decode_line(line: Vec<u8>) -> io::Result<String> {
    String::from_utf8(line).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Identifies the underlying file independently of its name.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct FileIdentity {
    dev: u64,
    ino: u64,
}

impl FileIdentity {
    #[cfg(unix)]
    fn of(meta: &std::fs::Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;

        Some(FileIdentity {
            dev: meta.dev(),
            ino: meta.ino(),
        })
    }

    #[cfg(not(unix))]
    fn of(_meta: &std::fs::Metadata) -> Option<Self> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    fn append(path: &Path, data: &[u8]) {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(data).unwrap();
        file.sync_all().unwrap();
    }

    #[test]
    fn test_split_keeps_partial() {
        let mut buf = b"foo\nbar\r\nba".to_vec();
        let lines = split_complete_lines(&mut buf);

        assert_eq!(lines, vec![b"foo".to_vec(), b"bar".to_vec()]);
        assert_eq!(buf, b"ba".to_vec());

        buf.extend_from_slice(b"z\n");
        assert_eq!(split_complete_lines(&mut buf), vec![b"baz".to_vec()]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_split_empty_lines() {
        let mut buf = b"\n\nx\n".to_vec();
        let lines = split_complete_lines(&mut buf);
        assert_eq!(lines, vec![Vec::new(), Vec::new(), b"x".to_vec()]);
    }

    #[test]
    fn test_decode_invalid_utf8() {
        let err = decode_line(vec![0xff, 0xfe]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert_eq!(decode_line(b"ok".to_vec()).unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        let tmp_dir = tempdir().unwrap();
        let res = Follower::open(tmp_dir.path().join("missing.log"), StartPosition::End).await;
        assert!(res.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_follow_from_end() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("app.log");
        std::fs::write(&path, b"old 1\nold 2\n").unwrap();

        let mut follower = Follower::open(&path, StartPosition::End).await.unwrap();

        append(&path, b"new 1\nnew ");
        append(&path, b"2\n");

        let first = timeout(WAIT, follower.next_line()).await.unwrap().unwrap();
        let second = timeout(WAIT, follower.next_line()).await.unwrap().unwrap();
        assert_eq!(first.unwrap(), "new 1");
        assert_eq!(second.unwrap(), "new 2");

        follower.stop().await.unwrap();
        follower.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_follow_from_offset() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("app.log");
        std::fs::write(&path, b"seen\nunseen\n").unwrap();

        let mut follower = Follower::open(&path, StartPosition::Offset(5))
            .await
            .unwrap();

        let line = timeout(WAIT, follower.next_line()).await.unwrap().unwrap();
        assert_eq!(line.unwrap(), "unseen");

        follower.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_offset_past_end_restarts() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("app.log");
        std::fs::write(&path, b"short\n").unwrap();

        let mut follower = Follower::open(&path, StartPosition::Offset(4096))
            .await
            .unwrap();

        let line = timeout(WAIT, follower.next_line()).await.unwrap().unwrap();
        assert_eq!(line.unwrap(), "short");

        follower.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_truncation_rereads() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("app.log");
        std::fs::write(&path, b"a fairly long first line\n").unwrap();

        let mut follower = Follower::open(&path, StartPosition::End).await.unwrap();

        // Truncate in place, then write fresh content.
        std::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        append(&path, b"fresh\n");

        let line = timeout(WAIT, follower.next_line()).await.unwrap().unwrap();
        assert_eq!(line.unwrap(), "fresh");

        follower.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_bad_line_does_not_end_stream() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("app.log");
        std::fs::write(&path, b"").unwrap();

        let mut follower = Follower::open(&path, StartPosition::End).await.unwrap();

        append(&path, b"\xff\xfe\ngood\n");

        let bad = timeout(WAIT, follower.next_line()).await.unwrap().unwrap();
        assert_eq!(bad.unwrap_err().kind(), io::ErrorKind::InvalidData);
        let good = timeout(WAIT, follower.next_line()).await.unwrap().unwrap();
        assert_eq!(good.unwrap(), "good");

        follower.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_deleted_file_closes_stream() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("app.log");
        std::fs::write(&path, b"x\n").unwrap();

        let mut follower = Follower::open(&path, StartPosition::End).await.unwrap();
        std::fs::remove_file(&path).unwrap();

        let end = timeout(WAIT, follower.next_line()).await.unwrap();
        assert!(end.is_none());

        follower.stop().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread")]
    async fn test_replaced_file_reopened() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("app.log");
        std::fs::write(&path, b"before rotation\n").unwrap();

        let mut follower = Follower::open(&path, StartPosition::End).await.unwrap();

        // Atomically swap a new file in under the same name.
        let staged = tmp_dir.path().join("app.log.tmp");
        std::fs::write(&staged, b"after rotation\nmore\n").unwrap();
        std::fs::rename(&staged, &path).unwrap();

        let first = timeout(WAIT, follower.next_line()).await.unwrap().unwrap();
        assert_eq!(first.unwrap(), "after rotation");
        let second = timeout(WAIT, follower.next_line()).await.unwrap().unwrap();
        assert_eq!(second.unwrap(), "more");

        follower.stop().await.unwrap();
    }
}
