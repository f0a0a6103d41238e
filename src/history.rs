//! Bounded backward scan for the last few lines of a file.

use std::collections::VecDeque;
use std::io;
use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::reader::decode_line;

/// Size of each backward read.
const CHUNK: u64 = 8 * 1024;

/// Lines already present in a file when a session starts.
#[derive(Debug, Default)]
pub struct History {
    lines: Vec<io::Result<String>>,
    end_offset: u64,
}

impl History {
    /// Byte offset just past the last complete line. Following from here
    /// neither repeats nor skips anything.
    pub fn end_offset(&self) -> u64 {
        self.end_offset
    }

    /// The lines, oldest first. A line that is not valid UTF-8 is an `Err`.
    pub fn into_lines(self) -> Vec<io::Result<String>> {
        self.lines
    }
}

/// Reads up to the last `n` complete lines of `path`.
///
/// The file is scanned backwards in fixed-size chunks and the scan stops as
/// soon as enough newlines have been seen, so the cost is bounded by the size
/// of the lines returned rather than the size of the file. An unterminated
/// trailing line is not part of the history.
pub async fn last_lines(path: impl AsRef<Path>, n: usize) -> io::Result<History> {
    let mut file = File::open(path.as_ref()).await?;
    let len = file.metadata().await?.len();

    // Bytes from `start` to `len`, read back to front.
    let mut tail: VecDeque<u8> = VecDeque::new();
    let mut start = len;
    let mut end_offset = None;
    let mut newlines = 0usize;

    while start > 0 {
        let step = CHUNK.min(start);
        start -= step;

        let mut chunk = vec![0u8; step as usize];
        file.seek(io::SeekFrom::Start(start)).await?;
        file.read_exact(&mut chunk).await?;

        for (i, &b) in chunk.iter().enumerate().rev() {
            if b == b'\n' {
                if end_offset.is_none() {
                    end_offset = Some(start + i as u64 + 1);
                }
                newlines += 1;
            }
        }
        for &b in chunk.iter().rev() {
            tail.push_front(b);
        }

        // One newline terminates each of the `n` lines, plus the one that
        // terminates the line before them.
        if newlines > n {
            break;
        }
    }

    let end_offset = match end_offset {
        Some(end) => end,
        None => {
            return Ok(History {
                lines: Vec::new(),
                end_offset: 0,
            })
        }
    };

    let complete = (end_offset - start) as usize;
    let mut bytes: Vec<u8> = tail.into_iter().take(complete).collect();
    let mut lines = crate::reader::split_complete_lines(&mut bytes);

    if lines.len() > n {
        lines.drain(..lines.len() - n);
    }

    Ok(History {
        lines: lines.into_iter().map(decode_line).collect(),
        end_offset,
    })
}
