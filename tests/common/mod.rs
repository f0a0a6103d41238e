#![allow(dead_code)]

use std::io::Write;
use std::path::Path;
use std::time::{Duration, SystemTime};

use curtail::MemorySink;
use tokio::time;

pub const WAIT: Duration = Duration::from_secs(5);

pub fn numbered(prefix: &str, range: std::ops::RangeInclusive<usize>) -> Vec<String> {
    range.map(|i| format!("{} {}", prefix, i)).collect()
}

pub fn as_file(lines: &[String]) -> String {
    lines.iter().map(|l| format!("{}\n", l)).collect()
}

pub fn write_with_mtime(path: &Path, content: &str, mtime: SystemTime) {
    std::fs::write(path, content).unwrap();
    set_mtime(path, mtime);
}

pub fn set_mtime(path: &Path, mtime: SystemTime) {
    std::fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(mtime)
        .unwrap();
}

pub fn append(path: &Path, data: &str) {
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(path)
        .unwrap();
    file.write_all(data.as_bytes()).unwrap();
    file.sync_all().unwrap();
}

/// Waits until `sink` holds at least `len` lines.
pub async fn wait_for_lines(sink: &MemorySink, len: usize) {
    let res = time::timeout(WAIT, async {
        while sink.len() < len {
            time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    if res.is_err() {
        panic!("expected {} lines, got {:?}", len, sink.lines());
    }
}

/// Gives background tasks a moment to do something they should not.
pub async fn settle() {
    time::sleep(Duration::from_millis(300)).await;
}

/// Number of descriptors this process holds open on `path`.
#[cfg(target_os = "linux")]
pub fn open_handles(path: &Path) -> usize {
    std::fs::read_dir("/proc/self/fd")
        .unwrap()
        .filter_map(|entry| std::fs::read_link(entry.ok()?.path()).ok())
        .filter(|target| target == path)
        .count()
}
