//! Where tailed lines end up.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// Destination for emitted lines.
///
/// Implementations must write each line as a unit: concurrent sessions may
/// emit at the same time, and lines may interleave with each other but never
/// within themselves.
pub trait LineSink: Send + Sync {
    fn emit(&self, line: &str);
}

impl<S: LineSink + ?Sized> LineSink for Arc<S> {
    fn emit(&self, line: &str) {
        (**self).emit(line)
    }
}

/// Writes lines to standard output.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdoutSink;

impl LineSink for StdoutSink {
    fn emit(&self, line: &str) {
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');

        // One `write_all` under the lock keeps the line in one piece.
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        if let Err(e) = handle.write_all(buf.as_bytes()).and_then(|()| handle.flush()) {
            tracing::debug!(error = %e, "failed to write line to stdout");
        }
    }
}

/// Keeps every emitted line in memory.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the lines emitted so far, in emission order.
    pub fn lines(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(lines) => lines.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        match self.lines.lock() {
            Ok(lines) => lines.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LineSink for MemorySink {
    fn emit(&self, line: &str) {
        let mut lines = match self.lines.lock() {
            Ok(lines) => lines,
            Err(poisoned) => poisoned.into_inner(),
        };
        lines.push(line.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_shared_between_clones() {
        let sink = MemorySink::new();
        let other = sink.clone();

        sink.emit("one");
        other.emit("two");

        assert_eq!(sink.lines(), vec!["one", "two"]);
        assert_eq!(other.len(), 2);
    }

    #[test]
    fn test_arc_dyn_sink() {
        let sink = MemorySink::new();
        let shared: Arc<dyn LineSink> = Arc::new(sink.clone());

        shared.emit("via arc");
        assert_eq!(sink.lines(), vec!["via arc"]);
    }

    #[test]
    fn test_concurrent_lines_stay_whole() {
        let sink = MemorySink::new();

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let sink = sink.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        sink.emit(&format!("thread {} line {}", t, i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let lines = sink.lines();
        assert_eq!(lines.len(), 400);
        assert!(lines.iter().all(|l| l.starts_with("thread ")));
    }
}
