//! Per-job diagnostic buffers.
//!
//! Workers collect the lines for one call in a [`JobLog`] and emit them in
//! one block through the shared [`LogSink`], so concurrent jobs never
//! interleave inside each other's output.

use std::sync::{Mutex, PoisonError};

use tracing::{debug, error, info, warn, Level};

/// Serializes job log flushes.
#[derive(Debug, Default)]
pub struct LogSink {
    lock: Mutex<()>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Buffered log lines for one unit of work.
#[derive(Debug, Clone)]
pub struct JobLog {
    label: String,
    lines: Vec<(Level, String)>,
}

impl JobLog {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            lines: Vec::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn debug(&mut self, message: impl Into<String>) {
        self.lines.push((Level::DEBUG, message.into()));
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.lines.push((Level::INFO, message.into()));
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.lines.push((Level::WARN, message.into()));
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.lines.push((Level::ERROR, message.into()));
    }

    pub fn lines(&self) -> &[(Level, String)] {
        &self.lines
    }

    /// Whether any buffered line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|(_, line)| line.contains(needle))
    }

    /// Emit all lines as one contiguous block.
    pub fn flush(self, sink: &LogSink) {
        if self.lines.is_empty() {
            return;
        }
        let _guard = sink.lock.lock().unwrap_or_else(PoisonError::into_inner);
        for (level, line) in &self.lines {
            match *level {
                Level::ERROR => error!("[{}] {}", self.label, line),
                Level::WARN => warn!("[{}] {}", self.label, line),
                Level::INFO => info!("[{}] {}", self.label, line),
                _ => debug!("[{}] {}", self.label, line),
            }
        }
    }
}
