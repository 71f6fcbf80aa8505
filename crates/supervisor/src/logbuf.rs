//! Bounded in-memory log buffer.

use std::collections::VecDeque;

use deckhand_core_types::{LogEntry, LogSink};
use parking_lot::Mutex;

/// Ring buffer of normalized log entries.
///
/// Append-only from the writer's point of view; overflow evicts the oldest
/// entry and counts it so readers can detect truncation. Insertion order is
/// preserved verbatim.
pub struct LogBuffer {
    inner: Mutex<Inner>,
}

struct Inner {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    dropped: u64,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: VecDeque::new(),
                capacity: capacity.max(1),
                dropped: 0,
            }),
        }
    }

    pub fn push(&self, entry: LogEntry) {
        let mut inner = self.inner.lock();
        if inner.entries.len() == inner.capacity {
            inner.entries.pop_front();
            inner.dropped += 1;
        }
        inner.entries.push_back(entry);
    }

    /// Snapshot in insertion order.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.inner.lock().entries.iter().cloned().collect()
    }

    /// Snapshot and empty the buffer in one step.
    pub fn drain(&self) -> Vec<LogEntry> {
        self.inner.lock().entries.drain(..).collect()
    }

    /// Entries evicted by the capacity bound since creation.
    pub fn dropped(&self) -> u64 {
        self.inner.lock().dropped
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LogSink for LogBuffer {
    fn append(&self, entry: LogEntry) {
        self.push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deckhand_core_types::{LogCategory, LogLevel};

    fn entry(message: &str) -> LogEntry {
        LogEntry::new(LogCategory::Console, LogLevel::Info, message, "test")
    }

    #[test]
    fn preserves_insertion_order() {
        let buffer = LogBuffer::new(10);
        for i in 0..5 {
            buffer.push(entry(&format!("m{i}")));
        }
        let messages: Vec<_> = buffer.snapshot().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, ["m0", "m1", "m2", "m3", "m4"]);
    }

    #[test]
    fn evicts_oldest_and_counts() {
        let buffer = LogBuffer::new(3);
        for i in 0..5 {
            buffer.push(entry(&format!("m{i}")));
        }
        let messages: Vec<_> = buffer.snapshot().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, ["m2", "m3", "m4"]);
        assert_eq!(buffer.dropped(), 2);
    }

    #[test]
    fn drain_empties_the_buffer() {
        let buffer = LogBuffer::new(10);
        buffer.push(entry("a"));
        buffer.push(entry("b"));

        let drained = buffer.drain();
        assert_eq!(drained.len(), 2);
        assert!(buffer.is_empty());
        assert!(buffer.snapshot().is_empty());
    }
}
