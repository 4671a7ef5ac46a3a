//! Bounded, de-duplicating line buffer shared between the follow loop and
//! readers.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// Default number of lines kept in memory.
pub const DEFAULT_CAPACITY: usize = 500;

/// Ring buffer of recent log lines.
///
/// Never holds two identical adjacent lines and never grows past its
/// capacity; the oldest line is evicted first.
pub struct LogBuffer {
    capacity: usize,
    lines: Mutex<VecDeque<String>>,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn guard(&self) -> MutexGuard<'_, VecDeque<String>> {
        // A panic mid-push cannot leave the deque inconsistent.
        self.lines.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append `line`, returning `false` if it repeats the last entry.
    pub fn append(&self, line: impl Into<String>) -> bool {
        let line = line.into();
        let mut lines = self.guard();
        if lines.back() == Some(&line) {
            return false;
        }
        if lines.len() >= self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
        true
    }

    /// Swap the whole contents, keeping the newest `capacity` lines and
    /// collapsing adjacent repeats.
    pub fn replace<I>(&self, lines: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut fresh: VecDeque<String> = VecDeque::with_capacity(self.capacity);
        for line in lines {
            if fresh.back() == Some(&line) {
                continue;
            }
            if fresh.len() >= self.capacity {
                fresh.pop_front();
            }
            fresh.push_back(line);
        }
        *self.guard() = fresh;
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.guard().iter().cloned().collect()
    }

    pub fn last(&self) -> Option<String> {
        self.guard().back().cloned()
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }

    pub fn clear(&self) {
        self.guard().clear();
    }
}
