//! Fixed-capacity console history for one server process

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of lines retained per server
pub const DEFAULT_CONSOLE_CAPACITY: usize = 1000;

/// One line of server output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsoleLine {
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Circular store of console lines; the oldest line is overwritten once full.
#[derive(Debug, Clone)]
pub struct ConsoleBuffer {
    slots: Vec<Option<ConsoleLine>>,
    /// Index of the next slot to write
    head: usize,
    len: usize,
}

impl ConsoleBuffer {
    /// Create a buffer holding at most `capacity` lines (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: vec![None; capacity],
            head: 0,
            len: 0,
        }
    }

    /// Append a line stamped with the current time
    pub fn push(&mut self, text: impl Into<String>) -> ConsoleLine {
        let line = ConsoleLine {
            text: text.into(),
            timestamp: Utc::now(),
        };
        self.slots[self.head] = Some(line.clone());
        self.head = (self.head + 1) % self.slots.len();
        self.len = (self.len + 1).min(self.slots.len());
        line
    }

    /// Lines held, oldest first
    pub fn lines(&self) -> Vec<ConsoleLine> {
        let capacity = self.slots.len();
        let start = (self.head + capacity - self.len) % capacity;
        (0..self.len)
            .filter_map(|offset| self.slots[(start + offset) % capacity].clone())
            .collect()
    }

    /// Drop every line
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.head = 0;
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl Default for ConsoleBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CONSOLE_CAPACITY)
    }
}
