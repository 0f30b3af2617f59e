//! Outbound message queue
//!
//! Ordered buffer of serialized messages awaiting delivery. Messages are
//! appended in call order and removed only after a successful send, so a
//! failed flush leaves the remainder queued for the next attempt. No upper
//! bound and no persistence; volume is low and restarts start clean.

use std::collections::VecDeque;

#[derive(Debug, Default)]
pub struct OutboundQueue {
    entries: VecDeque<String>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a serialized message at the tail
    pub fn push(&mut self, message: String) {
        self.entries.push_back(message);
    }

    /// Peek at the oldest undelivered message
    pub fn front(&self) -> Option<&str> {
        self.entries.front().map(String::as_str)
    }

    /// Remove the oldest message after it was delivered
    pub fn pop_front(&mut self) -> Option<String> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
