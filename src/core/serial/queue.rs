//! Pending command queue
//! Holds dispense commands that could not be written because the device was
//! unavailable. Entries leave the head only after a confirmed write; a failed
//! replay puts the entry back at the head.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::serial::commands::DispenseCommand;

/// One deferred dispense request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueuedCommand {
    pub command: DispenseCommand,
    pub reason: String,
    pub queued_at: DateTime<Utc>,
}

impl QueuedCommand {
    pub fn new(command: DispenseCommand, reason: String) -> Self {
        Self {
            command,
            reason,
            queued_at: Utc::now(),
        }
    }

    pub fn amount(&self) -> u8 {
        self.command.amount()
    }

    /// Time spent waiting in the queue, as of `now`
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.queued_at)
    }
}

/// Returned by [`CommandQueue::enqueue`] when a configured bound is reached.
/// Hands the rejected entry back to the caller.
#[derive(Debug)]
pub struct QueueFull(pub QueuedCommand);

/// FIFO of pending dispense commands
#[derive(Debug, Default)]
pub struct CommandQueue {
    entries: VecDeque<QueuedCommand>,
    capacity: Option<usize>,
}

impl CommandQueue {
    /// Creates a queue. `None` means unbounded.
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
        }
    }

    /// Appends at the tail
    pub fn enqueue(&mut self, entry: QueuedCommand) -> Result<usize, QueueFull> {
        if self.is_full() {
            return Err(QueueFull(entry));
        }
        self.entries.push_back(entry);
        Ok(self.entries.len())
    }

    /// Removes the head entry for a write attempt
    pub fn pop_front(&mut self) -> Option<QueuedCommand> {
        self.entries.pop_front()
    }

    /// Puts an entry whose write failed back at the head. Ignores the bound:
    /// the entry was already accepted.
    pub fn requeue_front(&mut self, entry: QueuedCommand) {
        self.entries.push_front(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.capacity
            .map(|capacity| self.entries.len() >= capacity)
            .unwrap_or(false)
    }

    /// Snapshot of the pending entries, head first
    pub fn snapshot(&self) -> Vec<QueuedCommand> {
        self.entries.iter().cloned().collect()
    }
}
