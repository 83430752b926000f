//! Retry queue for guest connections that were refused.
//!
//! A refused connect means the guest has not bound its listening socket
//! yet. Every request gets the same fixed delay measured from its own
//! enqueue time, so arrival order equals deadline order and the queue
//! never needs re-sorting: the head is always the earliest deadline.

use std::collections::VecDeque;
use std::path::PathBuf;

use tokio::time::Instant;

/// One pending connection attempt.
#[derive(Debug, Clone)]
pub struct RetryRequest {
    /// Instance name derived from the socket filename.
    pub name: String,

    /// Full path of the guest socket file.
    pub path: PathBuf,

    /// Earliest time the next attempt may run.
    pub next_attempt: Instant,
}

/// Arrival-ordered queue of pending retries.
#[derive(Debug, Default)]
pub struct RetryQueue {
    queue: VecDeque<RetryRequest>,
}

impl RetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Append at the tail.
    pub fn enqueue(&mut self, request: RetryRequest) {
        self.queue.push_back(request);
    }

    /// Deadline of the head entry; `None` means the reactor may wait
    /// indefinitely.
    pub fn peek_deadline(&self) -> Option<Instant> {
        self.queue.front().map(|r| r.next_attempt)
    }

    /// Pop every request whose deadline has passed, head-first, stopping
    /// at the first not-yet-due entry. The remainder keeps its order.
    pub fn drain_ready(&mut self, now: Instant) -> Vec<RetryRequest> {
        let mut ready = Vec::new();
        while self
            .queue
            .front()
            .is_some_and(|head| head.next_attempt <= now)
        {
            if let Some(request) = self.queue.pop_front() {
                ready.push(request);
            }
        }
        ready
    }
}
