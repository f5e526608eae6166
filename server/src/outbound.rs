//! Encoded replies waiting for their connection to become writable.

use crate::connection_manager::ConnectionId;
use std::collections::{HashMap, VecDeque};

/// One encoded frame, possibly partially written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    bytes: Vec<u8>,
    written: usize,
}

impl PendingWrite {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes, written: 0 }
    }

    /// Bytes not yet handed to the socket.
    pub fn remaining(&self) -> &[u8] {
        &self.bytes[self.written..]
    }

    /// Records a write of `count` bytes and reports whether the frame is done.
    pub fn advance(&mut self, count: usize) -> bool {
        self.written = (self.written + count).min(self.bytes.len());
        self.written == self.bytes.len()
    }
}

/// FIFO of pending frames per connection.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    queues: HashMap<ConnectionId, VecDeque<PendingWrite>>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `bytes` behind everything already queued for `connection`.
    pub fn push(&mut self, connection: ConnectionId, bytes: Vec<u8>) {
        self.queues
            .entry(connection)
            .or_default()
            .push_back(PendingWrite::new(bytes));
    }

    /// Whether `connection` has output waiting; the event loop only polls
    /// write readiness for connections where this holds.
    pub fn has_pending(&self, connection: ConnectionId) -> bool {
        self.queues
            .get(&connection)
            .is_some_and(|queue| !queue.is_empty())
    }

    /// The entry currently being written to `connection`.
    pub fn front_mut(&mut self, connection: ConnectionId) -> Option<&mut PendingWrite> {
        self.queues.get_mut(&connection)?.front_mut()
    }

    /// Drops the head entry of `connection` once it has been fully written.
    pub fn pop_front(&mut self, connection: ConnectionId) -> Option<PendingWrite> {
        let queue = self.queues.get_mut(&connection)?;
        let entry = queue.pop_front();
        if queue.is_empty() {
            self.queues.remove(&connection);
        }
        entry
    }

    /// Discards everything queued for `connection`, returning how many frames
    /// were dropped.
    pub fn purge(&mut self, connection: ConnectionId) -> usize {
        self.queues
            .remove(&connection)
            .map_or(0, |queue| queue.len())
    }

    /// Frames queued for `connection`, including a partially written head.
    pub fn pending_len(&self, connection: ConnectionId) -> usize {
        self.queues.get(&connection).map_or(0, VecDeque::len)
    }
}
