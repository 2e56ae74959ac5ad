//! Bounded chunk queue between the transport reader and the frame worker.
//!
//! The producer never blocks: when the queue is full the oldest chunk is
//! dropped and counted. End markers are always appended without evicting
//! anything. The consumer blocks until an item arrives or the
//! queue is closed.

use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};

/// Default queue capacity in chunks
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Item handed to the frame worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueItem {
    /// Bytes read from the transport
    Chunk(Bytes),
    /// The transport reached end of stream
    EndOfStream,
    /// The transport failed; stop after the items already queued
    Stop,
}

#[derive(Debug)]
struct QueueState {
    items: VecDeque<QueueItem>,
    closed: bool,
}

/// Bounded FIFO with drop-oldest overflow
#[derive(Debug)]
pub struct ChunkQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
    capacity: usize,
}

impl ChunkQueue {
    /// Create a queue holding at most `capacity` items
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity.min(DEFAULT_QUEUE_CAPACITY)),
                closed: false,
            }),
            ready: Condvar::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueue an item; returns how many old items were dropped
    ///
    /// Items pushed after [`ChunkQueue::close`] are discarded.
    pub fn push(&self, item: QueueItem) -> usize {
        let mut state = self.lock();
        if state.closed {
            return 0;
        }

        let mut dropped = 0;
        if let QueueItem::Chunk(_) = item {
            while state.items.len() >= self.capacity {
                state.items.pop_front();
                dropped += 1;
            }
        }
        state.items.push_back(item);
        drop(state);

        self.ready.notify_one();
        dropped
    }

    /// Dequeue the next item, blocking; `None` once closed
    pub fn pop(&self) -> Option<QueueItem> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            state = self
                .ready
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Close the queue, discarding pending items and waking the consumer
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.items.clear();
        drop(state);
        self.ready.notify_all();
    }

    /// Pending items
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// True if nothing is pending
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum pending items
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
