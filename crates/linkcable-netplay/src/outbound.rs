//! Bounded byte queue between caller threads and the connection worker.
//!
//! Any thread may enqueue. Exactly one consumer (the worker) drains. A full
//! queue blocks producers; nothing is dropped. Each message goes in as its
//! header followed by its body in chunks of at most `CHUNK_SIZE`, all under a
//! single producer lock, so two messages never interleave.

use std::collections::VecDeque;

use bytes::Bytes;
use linkcable_netproto::{
    codec::{Frame, encode_message},
    constants::{CHUNK_SIZE, HEADER_LEN},
    messages::Message,
};
use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;
use tracing::trace;

use crate::error::NetplayError;

/// Smallest capacity that can hold any single header or body chunk.
pub const MIN_CAPACITY: usize = if CHUNK_SIZE > HEADER_LEN {
    CHUNK_SIZE
} else {
    HEADER_LEN
};

struct QueueState {
    buf: VecDeque<u8>,
    closed: bool,
}

enum Taken {
    Data(Bytes),
    Empty,
    Closed,
}

pub struct OutboundQueue {
    capacity: usize,
    state: Mutex<QueueState>,
    not_full: Condvar,
    not_empty: Condvar,
    /// Wakes the async consumer. Holds a permit if nobody is waiting yet.
    data_ready: Notify,
    /// Serializes whole messages between producers.
    producer: Mutex<()>,
}

impl OutboundQueue {
    /// Create a queue holding at most `capacity` bytes (raised to
    /// [`MIN_CAPACITY`] if smaller).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(MIN_CAPACITY);
        Self {
            capacity,
            state: Mutex::new(QueueState {
                buf: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            data_ready: Notify::new(),
            producer: Mutex::new(()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently buffered.
    pub fn len(&self) -> usize {
        self.state.lock().buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Encode `msg` and enqueue it.
    pub fn enqueue_message<T: Message>(&self, msg: &T) -> Result<(), NetplayError> {
        let frame = encode_message(msg)?;
        self.enqueue(&frame)
    }

    /// Enqueue one complete message, blocking while the queue is full.
    pub fn enqueue(&self, frame: &Frame) -> Result<(), NetplayError> {
        let _writer = self.producer.lock();
        self.push(&frame.header.to_bytes())?;
        for chunk in frame.body.chunks(CHUNK_SIZE) {
            self.push(chunk)?;
        }
        trace!(
            kind = frame.header.kind,
            body_size = frame.header.body_size,
            "message enqueued"
        );
        Ok(())
    }

    fn push(&self, bytes: &[u8]) -> Result<(), NetplayError> {
        let mut state = self.state.lock();
        while !state.closed && self.capacity - state.buf.len() < bytes.len() {
            self.not_full.wait(&mut state);
        }
        if state.closed {
            return Err(NetplayError::QueueClosed);
        }
        state.buf.extend(bytes);
        drop(state);

        self.not_empty.notify_one();
        self.data_ready.notify_one();
        Ok(())
    }

    fn take(&self, max: usize) -> Taken {
        let mut state = self.state.lock();
        if state.buf.is_empty() {
            return if state.closed {
                Taken::Closed
            } else {
                Taken::Empty
            };
        }
        let n = max.max(1).min(state.buf.len());
        let out: Vec<u8> = state.buf.drain(..n).collect();
        drop(state);

        self.not_full.notify_all();
        Taken::Data(Bytes::from(out))
    }

    /// Take up to `max` bytes, blocking the calling thread while the queue is
    /// empty. Returns `None` once the queue is closed and fully drained.
    #[cfg(test)]
    pub fn drain_blocking(&self, max: usize) -> Option<Bytes> {
        let mut state = self.state.lock();
        while state.buf.is_empty() && !state.closed {
            self.not_empty.wait(&mut state);
        }
        drop(state);

        match self.take(max) {
            Taken::Data(bytes) => Some(bytes),
            Taken::Empty | Taken::Closed => None,
        }
    }

    /// Take up to `max` bytes, waiting while the queue is empty. Returns
    /// `None` once the queue is closed and fully drained.
    pub async fn drain(&self, max: usize) -> Option<Bytes> {
        loop {
            match self.take(max) {
                Taken::Data(bytes) => return Some(bytes),
                Taken::Closed => return None,
                Taken::Empty => self.data_ready.notified().await,
            }
        }
    }

    /// Refuse further messages and wake every waiter. Bytes already buffered
    /// can still be drained.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.not_full.notify_all();
        self.not_empty.notify_all();
        self.data_ready.notify_one();
    }
}
