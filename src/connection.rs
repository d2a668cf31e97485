//! Ordered packet queue between one signal and one input port.
//!
//! The signal side enqueues, the port's reader dequeues. Both sides share one
//! mutex; a condition variable parks readers waiting for data. Closing the
//! connection drops queued packets and wakes every waiter.

use crate::config::ConnectionConfig;
use crate::packet::{EventPacket, Packet};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Outcome of waiting for packets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// At least one packet is queued
    Ready,
    Timeout,
    /// The connection was closed
    Disconnected,
}

#[derive(Default)]
struct ConnectionState {
    queue: VecDeque<Packet>,
    closed: bool,
    /// Set while the queue is above the warning threshold
    warned: bool,
}

/// Single-producer single-consumer packet FIFO.
pub struct Connection {
    id: u64,
    state: Mutex<ConnectionState>,
    available: Condvar,
    warn_threshold: usize,
    total_enqueued: AtomicU64,
}

impl Connection {
    pub fn new() -> Self {
        Self::with_config(&ConnectionConfig::default())
    }

    pub fn with_config(config: &ConnectionConfig) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(ConnectionState::default()),
            available: Condvar::new(),
            warn_threshold: config.queue_warn_threshold,
            total_enqueued: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Append a packet. Never blocks on the consumer.
    ///
    /// Returns `false` (and drops the packet) if the connection is closed.
    pub fn enqueue(&self, packet: Packet) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        tracing::trace!("Connection {}: enqueue packet {}", self.id, packet.id());
        state.queue.push_back(packet);
        self.after_enqueue(&mut state, 1);
        drop(state);
        self.available.notify_all();
        true
    }

    /// Append several packets atomically with respect to the consumer.
    pub fn enqueue_multiple(&self, packets: impl IntoIterator<Item = Packet>) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        let before = state.queue.len();
        state.queue.extend(packets);
        let added = state.queue.len() - before;
        self.after_enqueue(&mut state, added);
        drop(state);
        self.available.notify_all();
        true
    }

    fn after_enqueue(&self, state: &mut ConnectionState, added: usize) {
        self.total_enqueued
            .fetch_add(added as u64, Ordering::Relaxed);

        if self.warn_threshold == 0 {
            return;
        }
        let len = state.queue.len();
        if len > self.warn_threshold && !state.warned {
            state.warned = true;
            tracing::warn!(
                "Connection {}: {} packets queued, reader is falling behind",
                self.id,
                len
            );
        }
    }

    fn after_dequeue(&self, state: &mut ConnectionState) {
        if state.warned && state.queue.len() <= self.warn_threshold / 2 {
            state.warned = false;
        }
    }

    pub fn dequeue(&self) -> Option<Packet> {
        let mut state = self.state.lock();
        let packet = state.queue.pop_front();
        self.after_dequeue(&mut state);
        packet
    }

    /// Remove up to `max_count` packets from the head, in order. The length
    /// of the returned vector is the number consumed.
    pub fn dequeue_up_to(&self, max_count: usize) -> Vec<Packet> {
        let mut state = self.state.lock();
        let count = max_count.min(state.queue.len());
        let packets: Vec<Packet> = state.queue.drain(..count).collect();
        self.after_dequeue(&mut state);
        packets
    }

    pub fn dequeue_all(&self) -> Vec<Packet> {
        self.dequeue_up_to(usize::MAX)
    }

    /// Clone of the head packet without removing it
    pub fn peek(&self) -> Option<Packet> {
        self.state.lock().queue.front().cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Samples queued ahead of the first event packet
    pub fn available_samples(&self) -> usize {
        self.available_samples_skipping(|_| false)
    }

    /// Samples queued ahead of the first event that `skip` does not pass over
    pub fn available_samples_skipping(
        &self,
        mut skip: impl FnMut(&EventPacket) -> bool,
    ) -> usize {
        let state = self.state.lock();
        let mut samples = 0;
        for packet in &state.queue {
            match packet {
                Packet::Data(data) => samples += data.sample_count(),
                Packet::Event(event) if skip(event) => {}
                Packet::Event(_) => break,
            }
        }
        samples
    }

    pub fn has_event_packet(&self) -> bool {
        self.state.lock().queue.iter().any(Packet::is_event)
    }

    /// Packets accepted since creation
    pub fn total_enqueued(&self) -> u64 {
        self.total_enqueued.load(Ordering::Relaxed)
    }

    /// Block until a packet is queued, the connection closes, or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> WaitStatus {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.wait_until(deadline),
            None => self.wait_forever(),
        }
    }

    pub fn wait_until(&self, deadline: Instant) -> WaitStatus {
        let mut state = self.state.lock();
        loop {
            if !state.queue.is_empty() {
                return WaitStatus::Ready;
            }
            if state.closed {
                return WaitStatus::Disconnected;
            }
            if self.available.wait_until(&mut state, deadline).timed_out() {
                return if !state.queue.is_empty() {
                    WaitStatus::Ready
                } else if state.closed {
                    WaitStatus::Disconnected
                } else {
                    WaitStatus::Timeout
                };
            }
        }
    }

    fn wait_forever(&self) -> WaitStatus {
        let mut state = self.state.lock();
        loop {
            if !state.queue.is_empty() {
                return WaitStatus::Ready;
            }
            if state.closed {
                return WaitStatus::Disconnected;
            }
            self.available.wait(&mut state);
        }
    }

    /// Close the connection: drop queued packets, refuse further enqueues and
    /// wake all waiters with [`WaitStatus::Disconnected`].
    pub fn close(&self) {
        let dropped = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.warned = false;
            std::mem::take(&mut state.queue)
        };
        tracing::debug!(
            "Connection {} closed, {} packets released",
            self.id,
            dropped.len()
        );
        self.available.notify_all();
        // Packets (and their memory) are released outside the lock.
        drop(dropped);
    }

    /// Wake waiters without changing state; they re-check and go back to sleep.
    pub fn notify(&self) {
        self.available.notify_all();
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("queued", &state.queue.len())
            .field("closed", &state.closed)
            .finish()
    }
}
