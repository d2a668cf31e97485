//! Readers: typed consumers of a signal's packet stream.
//!
//! Every reader owns (or borrows) an [`InputPort`](crate::input_port::InputPort)
//! and drains its connection. Sample readers decode data packets into caller
//! buffers and stop at event packets, returning the event as the read status
//! so the caller sees each descriptor change before any sample that uses it.
//!
//! - [`StreamReader`] - reads any number of samples
//! - [`BlockReader`] - reads whole blocks of a fixed size
//! - [`TailReader`] - keeps the last N samples, drained on every notification
//! - [`PacketReader`] - hands out packets undecoded
//!
//! # Invalid state
//!
//! A descriptor change the reader cannot follow (different sample type,
//! shape or rule kind), a value/domain misalignment, or a data packet whose
//! layout disagrees with the current descriptor moves a sample reader to the
//! invalid state. Every later read returns [`ReadStatus::InvalidData`] until
//! `reset()` is called.

mod base;
mod block;
mod packet_reader;
mod stream;
mod tail;

pub use block::BlockReader;
pub use packet_reader::{PacketReadResult, PacketReader};
pub use stream::StreamReader;
pub use tail::TailReader;

use crate::packet::EventPacket;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// When a read with samples already in hand returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReadTimeoutType {
    /// Return as soon as some data was read and the queue is empty
    #[default]
    Any,
    /// Keep waiting until the buffer is full; a partial read at the deadline
    /// reports [`ReadStatus::Timeout`]
    All,
}

/// Why a read returned
#[derive(Debug, Clone, PartialEq)]
pub enum ReadStatus {
    Ok,
    /// Stopped at an event packet; samples after it are read by the next call
    Event(Arc<EventPacket>),
    /// The port was disconnected or the signal removed
    Disconnected,
    Timeout,
    /// The reader is invalid and must be reset
    InvalidData,
}

impl ReadStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, ReadStatus::Ok)
    }

    pub fn event(&self) -> Option<&Arc<EventPacket>> {
        match self {
            ReadStatus::Event(event) => Some(event),
            _ => None,
        }
    }
}

/// A discontinuity in a linear domain
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DomainGap {
    /// Offset the previous packet implied
    pub expected: f64,
    pub actual: f64,
    /// Domain packet carrying the unexpected offset
    pub packet_id: u64,
}

impl DomainGap {
    /// `actual - expected`
    pub fn diff(&self) -> f64 {
        self.actual - self.expected
    }
}

/// Outcome of a sample read.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadResult {
    /// Samples (or blocks, for [`BlockReader`]) written to the buffer
    pub count: usize,
    pub status: ReadStatus,
    /// Gaps detected in the packets this call consumed
    pub gaps: Vec<DomainGap>,
}

impl ReadResult {
    pub fn new(count: usize, status: ReadStatus) -> Self {
        Self {
            count,
            status,
            gaps: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    pub fn event(&self) -> Option<&Arc<EventPacket>> {
        self.status.event()
    }

    pub fn has_gaps(&self) -> bool {
        !self.gaps.is_empty()
    }
}

/// `now + timeout`, saturating at a far-future instant
pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .or_else(|| now.checked_add(Duration::from_secs(365 * 24 * 60 * 60)))
        .unwrap_or(now)
}
