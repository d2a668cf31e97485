//! Packets: the unit of transfer between signals and input ports.
//!
//! A [`Packet`] is either a [`DataPacket`] (samples) or an [`EventPacket`]
//! (control / metadata such as a descriptor change). Packets are immutable
//! once published and shared behind `Arc`, so cloning a `Packet` is cheap and
//! never copies sample memory.
//!
//! # Packet ids
//!
//! Every packet gets a process-wide, strictly increasing id at construction.
//! Ids exist for diagnostics and ordering assertions; queues never use them.

mod data_packet;
mod event_packet;

pub use data_packet::DataPacket;
pub use event_packet::{event_ids, params, EventPacket, EventValue};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_PACKET_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate the next packet id.
pub fn next_packet_id() -> u64 {
    NEXT_PACKET_ID.fetch_add(1, Ordering::Relaxed)
}

/// A data or event packet.
#[derive(Debug, Clone)]
pub enum Packet {
    Data(Arc<DataPacket>),
    Event(Arc<EventPacket>),
}

impl Packet {
    pub fn id(&self) -> u64 {
        match self {
            Packet::Data(p) => p.id(),
            Packet::Event(p) => p.id(),
        }
    }

    pub fn is_data(&self) -> bool {
        matches!(self, Packet::Data(_))
    }

    pub fn is_event(&self) -> bool {
        matches!(self, Packet::Event(_))
    }

    pub fn as_data(&self) -> Option<&Arc<DataPacket>> {
        match self {
            Packet::Data(p) => Some(p),
            Packet::Event(_) => None,
        }
    }

    pub fn as_event(&self) -> Option<&Arc<EventPacket>> {
        match self {
            Packet::Event(p) => Some(p),
            Packet::Data(_) => None,
        }
    }

    /// Sample count of a data packet, zero for events
    pub fn sample_count(&self) -> usize {
        match self {
            Packet::Data(p) => p.sample_count(),
            Packet::Event(_) => 0,
        }
    }
}

impl From<DataPacket> for Packet {
    fn from(packet: DataPacket) -> Self {
        Packet::Data(Arc::new(packet))
    }
}

impl From<EventPacket> for Packet {
    fn from(packet: EventPacket) -> Self {
        Packet::Event(Arc::new(packet))
    }
}

impl From<Arc<DataPacket>> for Packet {
    fn from(packet: Arc<DataPacket>) -> Self {
        Packet::Data(packet)
    }
}

impl From<Arc<EventPacket>> for Packet {
    fn from(packet: Arc<EventPacket>) -> Self {
        Packet::Event(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DataDescriptor;
    use crate::sample::SampleType;

    #[test]
    fn test_packet_ids_increase() {
        let a = next_packet_id();
        let b = next_packet_id();
        assert!(b > a);
    }

    #[test]
    fn test_packet_variants() {
        let desc = Arc::new(DataDescriptor::constant(SampleType::Float64, 1.0));
        let data: Packet = DataPacket::implicit(desc, 4, 0.0, None).unwrap().into();
        let event: Packet = EventPacket::new("CUSTOM").into();

        assert!(data.is_data());
        assert_eq!(data.sample_count(), 4);
        assert!(event.is_event());
        assert_eq!(event.sample_count(), 0);
        assert!(event.id() > data.id());
        assert!(data.as_event().is_none());
    }
}
