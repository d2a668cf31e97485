//! Packet reader: hands out packets as they were sent.
//!
//! Descriptor events pass through untouched (the reader only records the
//! descriptors they carry). With gap checking enabled on the port, a data
//! packet that does not continue its linear domain is preceded by a
//! synthesized `IMPLICIT_DOMAIN_GAP_DETECTED` event.

use super::base::ReaderCore;
use super::{deadline_after, ReadStatus};
use crate::config::{PortConfig, ReaderConfig};
use crate::connection::WaitStatus;
use crate::descriptor::DataDescriptor;
use crate::error::Result;
use crate::input_port::InputPort;
use crate::packet::{EventPacket, Packet};
use crate::signal::Signal;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of [`PacketReader::read_with_timeout`]
#[derive(Debug, Clone)]
pub struct PacketReadResult {
    pub packet: Option<Packet>,
    /// `Ok` when a packet was returned
    pub status: ReadStatus,
}

pub struct PacketReader {
    core: ReaderCore,
    /// Packets held back behind a synthesized event
    pending: VecDeque<Packet>,
}

impl PacketReader {
    pub fn new(signal: &Signal) -> Result<Self> {
        Self::with_config(signal, &ReaderConfig::default(), &PortConfig::default())
    }

    pub fn with_config(
        signal: &Signal,
        config: &ReaderConfig,
        port_config: &PortConfig,
    ) -> Result<Self> {
        let core = ReaderCore::from_signal(signal, "packet", config, port_config)?;
        Ok(Self::from_core(core))
    }

    pub fn from_port(port: InputPort, config: &ReaderConfig) -> Self {
        Self::from_core(ReaderCore::from_port(port, config))
    }

    fn from_core(core: ReaderCore) -> Self {
        Self {
            core,
            pending: VecDeque::new(),
        }
    }

    /// Next packet, without waiting.
    pub fn read(&mut self) -> Option<Packet> {
        if let Some(packet) = self.pending.pop_front() {
            return Some(packet);
        }
        let packet = self.core.connection()?.dequeue()?;
        let gap = match &packet {
            Packet::Event(event) => {
                if event.is_descriptor_changed() {
                    self.core.apply_descriptor_event(event);
                }
                None
            }
            Packet::Data(data) => self.core.check_gap(data),
        };

        match gap {
            Some(gap) => {
                self.pending.push_back(packet);
                Some(Packet::Event(Arc::new(EventPacket::implicit_domain_gap(
                    gap.diff(),
                ))))
            }
            None => Some(packet),
        }
    }

    /// Every packet currently queued
    pub fn read_all(&mut self) -> Vec<Packet> {
        std::iter::from_fn(|| self.read()).collect()
    }

    /// Next packet, waiting up to `timeout` for one to arrive.
    pub fn read_with_timeout(&mut self, timeout: Duration) -> PacketReadResult {
        let deadline = deadline_after(timeout);
        loop {
            if let Some(packet) = self.read() {
                return PacketReadResult {
                    packet: Some(packet),
                    status: ReadStatus::Ok,
                };
            }
            let status = match self.core.connection() {
                Some(connection) => match connection.wait_until(deadline) {
                    WaitStatus::Ready => continue,
                    WaitStatus::Timeout => ReadStatus::Timeout,
                    WaitStatus::Disconnected => ReadStatus::Disconnected,
                },
                None => ReadStatus::Disconnected,
            };
            return PacketReadResult {
                packet: None,
                status,
            };
        }
    }

    /// Packets queued, including held-back ones
    pub fn available_count(&self) -> usize {
        self.pending.len() + self.core.connection().map_or(0, |c| c.len())
    }

    pub fn set_on_data_available(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.core
            .listener()
            .set_on_data_available(Some(Arc::new(callback)));
    }

    pub fn clear_on_data_available(&self) {
        self.core.listener().set_on_data_available(None);
    }

    /// Value descriptor from the last descriptor event read
    pub fn value_descriptor(&self) -> Option<&Arc<DataDescriptor>> {
        self.core.value_descriptor()
    }

    pub fn domain_descriptor(&self) -> Option<&Arc<DataDescriptor>> {
        self.core.domain_descriptor()
    }

    pub fn port(&self) -> &InputPort {
        self.core.port()
    }
}

impl std::fmt::Debug for PacketReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketReader")
            .field("port", self.core.port())
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{event_ids, params, DataPacket};
    use crate::sample::SampleType;
    use std::thread;

    fn time_signal() -> Signal {
        Signal::new("time", DataDescriptor::linear(SampleType::Int64, 1.0, 0.0))
    }

    fn send_domain(signal: &Signal, offset: f64, count: usize) {
        let packet = DataPacket::implicit(signal.descriptor(), count, offset, None).unwrap();
        signal.send_packet(packet).unwrap();
    }

    #[test]
    fn test_descriptor_event_first() {
        let signal = time_signal();
        let mut reader = PacketReader::new(&signal).unwrap();
        send_domain(&signal, 0.0, 4);

        let first = reader.read().unwrap();
        let event = first.as_event().unwrap();
        assert!(event.is_descriptor_changed());
        assert_eq!(reader.value_descriptor(), Some(&signal.descriptor()));

        let second = reader.read().unwrap();
        assert_eq!(second.sample_count(), 4);
        assert!(reader.read().is_none());
    }

    #[test]
    fn test_gap_event_precedes_packet() {
        let signal = time_signal();
        let port_config = PortConfig {
            gap_checking: true,
            ..PortConfig::default()
        };
        let mut reader =
            PacketReader::with_config(&signal, &ReaderConfig::default(), &port_config).unwrap();
        send_domain(&signal, 0.0, 10);
        send_domain(&signal, 20.0, 5);

        let packets = reader.read_all();
        assert_eq!(packets.len(), 4);
        assert!(packets[0].as_event().unwrap().is_descriptor_changed());
        assert_eq!(packets[1].sample_count(), 10);
        let gap = packets[2].as_event().unwrap();
        assert_eq!(gap.event_id(), event_ids::IMPLICIT_DOMAIN_GAP_DETECTED);
        assert_eq!(
            gap.parameter(params::GAP_DIFF).and_then(|v| v.as_float()),
            Some(10.0)
        );
        assert_eq!(packets[3].sample_count(), 5);
    }

    #[test]
    fn test_no_gap_events_without_checking() {
        let signal = time_signal();
        let mut reader = PacketReader::new(&signal).unwrap();
        send_domain(&signal, 0.0, 10);
        send_domain(&signal, 20.0, 5);
        assert_eq!(reader.read_all().len(), 3);
    }

    #[test]
    fn test_timeout_and_wakeup() {
        let signal = time_signal();
        let mut reader = PacketReader::new(&signal).unwrap();
        reader.read_all();

        let result = reader.read_with_timeout(Duration::from_millis(10));
        assert!(result.packet.is_none());
        assert_eq!(result.status, ReadStatus::Timeout);

        let producer = signal.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            send_domain(&producer, 0.0, 1);
        });
        let result = reader.read_with_timeout(Duration::from_secs(60));
        handle.join().unwrap();
        assert_eq!(result.status, ReadStatus::Ok);
        assert_eq!(result.packet.unwrap().sample_count(), 1);
    }

    #[test]
    fn test_disconnected_after_remove() {
        let signal = time_signal();
        let mut reader = PacketReader::new(&signal).unwrap();
        signal.remove();
        let result = reader.read_with_timeout(Duration::from_secs(60));
        assert_eq!(result.status, ReadStatus::Disconnected);
        assert_eq!(reader.available_count(), 0);
    }
}
