//! State shared by the sample readers: descriptor tracking, the partially
//! consumed packet, event handling and gap checking.

use super::{DomainGap, ReadResult, ReadStatus, ReadTimeoutType};
use crate::config::{PortConfig, ReaderConfig};
use crate::connection::{Connection, WaitStatus};
use crate::decode;
use crate::descriptor::{DataDescriptor, DataRule};
use crate::error::Result;
use crate::input_port::{InputPort, InputPortListener};
use crate::packet::{DataPacket, EventPacket, Packet};
use crate::sample::SampleValue;
use crate::signal::Signal;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub(crate) type Callback = Arc<dyn Fn() + Send + Sync>;

/// Port listener installed by every reader.
#[derive(Default)]
pub(crate) struct ReaderListener {
    on_data_available: RwLock<Option<Callback>>,
    /// Runs before the user callback; tail readers drain here
    drain: RwLock<Option<Callback>>,
}

impl ReaderListener {
    pub(crate) fn set_on_data_available(&self, callback: Option<Callback>) {
        *self.on_data_available.write() = callback;
    }

    pub(crate) fn set_drain(&self, drain: Callback) {
        *self.drain.write() = Some(drain);
    }
}

impl ReaderListener {
    fn run_drain(&self) {
        let drain = self.drain.read().clone();
        if let Some(drain) = drain {
            drain();
        }
    }
}

impl InputPortListener for ReaderListener {
    fn disconnected(&self, _port: &InputPort) {
        self.run_drain();
    }

    fn packet_received(&self, _port: &InputPort) {
        self.run_drain();
        let callback = self.on_data_available.read().clone();
        if let Some(callback) = callback {
            callback();
        }
    }
}

/// Tracks the offset a linear domain should continue from.
#[derive(Debug, Default)]
pub(crate) struct GapTracker {
    expected: Option<f64>,
}

impl GapTracker {
    /// Check `packet` (a domain packet) against the previous one.
    pub(crate) fn check(&mut self, packet: &DataPacket) -> Option<DomainGap> {
        let DataRule::Linear { delta, .. } = packet.descriptor().rule() else {
            self.expected = None;
            return None;
        };

        let actual = packet.offset();
        let gap = match self.expected {
            Some(expected) if (actual - expected).abs() > 1e-9 * expected.abs().max(1.0) => {
                Some(DomainGap {
                    expected,
                    actual,
                    packet_id: packet.id(),
                })
            }
            _ => None,
        };
        self.expected = Some(actual + packet.sample_count() as f64 * delta);
        gap
    }

    pub(crate) fn reset(&mut self) {
        self.expected = None;
    }
}

/// The packet that carries the domain of `packet`: its domain packet, or the
/// packet itself for readers attached to a domain signal.
pub(crate) fn domain_of(packet: &DataPacket) -> &DataPacket {
    packet.domain_packet().map(Arc::as_ref).unwrap_or(packet)
}

/// Whether a reader on `current` keeps decoding after a change to `new`
fn can_follow(current: Option<&Arc<DataDescriptor>>, new: Option<&Arc<DataDescriptor>>) -> bool {
    match (current, new) {
        (Some(current), Some(new)) => current.is_layout_compatible(new),
        _ => true,
    }
}

struct Cursor {
    packet: Arc<DataPacket>,
    position: usize,
}

impl Cursor {
    fn remaining(&self) -> usize {
        self.packet.sample_count().saturating_sub(self.position)
    }
}

pub(crate) enum EventOutcome {
    Continue,
    Stop(ReadStatus),
}

pub(crate) struct ReaderCore {
    port: InputPort,
    owns_port: bool,
    listener: Arc<ReaderListener>,
    value_descriptor: Option<Arc<DataDescriptor>>,
    domain_descriptor: Option<Arc<DataDescriptor>>,
    cursor: Option<Cursor>,
    invalid: bool,
    last_event: Option<Arc<EventPacket>>,
    skip_events: bool,
    timeout_type: ReadTimeoutType,
    default_timeout: Duration,
    gaps: GapTracker,
}

impl ReaderCore {
    /// Create a private port for `signal` and connect it.
    pub(crate) fn from_signal(
        signal: &Signal,
        kind: &str,
        config: &ReaderConfig,
        port_config: &PortConfig,
    ) -> Result<Self> {
        let port = InputPort::with_config(
            format!("{} reader of {}", kind, signal.name()),
            port_config,
        );
        let core = Self::new(port, true, config);
        signal.connect(&core.port)?;
        Ok(core)
    }

    /// Read through an existing port, connected now or later.
    pub(crate) fn from_port(port: InputPort, config: &ReaderConfig) -> Self {
        Self::new(port, false, config)
    }

    fn new(port: InputPort, owns_port: bool, config: &ReaderConfig) -> Self {
        let listener = Arc::new(ReaderListener::default());
        port.set_listener(listener.clone());
        Self {
            port,
            owns_port,
            listener,
            value_descriptor: None,
            domain_descriptor: None,
            cursor: None,
            invalid: false,
            last_event: None,
            skip_events: config.skip_events,
            timeout_type: config.timeout_type,
            default_timeout: Duration::from_millis(config.default_timeout_ms),
            gaps: GapTracker::default(),
        }
    }

    pub(crate) fn port(&self) -> &InputPort {
        &self.port
    }

    pub(crate) fn listener(&self) -> &Arc<ReaderListener> {
        &self.listener
    }

    pub(crate) fn connection(&self) -> Option<Arc<Connection>> {
        self.port.connection()
    }

    pub(crate) fn value_descriptor(&self) -> Option<&Arc<DataDescriptor>> {
        self.value_descriptor.as_ref()
    }

    pub(crate) fn domain_descriptor(&self) -> Option<&Arc<DataDescriptor>> {
        self.domain_descriptor.as_ref()
    }

    pub(crate) fn is_invalid(&self) -> bool {
        self.invalid
    }

    pub(crate) fn last_event(&self) -> Option<&Arc<EventPacket>> {
        self.last_event.as_ref()
    }

    pub(crate) fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub(crate) fn timeout_type(&self) -> ReadTimeoutType {
        self.timeout_type
    }

    pub(crate) fn set_timeout_type(&mut self, timeout_type: ReadTimeoutType) {
        self.timeout_type = timeout_type;
    }

    pub(crate) fn set_skip_events(&mut self, skip: bool) {
        self.skip_events = skip;
    }

    pub(crate) fn value_elements(&self) -> usize {
        self.value_descriptor
            .as_ref()
            .map_or(1, |d| d.elements_per_sample())
    }

    pub(crate) fn domain_elements(&self) -> usize {
        self.domain_descriptor
            .as_ref()
            .map_or(1, |d| d.elements_per_sample())
    }

    /// Apply the descriptor event that opens the connection if it is still
    /// queued, so callers size buffers with the real element strides.
    pub(crate) fn apply_opening_descriptor(&mut self) {
        if self.value_descriptor.is_some() || self.invalid {
            return;
        }
        let Some(connection) = self.connection() else {
            return;
        };
        let opening = matches!(
            connection.peek(),
            Some(Packet::Event(event)) if event.is_descriptor_changed()
        );
        if !opening {
            return;
        }
        if let Some(Packet::Event(event)) = connection.dequeue() {
            // The first descriptor event never stops a read.
            let _ = self.handle_event(event);
        }
    }

    /// Samples readable before the next event a read would stop at
    pub(crate) fn available_samples(&self) -> usize {
        if self.invalid {
            return 0;
        }
        let buffered = self.cursor.as_ref().map_or(0, Cursor::remaining);
        let Some(connection) = self.connection() else {
            return buffered;
        };

        // Replay descriptor tracking over the queue without consuming it.
        let mut value = self.value_descriptor.clone();
        let mut domain = self.domain_descriptor.clone();
        let skip_events = self.skip_events;
        let queued = connection.available_samples_skipping(|event| {
            if !event.is_descriptor_changed() {
                return false;
            }
            let silent = can_follow(value.as_ref(), event.value_descriptor())
                && can_follow(domain.as_ref(), event.domain_descriptor())
                && (value.is_none() || skip_events);
            if silent {
                if let Some(new) = event.value_descriptor() {
                    value = Some(Arc::clone(new));
                }
                if let Some(new) = event.domain_descriptor() {
                    domain = Some(Arc::clone(new));
                }
            }
            silent
        });
        buffered + queued
    }

    /// Samples a read must collect before an empty queue ends it
    pub(crate) fn min_count(&self, capacity: usize) -> usize {
        match self.timeout_type {
            ReadTimeoutType::Any => 1.min(capacity),
            ReadTimeoutType::All => capacity,
        }
    }

    /// Whole samples that fit in the given buffer lengths
    pub(crate) fn capacity(&self, values_len: usize, domain_len: Option<usize>) -> usize {
        let values = values_len / self.value_elements();
        match domain_len {
            Some(len) => values.min(len / self.domain_elements()),
            None => values,
        }
    }

    /// Leave the invalid state, continuing with the latest descriptors.
    pub(crate) fn reset(&mut self) {
        if self.invalid {
            tracing::debug!("Reader on port '{}' reset", self.port.name());
        }
        self.invalid = false;
        self.cursor = None;
        self.gaps.reset();
    }

    fn invalidate(&mut self, reason: &str) {
        if !self.invalid {
            tracing::warn!(
                "Reader on port '{}' invalidated: {}",
                self.port.name(),
                reason
            );
        }
        self.invalid = true;
        self.cursor = None;
    }

    /// Adopt the descriptors carried by a descriptor-changed event. Returns
    /// `false` if a reader that decoded the old layout cannot follow.
    pub(crate) fn apply_descriptor_event(&mut self, event: &EventPacket) -> bool {
        let mut compatible = true;
        if let Some(new) = event.value_descriptor() {
            if let Some(current) = &self.value_descriptor {
                compatible &= current.is_layout_compatible(new);
            }
            tracing::debug!("Port '{}': value descriptor {}", self.port.name(), new);
            self.value_descriptor = Some(Arc::clone(new));
        }
        if let Some(new) = event.domain_descriptor() {
            if let Some(current) = &self.domain_descriptor {
                compatible &= current.is_layout_compatible(new);
            }
            tracing::debug!("Port '{}': domain descriptor {}", self.port.name(), new);
            self.domain_descriptor = Some(Arc::clone(new));
            self.gaps.reset();
        }
        compatible
    }

    /// React to an event packet pulled from the queue.
    ///
    /// The descriptor event that opens every connection is applied silently,
    /// as are compatible descriptor changes when skipping events.
    pub(crate) fn handle_event(&mut self, event: Arc<EventPacket>) -> EventOutcome {
        if event.is_descriptor_changed() {
            let first = self.value_descriptor.is_none();
            if !self.apply_descriptor_event(&event) {
                self.last_event = Some(event);
                self.invalidate("incompatible descriptor change");
                return EventOutcome::Stop(ReadStatus::InvalidData);
            }
            if first || self.skip_events {
                return EventOutcome::Continue;
            }
        }
        self.last_event = Some(Arc::clone(&event));
        EventOutcome::Stop(ReadStatus::Event(event))
    }

    /// Run gap checking on a packet if the port asks for it.
    pub(crate) fn check_gap(&mut self, packet: &DataPacket) -> Option<DomainGap> {
        if !self.port.gap_checking() {
            return None;
        }
        let gap = self.gaps.check(domain_of(packet))?;
        tracing::warn!(
            "Port '{}': domain gap, expected offset {} got {}",
            self.port.name(),
            gap.expected,
            gap.actual
        );
        Some(gap)
    }

    /// Make `packet` the current packet. Returns `false` (and invalidates) if
    /// its layout disagrees with the current descriptor.
    fn accept_packet(&mut self, packet: Arc<DataPacket>, gaps: &mut Vec<DomainGap>) -> bool {
        let compatible = match &self.value_descriptor {
            Some(current) => current.is_layout_compatible(packet.descriptor()),
            None => {
                self.value_descriptor = Some(Arc::clone(packet.descriptor()));
                packet.descriptor().sample_type().is_numeric()
            }
        };
        if !compatible {
            self.invalidate(&format!(
                "packet {} layout {} does not match the current descriptor",
                packet.id(),
                packet.descriptor()
            ));
            return false;
        }

        if let Some(gap) = self.check_gap(&packet) {
            gaps.push(gap);
        }
        if packet.sample_count() > 0 {
            self.cursor = Some(Cursor {
                packet,
                position: 0,
            });
        }
        true
    }

    /// Decode from the current packet into `values[count..]` (and the domain
    /// buffer, in lockstep).
    fn decode_cursor<V: SampleValue, D: SampleValue>(
        &mut self,
        values: &mut [V],
        domain: Option<&mut [D]>,
        count: &mut usize,
        capacity: usize,
    ) -> std::result::Result<(), ReadStatus> {
        let Some(cursor) = self.cursor.as_ref() else {
            return Ok(());
        };
        let n = cursor.remaining().min(capacity.saturating_sub(*count));
        if n == 0 {
            return Ok(());
        }
        let packet = Arc::clone(&cursor.packet);
        let position = cursor.position;
        let descriptor = match &self.value_descriptor {
            Some(d) => Arc::clone(d),
            None => Arc::clone(packet.descriptor()),
        };

        let per_sample = descriptor.elements_per_sample();
        let start = *count * per_sample;
        let slots = &mut values[start..start + n * per_sample];
        if let Err(e) = decode::decode_into(
            &descriptor,
            packet.raw_data(),
            packet.offset(),
            position,
            slots,
        ) {
            self.invalidate(&e.to_string());
            return Err(ReadStatus::InvalidData);
        }

        if let Some(domain) = domain {
            if let Err(reason) = Self::decode_domain(&packet, position, n, *count, domain) {
                self.invalidate(&reason);
                return Err(ReadStatus::InvalidData);
            }
        }

        *count += n;
        let exhausted = match self.cursor.as_mut() {
            Some(cursor) => {
                cursor.position += n;
                cursor.remaining() == 0
            }
            None => true,
        };
        if exhausted {
            self.cursor = None;
        }
        Ok(())
    }

    fn decode_domain<D: SampleValue>(
        packet: &DataPacket,
        position: usize,
        n: usize,
        count: usize,
        domain: &mut [D],
    ) -> std::result::Result<(), String> {
        let domain_packet = packet
            .domain_packet()
            .ok_or_else(|| format!("packet {} has no domain packet", packet.id()))?;
        if domain_packet.sample_count() != packet.sample_count() {
            return Err(format!(
                "domain packet holds {} samples, value packet {}",
                domain_packet.sample_count(),
                packet.sample_count()
            ));
        }

        let per_sample = domain_packet.descriptor().elements_per_sample();
        let start = count * per_sample;
        let end = start + n * per_sample;
        let slots = domain
            .get_mut(start..end)
            .ok_or_else(|| "domain buffer too small for domain layout".to_string())?;
        match domain_packet.decode_into(position, slots) {
            Ok(decoded) if decoded == n => Ok(()),
            Ok(decoded) => Err(format!(
                "decoded {} domain samples for {} values",
                decoded, n
            )),
            Err(e) => Err(e.to_string()),
        }
    }

    /// The reader state machine: decode until the buffer is full, an event
    /// or invalid packet stops the read, or the queue stays empty past the
    /// deadline (once `min_count` samples are in hand an empty queue ends the
    /// read immediately).
    pub(crate) fn read_samples<V: SampleValue, D: SampleValue>(
        &mut self,
        values: &mut [V],
        mut domain: Option<&mut [D]>,
        min_count: usize,
        deadline: Instant,
    ) -> ReadResult {
        if self.invalid {
            return ReadResult::new(0, ReadStatus::InvalidData);
        }
        let Some(connection) = self.connection() else {
            return ReadResult::new(0, ReadStatus::Disconnected);
        };

        let mut result = ReadResult::new(0, ReadStatus::Ok);
        loop {
            let capacity = self.capacity(values.len(), domain.as_deref().map(<[D]>::len));

            if let Err(status) =
                self.decode_cursor(values, domain.as_deref_mut(), &mut result.count, capacity)
            {
                result.status = status;
                return result;
            }
            if result.count >= capacity {
                return result;
            }

            match connection.dequeue() {
                Some(Packet::Event(event)) => match self.handle_event(event) {
                    EventOutcome::Continue => {}
                    EventOutcome::Stop(status) => {
                        result.status = status;
                        return result;
                    }
                },
                Some(Packet::Data(packet)) => {
                    if !self.accept_packet(packet, &mut result.gaps) {
                        result.status = ReadStatus::InvalidData;
                        return result;
                    }
                }
                None => {
                    if result.count >= min_count.min(capacity) {
                        return result;
                    }
                    match connection.wait_until(deadline) {
                        WaitStatus::Ready => {}
                        WaitStatus::Timeout => {
                            result.status = ReadStatus::Timeout;
                            return result;
                        }
                        WaitStatus::Disconnected => {
                            result.status = ReadStatus::Disconnected;
                            return result;
                        }
                    }
                }
            }
        }
    }
}

impl Drop for ReaderCore {
    fn drop(&mut self) {
        self.port.clear_listener();
        if self.owns_port {
            self.port.remove();
        } else {
            let _ = self.port.disconnect();
        }
    }
}
