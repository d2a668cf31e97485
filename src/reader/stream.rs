//! Stream reader: reads any number of samples, in order.

use super::base::ReaderCore;
use super::{deadline_after, ReadResult, ReadTimeoutType};
use crate::config::{PortConfig, ReaderConfig};
use crate::descriptor::DataDescriptor;
use crate::error::Result;
use crate::input_port::InputPort;
use crate::packet::EventPacket;
use crate::sample::SampleValue;
use crate::signal::Signal;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// Decodes a signal's samples into `V` (and its domain into `D`).
///
/// ```ignore
/// let mut reader = StreamReader::<f64>::new(&signal)?;
/// let mut buf = [0.0; 256];
/// let result = reader.read(&mut buf, Duration::from_millis(100));
/// if let Some(event) = result.event() {
///     // descriptor changed; `reader.value_descriptor()` is already updated
/// }
/// ```
pub struct StreamReader<V: SampleValue = f64, D: SampleValue = i64> {
    core: ReaderCore,
    _types: PhantomData<fn() -> (V, D)>,
}

impl<V: SampleValue, D: SampleValue> StreamReader<V, D> {
    pub fn new(signal: &Signal) -> Result<Self> {
        Self::with_config(signal, &ReaderConfig::default(), &PortConfig::default())
    }

    pub fn with_config(
        signal: &Signal,
        config: &ReaderConfig,
        port_config: &PortConfig,
    ) -> Result<Self> {
        Ok(Self {
            core: ReaderCore::from_signal(signal, "stream", config, port_config)?,
            _types: PhantomData,
        })
    }

    /// Read through an existing port; it is disconnected when the reader drops.
    pub fn from_port(port: InputPort, config: &ReaderConfig) -> Self {
        Self {
            core: ReaderCore::from_port(port, config),
            _types: PhantomData,
        }
    }

    /// Read up to `values.len() / elements_per_sample` samples.
    pub fn read(&mut self, values: &mut [V], timeout: Duration) -> ReadResult {
        self.core.apply_opening_descriptor();
        let capacity = self.core.capacity(values.len(), None);
        let min_count = self.core.min_count(capacity);
        self.core
            .read_samples::<V, D>(values, None, min_count, deadline_after(timeout))
    }

    /// Read values and their domain in lockstep; both buffers receive the
    /// same number of samples.
    pub fn read_with_domain(
        &mut self,
        values: &mut [V],
        domain: &mut [D],
        timeout: Duration,
    ) -> ReadResult {
        self.core.apply_opening_descriptor();
        let capacity = self.core.capacity(values.len(), Some(domain.len()));
        let min_count = self.core.min_count(capacity);
        self.core
            .read_samples(values, Some(domain), min_count, deadline_after(timeout))
    }

    /// Read with the configured default timeout
    pub fn read_default(&mut self, values: &mut [V]) -> ReadResult {
        let timeout = self.core.default_timeout();
        self.read(values, timeout)
    }

    /// Read every sample currently available, without waiting.
    pub fn read_all(&mut self) -> (Vec<V>, ReadResult) {
        self.core.apply_opening_descriptor();
        let count = self.available_count();
        let mut values = vec![V::default(); count * self.core.value_elements()];
        let result = self.read(&mut values, Duration::ZERO);
        values.truncate(result.count * self.core.value_elements());
        (values, result)
    }

    /// Samples readable without blocking, up to the next event
    pub fn available_count(&self) -> usize {
        self.core.available_samples()
    }

    /// Called after every packet the port receives (on the notifying thread)
    pub fn set_on_data_available(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.core
            .listener()
            .set_on_data_available(Some(Arc::new(callback)));
    }

    pub fn clear_on_data_available(&self) {
        self.core.listener().set_on_data_available(None);
    }

    pub fn set_timeout_type(&mut self, timeout_type: ReadTimeoutType) {
        self.core.set_timeout_type(timeout_type);
    }

    pub fn set_skip_events(&mut self, skip: bool) {
        self.core.set_skip_events(skip);
    }

    pub fn value_descriptor(&self) -> Option<&Arc<DataDescriptor>> {
        self.core.value_descriptor()
    }

    pub fn domain_descriptor(&self) -> Option<&Arc<DataDescriptor>> {
        self.core.domain_descriptor()
    }

    /// Event that ended the latest stopped read
    pub fn last_event(&self) -> Option<&Arc<EventPacket>> {
        self.core.last_event()
    }

    pub fn is_valid(&self) -> bool {
        !self.core.is_invalid()
    }

    /// Leave the invalid state, continuing with the latest descriptors
    pub fn reset(&mut self) {
        self.core.reset();
    }

    pub fn port(&self) -> &InputPort {
        self.core.port()
    }
}

impl<V: SampleValue, D: SampleValue> std::fmt::Debug for StreamReader<V, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamReader")
            .field("port", self.core.port())
            .field("valid", &self.is_valid())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Unit;
    use crate::packet::DataPacket;
    use crate::reader::ReadStatus;
    use crate::sample::SampleType;

    fn send_f64(signal: &Signal, values: &[f64]) {
        let mut packet =
            DataPacket::with_heap(signal.descriptor(), values.len(), 0.0, None).unwrap();
        packet.write_samples(values).unwrap();
        signal.send_packet(packet).unwrap();
    }

    fn f64_signal() -> Signal {
        Signal::new("sig", DataDescriptor::explicit(SampleType::Float64))
    }

    #[test]
    fn test_reads_across_packets() {
        let signal = f64_signal();
        let mut reader = StreamReader::<f64>::new(&signal).unwrap();
        send_f64(&signal, &[1.0, 2.0]);
        send_f64(&signal, &[3.0, 4.0, 5.0]);

        assert_eq!(reader.available_count(), 5);
        let mut buf = [0.0; 4];
        let result = reader.read(&mut buf, Duration::ZERO);
        assert_eq!(result.count, 4);
        assert!(result.is_ok());
        assert_eq!(buf, [1.0, 2.0, 3.0, 4.0]);

        let result = reader.read(&mut buf, Duration::ZERO);
        assert_eq!(result.count, 1);
        assert_eq!(buf[0], 5.0);
    }

    #[test]
    fn test_first_descriptor_applied_silently() {
        let signal = f64_signal();
        let mut reader = StreamReader::<f64>::new(&signal).unwrap();
        assert!(reader.value_descriptor().is_none());

        send_f64(&signal, &[1.0]);
        let mut buf = [0.0; 1];
        assert!(reader.read(&mut buf, Duration::ZERO).is_ok());
        assert_eq!(
            reader.value_descriptor().unwrap().sample_type(),
            SampleType::Float64
        );
    }

    #[test]
    fn test_empty_read_times_out() {
        let signal = f64_signal();
        let mut reader = StreamReader::<f64>::new(&signal).unwrap();
        let mut buf = [0.0; 4];
        let result = reader.read(&mut buf, Duration::from_millis(10));
        assert_eq!(result.count, 0);
        assert_eq!(result.status, ReadStatus::Timeout);
    }

    #[test]
    fn test_converts_to_requested_type() {
        let signal = Signal::new("ints", DataDescriptor::explicit(SampleType::Int16));
        let mut reader = StreamReader::<f32>::new(&signal).unwrap();

        let mut packet = DataPacket::with_heap(signal.descriptor(), 3, 0.0, None).unwrap();
        packet.write_samples(&[-1i16, 0, 300]).unwrap();
        signal.send_packet(packet).unwrap();

        let mut buf = [0f32; 3];
        reader.read(&mut buf, Duration::ZERO);
        assert_eq!(buf, [-1.0, 0.0, 300.0]);
    }

    #[test]
    fn test_skip_events_passes_compatible_changes() {
        let signal = f64_signal();
        let mut reader = StreamReader::<f64>::new(&signal).unwrap();
        reader.set_skip_events(true);

        send_f64(&signal, &[1.0]);
        signal
            .set_descriptor(
                DataDescriptor::builder(SampleType::Float64)
                    .unit(Unit::new("V"))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        send_f64(&signal, &[2.0]);

        let mut buf = [0.0; 4];
        let result = reader.read(&mut buf, Duration::ZERO);
        assert_eq!(result.count, 2);
        assert!(result.is_ok());
        assert_eq!(reader.value_descriptor().unwrap().unit().unwrap().symbol, "V");
    }

    #[test]
    fn test_incompatible_change_invalidates_until_reset() {
        let signal = f64_signal();
        let mut reader = StreamReader::<f64>::new(&signal).unwrap();
        send_f64(&signal, &[1.0]);
        let mut buf = [0.0; 4];
        reader.read(&mut buf, Duration::ZERO);

        signal
            .set_descriptor(DataDescriptor::explicit(SampleType::Int32))
            .unwrap();
        let mut packet = DataPacket::with_heap(signal.descriptor(), 1, 0.0, None).unwrap();
        packet.write_samples(&[7i32]).unwrap();
        signal.send_packet(packet).unwrap();

        let result = reader.read(&mut buf, Duration::ZERO);
        assert_eq!(result.status, ReadStatus::InvalidData);
        assert!(!reader.is_valid());
        assert!(reader.last_event().unwrap().is_descriptor_changed());
        assert_eq!(
            reader.read(&mut buf, Duration::ZERO).status,
            ReadStatus::InvalidData
        );

        reader.reset();
        let result = reader.read(&mut buf, Duration::ZERO);
        assert_eq!(result.count, 1);
        assert_eq!(buf[0], 7.0);
    }

    #[test]
    fn test_domain_lockstep() {
        let domain_signal = Signal::new(
            "time",
            DataDescriptor::linear(SampleType::Int64, 10.0, 0.0),
        );
        let signal = f64_signal();
        signal.set_domain_signal(Some(&domain_signal)).unwrap();
        let mut reader = StreamReader::<f64, i64>::new(&signal).unwrap();

        let domain = Arc::new(
            DataPacket::implicit(domain_signal.descriptor(), 3, 100.0, None).unwrap(),
        );
        let mut packet =
            DataPacket::with_heap(signal.descriptor(), 3, 0.0, Some(domain)).unwrap();
        packet.write_samples(&[1.0, 2.0, 3.0]).unwrap();
        signal.send_packet(packet).unwrap();

        let mut values = [0.0; 2];
        let mut times = [0i64; 2];
        let result = reader.read_with_domain(&mut values, &mut times, Duration::ZERO);
        assert_eq!(result.count, 2);
        assert_eq!(values, [1.0, 2.0]);
        assert_eq!(times, [100, 110]);

        let result = reader.read_with_domain(&mut values, &mut times, Duration::ZERO);
        assert_eq!(result.count, 1);
        assert_eq!(times[0], 120);
    }

    #[test]
    fn test_domain_mismatch_is_invalid() {
        let domain_desc = Arc::new(DataDescriptor::linear(SampleType::Int64, 1.0, 0.0));
        let signal = f64_signal();
        let mut reader = StreamReader::<f64, i64>::new(&signal).unwrap();

        let domain = Arc::new(DataPacket::implicit(domain_desc, 2, 0.0, None).unwrap());
        let mut packet =
            DataPacket::with_heap(signal.descriptor(), 3, 0.0, Some(domain)).unwrap();
        packet.write_samples(&[1.0, 2.0, 3.0]).unwrap();
        signal.send_packet(packet).unwrap();

        let mut values = [0.0; 3];
        let mut times = [0i64; 3];
        let result = reader.read_with_domain(&mut values, &mut times, Duration::ZERO);
        assert_eq!(result.status, ReadStatus::InvalidData);
        assert!(!reader.is_valid());
    }

    #[test]
    fn test_timeout_all_waits_for_full_buffer() {
        let signal = f64_signal();
        let mut reader = StreamReader::<f64>::new(&signal).unwrap();
        reader.set_timeout_type(ReadTimeoutType::All);
        send_f64(&signal, &[1.0, 2.0]);

        let mut buf = [0.0; 4];
        let result = reader.read(&mut buf, Duration::from_millis(20));
        assert_eq!(result.count, 2);
        assert_eq!(result.status, ReadStatus::Timeout);
    }

    #[test]
    fn test_read_all() {
        let signal = f64_signal();
        let mut reader = StreamReader::<f64>::new(&signal).unwrap();
        send_f64(&signal, &[1.0, 2.0, 3.0]);
        let (values, result) = reader.read_all();
        assert!(result.is_ok());
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_callback_fires_per_packet() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let signal = f64_signal();
        let reader = StreamReader::<f64>::new(&signal).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        reader.set_on_data_available(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        send_f64(&signal, &[1.0]);
        send_f64(&signal, &[2.0]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_drop_disconnects_signal() {
        let signal = f64_signal();
        let reader = StreamReader::<f64>::new(&signal).unwrap();
        assert_eq!(signal.connection_count(), 1);
        drop(reader);
        assert_eq!(signal.connection_count(), 0);
    }
}
