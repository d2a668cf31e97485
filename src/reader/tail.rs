//! Tail reader: the most recent `history_size` samples.
//!
//! The connection is drained into a bounded history every time the port is
//! notified (and on every read), independent of how often the caller reads.
//! Reads copy the newest samples out of the history without consuming them.
//! Draining pauses at an event until a read has reported it.

use super::base::ReaderCore;
use super::{deadline_after, DomainGap, ReadResult, ReadStatus};
use crate::config::{PortConfig, ReaderConfig};
use crate::descriptor::DataDescriptor;
use crate::error::{DaqError, Result};
use crate::input_port::InputPort;
use crate::packet::EventPacket;
use crate::sample::SampleValue;
use crate::signal::Signal;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Longest single wait of a blocked read. Ports that are never notified
/// are drained by polling at this interval.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

struct TailState<V, D> {
    core: ReaderCore,
    history_size: usize,
    read_domain: bool,
    values: VecDeque<V>,
    domain: VecDeque<D>,
    /// Samples ever added to the history
    accumulated: usize,
    pending_event: Option<Arc<EventPacket>>,
    pending_gaps: Vec<DomainGap>,
    disconnected: bool,
    scratch: Vec<V>,
    scratch_domain: Vec<D>,
}

impl<V: SampleValue, D: SampleValue> TailState<V, D> {
    /// Move everything decodable into the history.
    fn drain(&mut self) {
        if self.pending_event.is_some() || self.core.is_invalid() {
            return;
        }
        self.core.apply_opening_descriptor();
        let value_elems = self.core.value_elements();
        let domain_elems = self.core.domain_elements();
        self.scratch.resize(self.history_size * value_elems, V::default());
        if self.read_domain {
            self.scratch_domain
                .resize(self.history_size * domain_elems, D::default());
        }

        loop {
            let domain = self
                .read_domain
                .then_some(self.scratch_domain.as_mut_slice());
            let result = self
                .core
                .read_samples(&mut self.scratch, domain, 1, Instant::now());
            self.push(result.count);
            self.pending_gaps.extend(result.gaps);

            match result.status {
                ReadStatus::Ok if result.count > 0 => continue,
                ReadStatus::Ok | ReadStatus::Timeout | ReadStatus::InvalidData => break,
                ReadStatus::Event(event) => {
                    self.pending_event = Some(event);
                    break;
                }
                ReadStatus::Disconnected => {
                    self.disconnected = true;
                    break;
                }
            }
        }
    }

    fn push(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        let value_elems = self.core.value_elements();
        let domain_elems = self.core.domain_elements();
        self.values
            .extend(self.scratch[..count * value_elems].iter().copied());
        if self.read_domain {
            self.domain
                .extend(self.scratch_domain[..count * domain_elems].iter().copied());
        }
        self.accumulated += count;

        let max_values = self.history_size * value_elems;
        if self.values.len() > max_values {
            let excess = self.values.len() - max_values;
            self.values.drain(..excess);
        }
        let max_domain = self.history_size * domain_elems;
        if self.domain.len() > max_domain {
            let excess = self.domain.len() - max_domain;
            self.domain.drain(..excess);
        }
    }

    fn history_samples(&self) -> usize {
        self.values.len() / self.core.value_elements()
    }

    /// Copy the newest samples that fit into the buffers.
    fn copy_latest(&self, values: &mut [V], domain: Option<&mut [D]>) -> usize {
        let value_elems = self.core.value_elements();
        let domain_elems = self.core.domain_elements();
        let mut count = self.history_samples().min(values.len() / value_elems);
        if let Some(domain) = domain.as_deref() {
            count = count
                .min(domain.len() / domain_elems)
                .min(self.domain.len() / domain_elems);
        }

        let skip = self.values.len() - count * value_elems;
        for (slot, value) in values.iter_mut().zip(self.values.iter().skip(skip)) {
            *slot = *value;
        }
        if let Some(domain) = domain {
            let skip = self.domain.len() - count * domain_elems;
            for (slot, value) in domain.iter_mut().zip(self.domain.iter().skip(skip)) {
                *slot = *value;
            }
        }
        count
    }
}

struct TailShared<V, D> {
    state: Mutex<TailState<V, D>>,
    /// Signalled after every drain run from a port notification
    drained: Condvar,
}

/// Keeps the last `history_size` samples of a signal.
pub struct TailReader<V: SampleValue = f64, D: SampleValue = i64> {
    shared: Arc<TailShared<V, D>>,
}

impl<V: SampleValue, D: SampleValue> TailReader<V, D> {
    pub fn new(signal: &Signal, history_size: usize) -> Result<Self> {
        let config = ReaderConfig {
            tail_history_size: history_size,
            ..ReaderConfig::default()
        };
        Self::with_config(signal, &config, &PortConfig::default())
    }

    /// History size comes from `config.tail_history_size`. Domain samples are
    /// kept when the signal has a domain signal.
    pub fn with_config(
        signal: &Signal,
        config: &ReaderConfig,
        port_config: &PortConfig,
    ) -> Result<Self> {
        Self::check_history_size(config.tail_history_size)?;
        let read_domain = signal.domain_signal().is_some();
        let core = ReaderCore::from_signal(signal, "tail", config, port_config)?;
        Ok(Self::from_core(core, config.tail_history_size, read_domain))
    }

    pub fn from_port(port: InputPort, config: &ReaderConfig, read_domain: bool) -> Result<Self> {
        Self::check_history_size(config.tail_history_size)?;
        Ok(Self::from_core(
            ReaderCore::from_port(port, config),
            config.tail_history_size,
            read_domain,
        ))
    }

    fn check_history_size(history_size: usize) -> Result<()> {
        if history_size == 0 {
            return Err(DaqError::InvalidParameter(
                "tail history size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    fn from_core(core: ReaderCore, history_size: usize, read_domain: bool) -> Self {
        let listener = Arc::clone(core.listener());
        let state = Mutex::new(TailState {
            core,
            history_size,
            read_domain,
            values: VecDeque::new(),
            domain: VecDeque::new(),
            accumulated: 0,
            pending_event: None,
            pending_gaps: Vec::new(),
            disconnected: false,
            scratch: Vec::new(),
            scratch_domain: Vec::new(),
        });
        let shared = Arc::new(TailShared {
            state,
            drained: Condvar::new(),
        });

        let weak: Weak<TailShared<V, D>> = Arc::downgrade(&shared);
        listener.set_drain(Arc::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.state.lock().drain();
                shared.drained.notify_all();
            }
        }));

        // Pick up anything queued before the drain hook existed.
        shared.state.lock().drain();
        Self { shared }
    }

    pub fn history_size(&self) -> usize {
        self.shared.state.lock().history_size
    }

    /// Whether `history_size` samples have ever been accumulated
    pub fn sufficient_history(&self) -> bool {
        let state = self.shared.state.lock();
        state.accumulated >= state.history_size
    }

    /// Samples currently held
    pub fn available_count(&self) -> usize {
        let mut state = self.shared.state.lock();
        state.drain();
        state.history_samples()
    }

    /// Copy up to `values.len()` of the newest samples.
    ///
    /// Waits up to `timeout` only while the history is empty. A pending event
    /// is reported once, together with the samples that preceded it.
    pub fn read(&mut self, values: &mut [V], timeout: Duration) -> ReadResult {
        self.read_tail(values, None, timeout)
    }

    pub fn read_with_domain(
        &mut self,
        values: &mut [V],
        domain: &mut [D],
        timeout: Duration,
    ) -> ReadResult {
        self.read_tail(values, Some(domain), timeout)
    }

    fn read_tail(
        &mut self,
        values: &mut [V],
        mut domain: Option<&mut [D]>,
        timeout: Duration,
    ) -> ReadResult {
        let deadline = deadline_after(timeout);
        let mut state = self.shared.state.lock();
        loop {
            if state.core.is_invalid() {
                return ReadResult::new(0, ReadStatus::InvalidData);
            }
            if domain.is_some() && !state.read_domain {
                return ReadResult::new(0, ReadStatus::InvalidData);
            }
            state.drain();

            let count = state.copy_latest(values, domain.as_deref_mut());
            let gaps = std::mem::take(&mut state.pending_gaps);
            if let Some(event) = state.pending_event.take() {
                return ReadResult {
                    count,
                    status: ReadStatus::Event(event),
                    gaps,
                };
            }
            if state.core.is_invalid() {
                return ReadResult {
                    count,
                    status: ReadStatus::InvalidData,
                    gaps,
                };
            }
            if count > 0 || values.is_empty() {
                return ReadResult {
                    count,
                    status: ReadStatus::Ok,
                    gaps,
                };
            }
            if state.disconnected || state.core.connection().is_none() {
                return ReadResult::new(0, ReadStatus::Disconnected);
            }
            state.pending_gaps = gaps;

            let now = Instant::now();
            if now >= deadline {
                return ReadResult::new(0, ReadStatus::Timeout);
            }
            // The wait releases the lock so notifications can drain.
            self.shared
                .drained
                .wait_until(&mut state, deadline.min(now + POLL_INTERVAL));
        }
    }

    pub fn set_on_data_available(&self, callback: impl Fn() + Send + Sync + 'static) {
        let state = self.shared.state.lock();
        state
            .core
            .listener()
            .set_on_data_available(Some(Arc::new(callback)));
    }

    pub fn value_descriptor(&self) -> Option<Arc<DataDescriptor>> {
        self.shared.state.lock().core.value_descriptor().cloned()
    }

    pub fn domain_descriptor(&self) -> Option<Arc<DataDescriptor>> {
        self.shared.state.lock().core.domain_descriptor().cloned()
    }

    pub fn is_valid(&self) -> bool {
        !self.shared.state.lock().core.is_invalid()
    }

    /// Leave the invalid state; the history is cleared
    pub fn reset(&mut self) {
        let mut state = self.shared.state.lock();
        state.core.reset();
        state.values.clear();
        state.domain.clear();
        state.accumulated = 0;
        state.pending_gaps.clear();
    }

    pub fn port(&self) -> InputPort {
        self.shared.state.lock().core.port().clone()
    }
}

impl<V: SampleValue, D: SampleValue> std::fmt::Debug for TailReader<V, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("TailReader")
            .field("port", state.core.port())
            .field("history_size", &state.history_size)
            .field("held", &state.history_samples())
            .finish()
    }
}
