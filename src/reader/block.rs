//! Block reader: reads whole blocks of `block_size` samples.
//!
//! Samples that do not complete a block when a read ends (on an event, a
//! timeout or a full buffer) are held back and start the next read.

use super::base::ReaderCore;
use super::{deadline_after, ReadResult, ReadStatus, ReadTimeoutType};
use crate::config::{PortConfig, ReaderConfig};
use crate::descriptor::DataDescriptor;
use crate::error::{DaqError, Result};
use crate::input_port::InputPort;
use crate::packet::EventPacket;
use crate::sample::SampleValue;
use crate::signal::Signal;
use std::sync::Arc;
use std::time::Duration;

pub struct BlockReader<V: SampleValue = f64, D: SampleValue = i64> {
    core: ReaderCore,
    block_size: usize,
    /// Held-back samples, flattened
    staged: Vec<V>,
    staged_domain: Vec<D>,
    staged_samples: usize,
}

impl<V: SampleValue, D: SampleValue> BlockReader<V, D> {
    pub fn new(signal: &Signal, block_size: usize) -> Result<Self> {
        let config = ReaderConfig {
            block_size,
            ..ReaderConfig::default()
        };
        Self::with_config(signal, &config, &PortConfig::default())
    }

    /// Block size comes from `config.block_size`
    pub fn with_config(
        signal: &Signal,
        config: &ReaderConfig,
        port_config: &PortConfig,
    ) -> Result<Self> {
        Self::check_block_size(config.block_size)?;
        let core = ReaderCore::from_signal(signal, "block", config, port_config)?;
        Ok(Self::from_core(core, config.block_size))
    }

    pub fn from_port(port: InputPort, config: &ReaderConfig) -> Result<Self> {
        Self::check_block_size(config.block_size)?;
        Ok(Self::from_core(
            ReaderCore::from_port(port, config),
            config.block_size,
        ))
    }

    fn check_block_size(block_size: usize) -> Result<()> {
        if block_size == 0 {
            return Err(DaqError::InvalidParameter(
                "block size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    fn from_core(core: ReaderCore, block_size: usize) -> Self {
        Self {
            core,
            block_size,
            staged: Vec::new(),
            staged_domain: Vec::new(),
            staged_samples: 0,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Read whole blocks into `values`; `count` in the result is in blocks.
    pub fn read(&mut self, values: &mut [V], timeout: Duration) -> ReadResult {
        self.read_blocks(values, None, timeout)
    }

    pub fn read_with_domain(
        &mut self,
        values: &mut [V],
        domain: &mut [D],
        timeout: Duration,
    ) -> ReadResult {
        self.read_blocks(values, Some(domain), timeout)
    }

    pub fn read_default(&mut self, values: &mut [V]) -> ReadResult {
        let timeout = self.core.default_timeout();
        self.read(values, timeout)
    }

    fn read_blocks(
        &mut self,
        values: &mut [V],
        mut domain: Option<&mut [D]>,
        timeout: Duration,
    ) -> ReadResult {
        self.core.apply_opening_descriptor();
        if self.core.is_invalid() {
            return ReadResult::new(0, ReadStatus::InvalidData);
        }

        let value_elems = self.core.value_elements();
        let domain_elems = self.core.domain_elements();
        let capacity_samples = self.core.capacity(values.len(), domain.as_deref().map(<[D]>::len));
        let capacity_blocks = capacity_samples / self.block_size;
        if capacity_blocks == 0 {
            return ReadResult::new(0, ReadStatus::Ok);
        }
        let total = capacity_blocks * self.block_size;

        // Held-back samples go first.
        let staged = self.staged_samples;
        values[..self.staged.len()].copy_from_slice(&self.staged);
        if let Some(domain) = domain.as_deref_mut() {
            if self.staged_domain.len() < staged * domain_elems {
                self.staged.clear();
                self.staged_domain.clear();
                self.staged_samples = 0;
                return ReadResult::new(0, ReadStatus::InvalidData);
            }
            domain[..staged * domain_elems]
                .copy_from_slice(&self.staged_domain[..staged * domain_elems]);
        }

        let min_count = match self.core.timeout_type() {
            ReadTimeoutType::Any => self.block_size - staged,
            ReadTimeoutType::All => total - staged,
        };
        let mut result = self.core.read_samples(
            &mut values[staged * value_elems..total * value_elems],
            domain
                .as_deref_mut()
                .map(|d| &mut d[staged * domain_elems..total * domain_elems]),
            min_count,
            deadline_after(timeout),
        );

        let samples = staged + result.count;
        let blocks = samples / self.block_size;
        let complete = blocks * self.block_size;

        self.staged.clear();
        self.staged_domain.clear();
        self.staged_samples = 0;
        // An invalidated reader drops its partial block; reset starts afresh.
        if self.core.is_invalid() {
            result.count = blocks;
            return result;
        }

        let value_elems = self.core.value_elements();
        let domain_elems = self.core.domain_elements();
        let values_end = (samples * value_elems).min(values.len());
        self.staged
            .extend_from_slice(&values[(complete * value_elems).min(values_end)..values_end]);
        if let Some(domain) = domain.as_deref() {
            let domain_end = (samples * domain_elems).min(domain.len());
            self.staged_domain.extend_from_slice(
                &domain[(complete * domain_elems).min(domain_end)..domain_end],
            );
        }
        self.staged_samples = samples - complete;

        result.count = blocks;
        result
    }

    /// Whole blocks readable without blocking
    pub fn available_count(&self) -> usize {
        (self.staged_samples + self.core.available_samples()) / self.block_size
    }

    /// Samples held back from the last read
    pub fn staged_samples(&self) -> usize {
        self.staged_samples
    }

    pub fn set_on_data_available(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.core
            .listener()
            .set_on_data_available(Some(Arc::new(callback)));
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

    pub fn last_event(&self) -> Option<&Arc<EventPacket>> {
        self.core.last_event()
    }

    pub fn is_valid(&self) -> bool {
        !self.core.is_invalid()
    }

    /// Leave the invalid state; held-back samples are discarded
    pub fn reset(&mut self) {
        self.core.reset();
        self.staged.clear();
        self.staged_domain.clear();
        self.staged_samples = 0;
    }

    pub fn port(&self) -> &InputPort {
        self.core.port()
    }
}

impl<V: SampleValue, D: SampleValue> std::fmt::Debug for BlockReader<V, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockReader")
            .field("port", self.core.port())
            .field("block_size", &self.block_size)
            .field("staged_samples", &self.staged_samples)
            .field("valid", &self.is_valid())
            .finish()
    }
}
