//! Data packets: a run of samples plus the descriptor needed to decode them.

use super::next_packet_id;
use crate::alloc::{Allocator, HeapAllocator, MemoryBlock, DEFAULT_ALIGNMENT};
use crate::decode;
use crate::descriptor::DataDescriptor;
use crate::error::{DaqError, Result};
use crate::sample::SampleValue;
use std::sync::Arc;

enum PacketMemory {
    /// Implicit rule or zero samples
    None,
    Owned(MemoryBlock),
    /// Memory borrowed from another packet (see [`DataPacket::wrap`])
    Shared(Arc<DataPacket>),
}

/// Samples described by a [`DataDescriptor`].
///
/// Explicit-rule packets own a [`MemoryBlock`] of
/// `sample_count * descriptor.sample_size()` bytes. Fill it through
/// [`raw_data_mut`](Self::raw_data_mut) or [`write_samples`](Self::write_samples)
/// before publishing; once wrapped in a [`Packet`](super::Packet) the packet is
/// shared and read-only.
pub struct DataPacket {
    id: u64,
    descriptor: Arc<DataDescriptor>,
    sample_count: usize,
    offset: f64,
    memory: PacketMemory,
    domain_packet: Option<Arc<DataPacket>>,
}

fn alignment_for(descriptor: &DataDescriptor) -> usize {
    descriptor
        .raw_sample_type()
        .size_bytes()
        .unwrap_or(DEFAULT_ALIGNMENT)
}

impl DataPacket {
    /// Create a packet, allocating its memory from `allocator` when the
    /// descriptor stores samples explicitly.
    pub fn create(
        descriptor: Arc<DataDescriptor>,
        sample_count: usize,
        offset: f64,
        allocator: &Arc<dyn Allocator>,
        domain_packet: Option<Arc<DataPacket>>,
    ) -> Result<Self> {
        let bytes = descriptor
            .sample_size()
            .checked_mul(sample_count)
            .ok_or(DaqError::OutOfMemory {
                bytes: usize::MAX,
                align: alignment_for(&descriptor),
            })?;
        let memory = if bytes == 0 {
            PacketMemory::None
        } else {
            let block = MemoryBlock::allocate(
                allocator,
                Some(&descriptor),
                bytes,
                alignment_for(&descriptor),
            )?;
            PacketMemory::Owned(block)
        };

        Ok(Self {
            id: next_packet_id(),
            descriptor,
            sample_count,
            offset,
            memory,
            domain_packet,
        })
    }

    /// Create a packet backed by the plain heap allocator.
    pub fn with_heap(
        descriptor: Arc<DataDescriptor>,
        sample_count: usize,
        offset: f64,
        domain_packet: Option<Arc<DataPacket>>,
    ) -> Result<Self> {
        let heap: Arc<dyn Allocator> = Arc::new(HeapAllocator::new());
        Self::create(descriptor, sample_count, offset, &heap, domain_packet)
    }

    /// Create a packet for a linear or constant rule; no memory is allocated.
    pub fn implicit(
        descriptor: Arc<DataDescriptor>,
        sample_count: usize,
        offset: f64,
        domain_packet: Option<Arc<DataPacket>>,
    ) -> Result<Self> {
        if !descriptor.rule().is_implicit() {
            return Err(DaqError::InvalidParameter(
                "implicit packets need a linear or constant rule".to_string(),
            ));
        }
        Ok(Self {
            id: next_packet_id(),
            descriptor,
            sample_count,
            offset,
            memory: PacketMemory::None,
            domain_packet,
        })
    }

    /// Reinterpret `source`'s memory under `descriptor` without copying.
    ///
    /// The memory size must be a whole multiple of the new sample size. The
    /// wrapper keeps `source` alive and inherits its offset and domain packet.
    pub fn wrap(source: Arc<DataPacket>, descriptor: Arc<DataDescriptor>) -> Result<Self> {
        let sample_size = descriptor.sample_size();
        let data_size = source.data_size();
        if sample_size == 0 || data_size % sample_size != 0 {
            return Err(DaqError::InvalidParameter(format!(
                "cannot view {} bytes as samples of {} bytes",
                data_size, sample_size
            )));
        }
        let addr = source.raw_data().as_ptr() as usize;
        if addr % alignment_for(&descriptor) != 0 {
            return Err(DaqError::InvalidParameter(
                "source memory is not aligned for the wrapping descriptor".to_string(),
            ));
        }

        Ok(Self {
            id: next_packet_id(),
            sample_count: data_size / sample_size,
            offset: source.offset,
            domain_packet: source.domain_packet.clone(),
            descriptor,
            memory: PacketMemory::Shared(source),
        })
    }

    /// Recycle `existing`'s allocation for a new packet.
    ///
    /// Returns `None` (and releases `existing`'s reference) when the packet is
    /// still referenced elsewhere, has no memory of its own, or the block is
    /// too small or too loosely aligned for the new layout. Callers then
    /// allocate a fresh packet.
    pub fn try_reuse(
        existing: Arc<DataPacket>,
        descriptor: Arc<DataDescriptor>,
        sample_count: usize,
        offset: f64,
        domain_packet: Option<Arc<DataPacket>>,
    ) -> Option<Self> {
        let packet = Arc::try_unwrap(existing).ok()?;
        let PacketMemory::Owned(block) = packet.memory else {
            return None;
        };

        let bytes = descriptor.sample_size().checked_mul(sample_count)?;
        if bytes == 0 || bytes > block.len() || alignment_for(&descriptor) > block.align() {
            return None;
        }

        Some(Self {
            id: next_packet_id(),
            descriptor,
            sample_count,
            offset,
            memory: PacketMemory::Owned(block),
            domain_packet,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn descriptor(&self) -> &Arc<DataDescriptor> {
        &self.descriptor
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn domain_packet(&self) -> Option<&Arc<DataPacket>> {
        self.domain_packet.as_ref()
    }

    /// Bytes of sample data (`sample_count * sample_size`)
    pub fn data_size(&self) -> usize {
        match &self.memory {
            PacketMemory::None => 0,
            PacketMemory::Owned(_) => self.sample_count * self.descriptor.sample_size(),
            PacketMemory::Shared(source) => source.data_size(),
        }
    }

    pub fn raw_data(&self) -> &[u8] {
        match &self.memory {
            PacketMemory::None => &[],
            PacketMemory::Owned(block) => &block.as_slice()[..self.data_size()],
            PacketMemory::Shared(source) => source.raw_data(),
        }
    }

    /// Mutable access to owned memory; `None` for implicit or wrapped packets.
    pub fn raw_data_mut(&mut self) -> Option<&mut [u8]> {
        let size = self.data_size();
        match &mut self.memory {
            PacketMemory::Owned(block) => Some(&mut block.as_mut_slice()[..size]),
            _ => None,
        }
    }

    /// Address of the first byte of sample data, if any
    pub fn memory_address(&self) -> Option<usize> {
        match &self.memory {
            PacketMemory::None => None,
            PacketMemory::Owned(block) => Some(block.address()),
            PacketMemory::Shared(source) => source.memory_address(),
        }
    }

    /// Copy typed values into the packet's memory.
    ///
    /// `T` must match the stored sample type and `values` must fill the packet.
    pub fn write_samples<T: SampleValue>(&mut self, values: &[T]) -> Result<()> {
        let stored = self.descriptor.raw_sample_type();
        if T::SAMPLE_TYPE != stored {
            return Err(DaqError::InvalidType(format!(
                "packet stores {} samples, got {}",
                stored,
                T::SAMPLE_TYPE
            )));
        }
        let expected = self.sample_count * self.descriptor.elements_per_sample();
        if values.len() != expected {
            return Err(DaqError::InvalidParameter(format!(
                "packet holds {} values, got {}",
                expected,
                values.len()
            )));
        }

        let size = std::mem::size_of::<T>();
        let data = self.raw_data_mut().ok_or_else(|| {
            DaqError::InvalidParameter("packet has no writable memory".to_string())
        })?;
        for (value, chunk) in values.iter().zip(data.chunks_exact_mut(size)) {
            value.write_ne(chunk);
        }
        Ok(())
    }

    /// Decode samples starting at `first` into `out`; returns whole samples written.
    pub fn decode_into<T: SampleValue>(&self, first: usize, out: &mut [T]) -> Result<usize> {
        let remaining = self.sample_count.saturating_sub(first);
        let per_sample = self.descriptor.elements_per_sample();
        let limit = out.len().min(remaining * per_sample);
        decode::decode_into(
            &self.descriptor,
            self.raw_data(),
            self.offset,
            first,
            &mut out[..limit],
        )
    }

    /// Decode every sample into a new vector.
    pub fn data<T: SampleValue>(&self) -> Result<Vec<T>> {
        decode::decode(
            &self.descriptor,
            self.raw_data(),
            self.sample_count,
            self.offset,
        )
    }

    /// Value of the last sample under a linear rule (`offset + start + (n-1)*delta`).
    pub fn last_linear_value(&self) -> Option<f64> {
        match self.descriptor.rule() {
            crate::descriptor::DataRule::Linear { delta, start } if self.sample_count > 0 => {
                Some(self.offset + start + (self.sample_count - 1) as f64 * delta)
            }
            _ => None,
        }
    }
}

impl std::fmt::Debug for DataPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataPacket")
            .field("id", &self.id)
            .field("descriptor", &self.descriptor.to_string())
            .field("sample_count", &self.sample_count)
            .field("offset", &self.offset)
            .field("data_size", &self.data_size())
            .field("has_domain", &self.domain_packet.is_some())
            .finish()
    }
}
