//! Ring-buffer packet allocator.
//!
//! A `PacketBuffer` carves packet payloads out of one fixed region, in
//! allocation order, wrapping to the start when the end is reached. Space is
//! reclaimed from the oldest allocation forward: a packet released out of
//! order is marked free but its bytes only become reusable once every older
//! packet has been released too.

use super::{Allocator, DEFAULT_ALIGNMENT};
use crate::config::PacketBufferConfig;
use crate::descriptor::DataDescriptor;
use crate::error::{DaqError, Result};
use parking_lot::Mutex;
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::collections::VecDeque;
use std::ptr::NonNull;

#[derive(Debug, Clone, Copy)]
struct Region {
    start: usize,
    end: usize,
    freed: bool,
}

#[derive(Debug, Default)]
struct RingState {
    /// Next write position
    head: usize,
    /// Outstanding regions, oldest first
    regions: VecDeque<Region>,
}

impl RingState {
    fn tail(&self) -> Option<usize> {
        self.regions.front().map(|r| r.start)
    }

    /// True when the newest region sits before the oldest one.
    fn wrapped(&self) -> bool {
        match (self.regions.front(), self.regions.back()) {
            (Some(first), Some(last)) => last.start < first.start,
            _ => false,
        }
    }
}

fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Fixed-size ring allocator for packet payloads.
pub struct PacketBuffer {
    base: NonNull<u8>,
    layout: Layout,
    state: Mutex<RingState>,
}

// SAFETY: `base` is owned by the buffer; regions are handed out disjointly
// and tracked under the mutex.
unsafe impl Send for PacketBuffer {}
unsafe impl Sync for PacketBuffer {}

impl PacketBuffer {
    /// Create a ring of `capacity` bytes whose start is aligned to `alignment`.
    pub fn new(capacity: usize, alignment: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(DaqError::InvalidParameter(
                "packet buffer capacity must be non-zero".to_string(),
            ));
        }
        let layout = Layout::from_size_align(capacity, alignment.max(DEFAULT_ALIGNMENT))
            .map_err(|e| DaqError::InvalidParameter(format!("packet buffer layout: {}", e)))?;
        // SAFETY: layout has non-zero size.
        let base = NonNull::new(unsafe { alloc_zeroed(layout) }).ok_or(DaqError::OutOfMemory {
            bytes: capacity,
            align: layout.align(),
        })?;

        tracing::debug!("Packet buffer created: {} bytes", capacity);

        Ok(Self {
            base,
            layout,
            state: Mutex::new(RingState::default()),
        })
    }

    pub fn with_config(config: &PacketBufferConfig) -> Result<Self> {
        Self::new(config.capacity_bytes, config.alignment)
    }

    pub fn capacity(&self) -> usize {
        self.layout.size()
    }

    /// Bytes held by regions not yet reclaimed (including released-but-blocked ones)
    pub fn used_bytes(&self) -> usize {
        self.state
            .lock()
            .regions
            .iter()
            .map(|r| r.end - r.start)
            .sum()
    }

    /// Number of allocations that have not been freed
    pub fn outstanding(&self) -> usize {
        self.state.lock().regions.iter().filter(|r| !r.freed).count()
    }

    fn place(&self, state: &RingState, bytes: usize, align: usize) -> Option<usize> {
        let capacity = self.capacity();
        let Some(tail) = state.tail() else {
            return (bytes <= capacity).then_some(0);
        };

        let start = align_up(state.head, align);
        if state.wrapped() {
            (start + bytes <= tail).then_some(start)
        } else if start + bytes <= capacity {
            Some(start)
        } else {
            (bytes <= tail).then_some(0)
        }
    }
}

impl Allocator for PacketBuffer {
    fn allocate(
        &self,
        _descriptor: Option<&DataDescriptor>,
        bytes: usize,
        align: usize,
    ) -> Result<NonNull<u8>> {
        let align = align.max(1);
        if !align.is_power_of_two() || align > self.layout.align() {
            return Err(DaqError::PacketMemoryAllocation(format!(
                "packet buffer cannot satisfy alignment {}",
                align
            )));
        }

        let mut state = self.state.lock();
        let start = self
            .place(&state, bytes, align)
            .ok_or(DaqError::OutOfMemory { bytes, align })?;

        state.regions.push_back(Region {
            start,
            end: start + bytes,
            freed: false,
        });
        state.head = start + bytes;

        // SAFETY: start + bytes <= capacity, so the offset stays inside the region.
        let ptr = unsafe { self.base.as_ptr().add(start) };
        Ok(NonNull::new(ptr).unwrap_or(self.base))
    }

    fn free(&self, address: NonNull<u8>, _bytes: usize, _align: usize) -> Result<()> {
        let addr = address.as_ptr() as usize;
        let base = self.base.as_ptr() as usize;
        let dealloc_error = |message: &str| DaqError::PacketMemoryDeallocation {
            address: addr,
            message: message.to_string(),
        };

        if addr < base || addr >= base + self.capacity() {
            return Err(dealloc_error("address outside packet buffer"));
        }
        let offset = addr - base;

        let mut state = self.state.lock();
        let region = state
            .regions
            .iter_mut()
            .find(|r| r.start == offset && !r.freed)
            .ok_or_else(|| dealloc_error("no outstanding allocation at address"))?;
        region.freed = true;

        while state.regions.front().is_some_and(|r| r.freed) {
            state.regions.pop_front();
        }
        if state.regions.is_empty() {
            state.head = 0;
        }
        Ok(())
    }
}

impl Drop for PacketBuffer {
    fn drop(&mut self) {
        // SAFETY: `base` came from `alloc_zeroed(self.layout)`.
        unsafe { dealloc(self.base.as_ptr(), self.layout) };
    }
}

impl std::fmt::Debug for PacketBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketBuffer")
            .field("capacity", &self.capacity())
            .field("used_bytes", &self.used_bytes())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}
