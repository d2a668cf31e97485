//! Memory providers for packet payloads.
//!
//! Every explicit-rule data packet owns a [`MemoryBlock`] obtained from an
//! [`Allocator`]. The block hands its memory back to the allocator that
//! produced it exactly once, when the block is dropped (i.e. when the last
//! packet referencing it goes away).
//!
//! # Allocators
//!
//! - [`HeapAllocator`] - zeroed heap memory at natural (8-byte) alignment
//! - [`AlignedAllocator`] - heap memory at a caller-chosen minimum alignment
//! - [`ExternalAllocator`] - memory owned elsewhere, released through a one-shot [`Deleter`]
//! - [`PacketBuffer`] - fixed ring region recycled as packets are released

mod external;
mod heap;
mod packet_buffer;

pub use external::{Deleter, ExternalAllocator};
pub use heap::{AlignedAllocator, HeapAllocator, DEFAULT_ALIGNMENT};
pub use packet_buffer::PacketBuffer;

use crate::descriptor::DataDescriptor;
use crate::error::{DaqError, Result};
use std::ptr::NonNull;
use std::sync::Arc;

/// A provider of packet memory.
///
/// `free` receives exactly the address, size and alignment that `allocate`
/// returned / was asked for. Implementations must report bookkeeping
/// violations (double free, unknown address) as
/// [`DaqError::PacketMemoryDeallocation`] rather than ignoring them.
pub trait Allocator: Send + Sync {
    /// Allocate `bytes` bytes aligned to at least `align`.
    ///
    /// The returned memory must be initialized (zeroed or previously written).
    fn allocate(
        &self,
        descriptor: Option<&DataDescriptor>,
        bytes: usize,
        align: usize,
    ) -> Result<NonNull<u8>>;

    /// Release memory previously returned by `allocate`.
    fn free(&self, address: NonNull<u8>, bytes: usize, align: usize) -> Result<()>;
}

/// An allocation that returns itself to its allocator on drop.
pub struct MemoryBlock {
    ptr: NonNull<u8>,
    len: usize,
    align: usize,
    allocator: Arc<dyn Allocator>,
}

// SAFETY: the block uniquely owns its region; shared access only hands out
// `&[u8]`, and mutable access requires `&mut self`.
unsafe impl Send for MemoryBlock {}
unsafe impl Sync for MemoryBlock {}

impl MemoryBlock {
    /// Allocate a block of `bytes` bytes. `bytes` must be non-zero.
    pub fn allocate(
        allocator: &Arc<dyn Allocator>,
        descriptor: Option<&DataDescriptor>,
        bytes: usize,
        align: usize,
    ) -> Result<Self> {
        if bytes == 0 {
            return Err(DaqError::InvalidParameter(
                "cannot allocate an empty memory block".to_string(),
            ));
        }
        let ptr = allocator.allocate(descriptor, bytes, align)?;
        Ok(Self {
            ptr,
            len: bytes,
            align,
            allocator: Arc::clone(allocator),
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn align(&self) -> usize {
        self.align
    }

    /// Start address, for diagnostics and identity checks
    pub fn address(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    pub fn allocator(&self) -> &Arc<dyn Allocator> {
        &self.allocator
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: allocators return initialized memory of at least `len` bytes
        // that stays valid until `free`, which only runs in `drop`.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for MemoryBlock {
    fn drop(&mut self) {
        if let Err(e) = self.allocator.free(self.ptr, self.len, self.align) {
            tracing::error!("Failed to release packet memory: {}", e);
        }
    }
}

impl std::fmt::Debug for MemoryBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBlock")
            .field("address", &format_args!("0x{:x}", self.address()))
            .field("len", &self.len)
            .field("align", &self.align)
            .finish()
    }
}
