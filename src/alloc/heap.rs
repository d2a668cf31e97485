//! Heap-backed allocators.

use super::Allocator;
use crate::descriptor::DataDescriptor;
use crate::error::{DaqError, Result};
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

/// Alignment used when a caller does not ask for more (fits every scalar type)
pub const DEFAULT_ALIGNMENT: usize = 8;

fn layout_for(bytes: usize, align: usize) -> Result<Layout> {
    Layout::from_size_align(bytes, align).map_err(|e| {
        DaqError::InvalidParameter(format!(
            "invalid layout ({} bytes, align {}): {}",
            bytes, align, e
        ))
    })
}

fn heap_allocate(bytes: usize, align: usize) -> Result<NonNull<u8>> {
    if bytes == 0 {
        return Err(DaqError::InvalidParameter(
            "zero-sized heap allocation".to_string(),
        ));
    }
    let layout = layout_for(bytes, align)?;
    // SAFETY: layout has non-zero size.
    let ptr = unsafe { alloc_zeroed(layout) };
    NonNull::new(ptr).ok_or(DaqError::OutOfMemory { bytes, align })
}

fn heap_free(address: NonNull<u8>, bytes: usize, align: usize) -> Result<()> {
    let layout = layout_for(bytes, align)?;
    // SAFETY: `address` was returned by `heap_allocate` with this same layout;
    // `MemoryBlock` guarantees it is released only once.
    unsafe { dealloc(address.as_ptr(), layout) };
    Ok(())
}

/// Plain heap allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapAllocator;

impl HeapAllocator {
    pub fn new() -> Self {
        Self
    }
}

impl Allocator for HeapAllocator {
    fn allocate(
        &self,
        _descriptor: Option<&DataDescriptor>,
        bytes: usize,
        align: usize,
    ) -> Result<NonNull<u8>> {
        heap_allocate(bytes, align.max(DEFAULT_ALIGNMENT))
    }

    fn free(&self, address: NonNull<u8>, bytes: usize, align: usize) -> Result<()> {
        heap_free(address, bytes, align.max(DEFAULT_ALIGNMENT))
    }
}

/// Heap allocator that never aligns below a fixed boundary (e.g. 64 for cache lines / SIMD).
#[derive(Debug, Clone, Copy)]
pub struct AlignedAllocator {
    alignment: usize,
}

impl AlignedAllocator {
    /// `alignment` must be a power of two.
    pub fn new(alignment: usize) -> Result<Self> {
        if !alignment.is_power_of_two() {
            return Err(DaqError::InvalidParameter(format!(
                "alignment {} is not a power of two",
                alignment
            )));
        }
        Ok(Self { alignment })
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }
}

impl Allocator for AlignedAllocator {
    fn allocate(
        &self,
        _descriptor: Option<&DataDescriptor>,
        bytes: usize,
        align: usize,
    ) -> Result<NonNull<u8>> {
        heap_allocate(bytes, align.max(self.alignment))
    }

    fn free(&self, address: NonNull<u8>, bytes: usize, align: usize) -> Result<()> {
        heap_free(address, bytes, align.max(self.alignment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_allocate_free() {
        let heap = HeapAllocator::new();
        let ptr = heap.allocate(None, 32, 4).unwrap();
        assert_eq!(ptr.as_ptr() as usize % DEFAULT_ALIGNMENT, 0);
        heap.free(ptr, 32, 4).unwrap();
    }

    #[test]
    fn test_aligned_allocator_alignment() {
        let aligned = AlignedAllocator::new(64).unwrap();
        let ptr = aligned.allocate(None, 100, 1).unwrap();
        assert_eq!(ptr.as_ptr() as usize % 64, 0);
        aligned.free(ptr, 100, 1).unwrap();
    }

    #[test]
    fn test_aligned_allocator_rejects_bad_alignment() {
        assert!(AlignedAllocator::new(48).is_err());
    }

    #[test]
    fn test_zero_sized_rejected() {
        assert!(HeapAllocator::new().allocate(None, 0, 8).is_err());
    }
}
