//! Externally owned packet memory.
//!
//! Wraps one region the caller already owns (a driver DMA buffer, a `Box<[u8]>`
//! filled by another library). The region can be handed to exactly one packet;
//! when that packet's memory is released, the [`Deleter`] runs once.

use super::Allocator;
use crate::descriptor::DataDescriptor;
use crate::error::{DaqError, Result};
use parking_lot::Mutex;
use std::ptr::NonNull;

/// One-shot release callback for external memory.
pub trait Deleter: Send {
    fn delete(self: Box<Self>, address: NonNull<u8>);
}

impl<F> Deleter for F
where
    F: FnOnce(NonNull<u8>) + Send,
{
    fn delete(self: Box<Self>, address: NonNull<u8>) {
        (*self)(address)
    }
}

enum ExternalState {
    Available(Box<dyn Deleter>),
    HandedOut(Box<dyn Deleter>),
    Freed,
}

/// Allocator over a single externally owned region.
pub struct ExternalAllocator {
    address: NonNull<u8>,
    len: usize,
    state: Mutex<ExternalState>,
}

// SAFETY: the allocator never dereferences `address`; it only compares it and
// passes it to the deleter, which is `Send`.
unsafe impl Send for ExternalAllocator {}
unsafe impl Sync for ExternalAllocator {}

impl ExternalAllocator {
    /// Wrap `len` bytes at `address`.
    ///
    /// # Safety
    ///
    /// `address` must point to `len` initialized bytes that stay valid and are
    /// not accessed elsewhere until `deleter` is invoked.
    pub unsafe fn new(address: NonNull<u8>, len: usize, deleter: impl Deleter + 'static) -> Self {
        Self {
            address,
            len,
            state: Mutex::new(ExternalState::Available(Box::new(deleter))),
        }
    }

    /// Take ownership of a boxed slice; the slice is dropped by the deleter.
    pub fn from_boxed_slice(data: Box<[u8]>) -> Self {
        let len = data.len();
        let slice: NonNull<[u8]> = NonNull::from(Box::leak(data));
        let raw = slice.as_ptr();
        let address = slice.cast::<u8>();
        let deleter = move |_: NonNull<u8>| {
            // SAFETY: `raw` came from `Box::into_raw` above and is reclaimed once.
            drop(unsafe { Box::from_raw(raw) });
        };
        // SAFETY: the boxed slice is initialized and now only reachable through us.
        unsafe { Self::new(address, len, SendPtr(deleter)) }
    }

    pub fn address(&self) -> NonNull<u8> {
        self.address
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the deleter has already run
    pub fn is_freed(&self) -> bool {
        matches!(*self.state.lock(), ExternalState::Freed)
    }

    fn dealloc_error(&self, address: NonNull<u8>, message: &str) -> DaqError {
        DaqError::PacketMemoryDeallocation {
            address: address.as_ptr() as usize,
            message: message.to_string(),
        }
    }
}

/// Carries a closure that captures a raw pointer across threads.
struct SendPtr<F>(F);

// SAFETY: the wrapped closure owns the only handle to its allocation.
unsafe impl<F> Send for SendPtr<F> {}

impl<F> Deleter for SendPtr<F>
where
    F: FnOnce(NonNull<u8>),
{
    fn delete(self: Box<Self>, address: NonNull<u8>) {
        let SendPtr(f) = *self;
        f(address)
    }
}

impl Allocator for ExternalAllocator {
    fn allocate(
        &self,
        _descriptor: Option<&DataDescriptor>,
        bytes: usize,
        align: usize,
    ) -> Result<NonNull<u8>> {
        if bytes > self.len {
            return Err(DaqError::PacketMemoryAllocation(format!(
                "external region holds {} bytes, {} requested",
                self.len, bytes
            )));
        }
        if align > 1 && self.address.as_ptr() as usize % align != 0 {
            return Err(DaqError::PacketMemoryAllocation(format!(
                "external region is not aligned to {}",
                align
            )));
        }

        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, ExternalState::Freed) {
            ExternalState::Available(deleter) => {
                *state = ExternalState::HandedOut(deleter);
                Ok(self.address)
            }
            other => {
                *state = other;
                Err(DaqError::PacketMemoryAllocation(
                    "external region already handed out".to_string(),
                ))
            }
        }
    }

    fn free(&self, address: NonNull<u8>, _bytes: usize, _align: usize) -> Result<()> {
        if address != self.address {
            return Err(self.dealloc_error(address, "address does not match external region"));
        }

        let deleter = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, ExternalState::Freed) {
                ExternalState::HandedOut(deleter) => deleter,
                ExternalState::Freed => {
                    return Err(self.dealloc_error(address, "external region already freed"));
                }
                available @ ExternalState::Available(_) => {
                    *state = available;
                    return Err(self.dealloc_error(address, "external region was never allocated"));
                }
            }
        };

        // Run outside the lock; deleters may block on their own resources.
        deleter.delete(address);
        Ok(())
    }
}

impl Drop for ExternalAllocator {
    fn drop(&mut self) {
        // A region that was never handed out still belongs to the caller.
        if let ExternalState::Available(deleter) =
            std::mem::replace(self.state.get_mut(), ExternalState::Freed)
        {
            deleter.delete(self.address);
        }
    }
}

impl std::fmt::Debug for ExternalAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalAllocator")
            .field("address", &self.address)
            .field("len", &self.len)
            .field("freed", &self.is_freed())
            .finish()
    }
}
