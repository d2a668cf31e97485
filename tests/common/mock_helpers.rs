//! Mock construction helpers

use crossbeam_channel::{unbounded, Receiver, Sender};
use daqflow::alloc::ExternalAllocator;
use daqflow::{InputPort, InputPortListener};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Listener that forwards port notifications over a channel
pub struct ChannelListener {
    sender: Sender<Notification>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    Connected,
    Disconnected,
    PacketReceived,
}

impl InputPortListener for ChannelListener {
    fn connected(&self, _port: &InputPort) {
        let _ = self.sender.send(Notification::Connected);
    }

    fn disconnected(&self, _port: &InputPort) {
        let _ = self.sender.send(Notification::Disconnected);
    }

    fn packet_received(&self, _port: &InputPort) {
        let _ = self.sender.send(Notification::PacketReceived);
    }
}

/// Create a listener and the receiving end of its notifications
pub fn create_channel_listener() -> (Arc<ChannelListener>, Receiver<Notification>) {
    let (sender, receiver) = unbounded();
    (Arc::new(ChannelListener { sender }), receiver)
}

/// An external allocator over `bytes` zeroed bytes whose deleter counts calls
pub fn create_counting_external(bytes: usize) -> (Arc<ExternalAllocator>, Arc<AtomicUsize>) {
    let deletes = Arc::new(AtomicUsize::new(0));
    // u64 storage keeps the region aligned for every sample type.
    let storage: Box<[u64]> = vec![0u64; bytes.div_ceil(8)].into_boxed_slice();
    let raw: *mut [u64] = Box::into_raw(storage);
    let address = NonNull::new(raw as *mut u8).expect("boxed slice is non-null");
    let raw_address = raw as *mut u64 as usize;
    let words = bytes.div_ceil(8);

    let counter = Arc::clone(&deletes);
    let deleter = move |freed: NonNull<u8>| {
        assert_eq!(freed.as_ptr() as usize, raw_address);
        counter.fetch_add(1, Ordering::SeqCst);
        // SAFETY: the region came from `Box::into_raw` above and the deleter
        // runs at most once.
        drop(unsafe {
            Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                raw_address as *mut u64,
                words,
            ))
        });
    };

    // SAFETY: the region is initialized and only reachable through the allocator.
    let allocator = unsafe { ExternalAllocator::new(address, bytes, deleter) };
    (Arc::new(allocator), deletes)
}
