//! Integration tests for packet memory ownership

mod common;

use common::builders::SignalBuilder;
use common::mock_helpers::create_counting_external;
use common::test_timeout;
use daqflow::alloc::{Allocator, PacketBuffer};
use daqflow::{DaqError, DataPacket, SampleType, StreamReader};
use std::sync::atomic::Ordering;
use std::sync::Arc;

#[test]
fn test_external_memory_freed_exactly_once() {
    let signal = SignalBuilder::new("dma").sample_type(SampleType::Int32).build();
    let mut reader = StreamReader::<i32>::new(&signal).unwrap();
    let (external, deletes) = create_counting_external(16);
    let address = external.address();
    let allocator: Arc<dyn Allocator> = external.clone();

    let mut packet = DataPacket::create(signal.descriptor(), 4, 0.0, &allocator, None).unwrap();
    assert_eq!(packet.memory_address(), Some(address.as_ptr() as usize));
    packet.write_samples(&[1, 2, 3, 4]).unwrap();
    signal.send_packet(packet).unwrap();

    // Still referenced by the queue.
    assert_eq!(deletes.load(Ordering::SeqCst), 0);

    let (values, result) = reader.read_all();
    assert!(result.is_ok());
    assert_eq!(values, vec![1, 2, 3, 4]);
    assert_eq!(deletes.load(Ordering::SeqCst), 1);
    assert!(external.is_freed());

    // A second release is reported and does not run the deleter again.
    let err = allocator.free(address, 16, 4).unwrap_err();
    assert!(matches!(err, DaqError::PacketMemoryDeallocation { .. }));
    assert_eq!(deletes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_external_region_handed_out_once() {
    let signal = SignalBuilder::new("dma").sample_type(SampleType::Int32).build();
    let (external, deletes) = create_counting_external(16);
    let allocator: Arc<dyn Allocator> = external;

    let first = DataPacket::create(signal.descriptor(), 4, 0.0, &allocator, None).unwrap();
    let second = DataPacket::create(signal.descriptor(), 4, 0.0, &allocator, None);
    assert!(matches!(second, Err(DaqError::PacketMemoryAllocation(_))));

    drop(first);
    assert_eq!(deletes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_unused_external_region_returned_on_drop() {
    let (external, deletes) = create_counting_external(8);
    drop(external);
    assert_eq!(deletes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_wrapped_packet_keeps_memory_alive() {
    let signal = SignalBuilder::new("bytes").sample_type(SampleType::UInt8).build();
    let (external, deletes) = create_counting_external(8);
    let allocator: Arc<dyn Allocator> = external;

    let mut source = DataPacket::create(signal.descriptor(), 8, 0.0, &allocator, None).unwrap();
    source.write_samples(&[1u8, 0, 0, 0, 2, 0, 0, 0]).unwrap();
    let source = Arc::new(source);

    let words = SignalBuilder::new("words").sample_type(SampleType::UInt32).build();
    let wrapped = DataPacket::wrap(Arc::clone(&source), words.descriptor()).unwrap();
    drop(source);
    assert_eq!(deletes.load(Ordering::SeqCst), 0);

    let values = wrapped.data::<u32>().unwrap();
    assert_eq!(values, vec![u32::from_ne_bytes([1, 0, 0, 0]), u32::from_ne_bytes([2, 0, 0, 0])]);
    drop(wrapped);
    assert_eq!(deletes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_packet_buffer_recycles_space() {
    let signal = SignalBuilder::new("ring").build();
    let mut reader = StreamReader::<f64>::new(&signal).unwrap();
    let buffer = Arc::new(PacketBuffer::new(256, 8).unwrap());
    let allocator: Arc<dyn Allocator> = buffer.clone();

    let mut values = [0.0; 16];
    for round in 0..10 {
        let mut packet = DataPacket::create(signal.descriptor(), 16, 0.0, &allocator, None).unwrap();
        let samples: Vec<f64> = (0..16).map(|i| (round * 16 + i) as f64).collect();
        packet.write_samples(&samples).unwrap();
        signal.send_packet(packet).unwrap();

        let result = reader.read(&mut values, test_timeout());
        assert_eq!(result.count, 16);
        assert_eq!(values[0], (round * 16) as f64);
        assert_eq!(buffer.outstanding(), 0);
    }
    assert_eq!(buffer.used_bytes(), 0);
}

#[test]
fn test_try_reuse_requires_sole_owner() {
    let signal = SignalBuilder::new("voltage").build();
    let packet = Arc::new(DataPacket::with_heap(signal.descriptor(), 8, 0.0, None).unwrap());
    let shared = Arc::clone(&packet);

    assert!(DataPacket::try_reuse(packet, signal.descriptor(), 4, 1.0, None).is_none());

    let reused = DataPacket::try_reuse(shared, signal.descriptor(), 4, 1.0, None)
        .expect("sole owner can reuse");
    assert_eq!(reused.sample_count(), 4);
    assert_eq!(reused.offset(), 1.0);
}
