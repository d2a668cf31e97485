//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use daqflow::{DataPacket, Signal};
use std::time::Duration;

/// Create a test timeout duration
pub fn test_timeout() -> Duration {
    Duration::from_millis(100)
}

/// A timeout long enough that hitting it means the test is broken
pub fn long_timeout() -> Duration {
    Duration::from_secs(60)
}

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}

/// Send `values` on an explicit `f64` signal as one heap packet. Samples with
/// several elements are taken from `values` in order.
pub fn send_f64(signal: &Signal, values: &[f64]) {
    let count = values.len() / signal.descriptor().elements_per_sample();
    let mut packet = DataPacket::with_heap(signal.descriptor(), count, 0.0, None)
        .expect("failed to allocate test packet");
    packet
        .write_samples(values)
        .expect("failed to write test samples");
    signal.send_packet(packet).expect("failed to send packet");
}
