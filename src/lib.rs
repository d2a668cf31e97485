//! # daqflow: signal data flow for data acquisition
//!
//! Moves timestamped sample data from producers ([`Signal`]) to consumers
//! ([`InputPort`]) through strictly ordered queues ([`Connection`]), and
//! decodes it into typed buffers with a family of readers.
//!
//! ## Architecture
//!
//! - **Descriptors**: [`DataDescriptor`] says how to interpret raw sample
//!   memory (type, shape, rule, post-scaling)
//! - **Memory**: [`alloc::Allocator`] implementations back data packets; an
//!   [`alloc::ExternalAllocator`] wraps caller memory with a one-shot deleter
//! - **Packets**: [`Packet`] is a data packet (samples) or an event packet
//!   (descriptor changes, gaps), shared behind `Arc`
//! - **Flow**: a [`Signal`] publishes into one [`Connection`] per connected
//!   port; descriptor changes travel in-band so they are never reordered
//!   with data
//! - **Readers**: [`StreamReader`], [`BlockReader`], [`TailReader`] and
//!   [`PacketReader`] drain a port and report events as read status
//!
//! ## Configuration
//!
//! Reader, port, connection and logging defaults live in [`FlowConfig`], stored
//! as TOML (or JSON) under the platform config directory:
//!
//! - **Linux**: `~/.config/daqflow/daqflow.toml`
//! - **macOS**: `~/Library/Application Support/daqflow/daqflow.toml`
//! - **Windows**: `%APPDATA%\daqflow\daqflow.toml`
//!
//! ## Example
//!
//! ```
//! use daqflow::{DataDescriptor, DataPacket, ReadStatus, SampleType, Signal, StreamReader};
//! use std::time::Duration;
//!
//! let signal = Signal::new("voltage", DataDescriptor::explicit(SampleType::Float64));
//! let mut reader = StreamReader::<f64>::new(&signal)?;
//!
//! let mut packet = DataPacket::with_heap(signal.descriptor(), 3, 0.0, None)?;
//! packet.write_samples(&[0.5, 1.5, 2.5])?;
//! signal.send_packet(packet)?;
//!
//! let mut values = [0.0; 8];
//! let result = reader.read(&mut values, Duration::from_millis(100));
//! assert_eq!(result.status, ReadStatus::Ok);
//! assert_eq!(&values[..result.count], &[0.5, 1.5, 2.5]);
//! # Ok::<(), daqflow::DaqError>(())
//! ```

pub mod alloc;
pub mod config;
pub mod connection;
pub mod decode;
pub mod descriptor;
pub mod error;
pub mod input_port;
pub mod logging;
pub mod packet;
pub mod reader;
pub mod sample;
pub mod scheduler;
pub mod signal;

// Re-export commonly used types
pub use config::FlowConfig;
pub use connection::{Connection, WaitStatus};
pub use descriptor::{DataDescriptor, DataRule};
pub use error::{DaqError, Result, ResultExt};
pub use input_port::{InputPort, InputPortListener, NotificationMode};
pub use packet::{DataPacket, EventPacket, Packet};
pub use reader::{
    BlockReader, DomainGap, PacketReadResult, PacketReader, ReadResult, ReadStatus,
    ReadTimeoutType, StreamReader, TailReader,
};
pub use sample::{SampleType, SampleValue};
pub use scheduler::{Scheduler, WorkerScheduler};
pub use signal::Signal;
