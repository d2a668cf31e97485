//! Test data builders for creating test objects

use daqflow::config::PortConfig;
use daqflow::descriptor::Dimension;
use daqflow::{DataDescriptor, DataPacket, DataRule, InputPort, SampleType, Signal};
use std::sync::Arc;

/// Builder for creating test Signals
pub struct SignalBuilder {
    name: String,
    sample_type: SampleType,
    rule: DataRule,
    elements: Option<usize>,
    domain: Option<Signal>,
}

impl SignalBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            sample_type: SampleType::Float64,
            rule: DataRule::Explicit,
            elements: None,
            domain: None,
        }
    }

    pub fn sample_type(mut self, sample_type: SampleType) -> Self {
        self.sample_type = sample_type;
        self
    }

    pub fn linear(mut self, delta: f64, start: f64) -> Self {
        self.rule = DataRule::Linear { delta, start };
        self
    }

    /// Give every sample `elements` values along one dimension
    pub fn elements(mut self, elements: usize) -> Self {
        self.elements = Some(elements);
        self
    }

    pub fn domain(mut self, domain: &Signal) -> Self {
        self.domain = Some(domain.clone());
        self
    }

    pub fn build(self) -> Signal {
        let mut builder = DataDescriptor::builder(self.sample_type)
            .name(self.name.clone())
            .rule(self.rule);
        if let Some(elements) = self.elements {
            builder = builder.dimension(Dimension::new("axis", elements));
        }
        let descriptor = builder
            .build()
            .expect("invalid test descriptor");
        let signal = Signal::new(self.name, descriptor);
        if let Some(domain) = &self.domain {
            signal
                .set_domain_signal(Some(domain))
                .expect("failed to set domain signal");
        }
        signal
    }
}

/// A linear time signal: `Int64`, delta 1, start 0
pub fn time_signal() -> Signal {
    SignalBuilder::new("time")
        .sample_type(SampleType::Int64)
        .linear(1.0, 0.0)
        .build()
}

/// A port with gap checking enabled
pub fn gap_checking_port(name: &str) -> InputPort {
    InputPort::with_config(
        name,
        &PortConfig {
            gap_checking: true,
            ..PortConfig::default()
        },
    )
}

/// Builder for value packets with an implicit domain packet attached
pub struct PacketBuilder {
    values: Vec<f64>,
    domain_offset: Option<(Arc<DataDescriptor>, f64)>,
}

impl PacketBuilder {
    pub fn new(values: &[f64]) -> Self {
        Self {
            values: values.to_vec(),
            domain_offset: None,
        }
    }

    /// Attach a domain packet for `domain`'s descriptor starting at `offset`
    pub fn domain(mut self, domain: &Signal, offset: f64) -> Self {
        self.domain_offset = Some((domain.descriptor(), offset));
        self
    }

    pub fn build(self, signal: &Signal) -> DataPacket {
        let domain = self.domain_offset.map(|(descriptor, offset)| {
            Arc::new(
                DataPacket::implicit(descriptor, self.values.len(), offset, None)
                    .expect("failed to build domain packet"),
            )
        });
        let mut packet = DataPacket::with_heap(signal.descriptor(), self.values.len(), 0.0, domain)
            .expect("failed to allocate test packet");
        packet
            .write_samples(&self.values)
            .expect("failed to write test samples");
        packet
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_builder() {
        let time = time_signal();
        let signal = SignalBuilder::new("voltage").domain(&time).build();

        assert_eq!(signal.name(), "voltage");
        assert_eq!(signal.descriptor().sample_type(), SampleType::Float64);
        assert_eq!(signal.domain_signal().map(|s| s.id()), Some(time.id()));
    }
}
