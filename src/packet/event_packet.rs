//! Event packets: in-band control messages.

use super::next_packet_id;
use crate::descriptor::DataDescriptor;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Well-known event ids.
pub mod event_ids {
    /// The value and/or domain descriptor of the signal changed
    pub const DATA_DESCRIPTOR_CHANGED: &str = "DATA_DESCRIPTOR_CHANGED";
    /// A linear domain skipped ahead of the expected offset
    pub const IMPLICIT_DOMAIN_GAP_DETECTED: &str = "IMPLICIT_DOMAIN_GAP_DETECTED";
}

/// Well-known event parameter names.
pub mod params {
    pub const DATA_DESCRIPTOR: &str = "DataDescriptor";
    pub const DOMAIN_DATA_DESCRIPTOR: &str = "DomainDataDescriptor";
    pub const GAP_DIFF: &str = "GapDiff";
}

/// A single event parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum EventValue {
    Descriptor(Arc<DataDescriptor>),
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl EventValue {
    pub fn as_descriptor(&self) -> Option<&Arc<DataDescriptor>> {
        match self {
            EventValue::Descriptor(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            EventValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            EventValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            EventValue::Float(v) => Some(*v),
            EventValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            EventValue::String(v) => Some(v),
            _ => None,
        }
    }
}

/// Immutable control packet with a string id and named parameters.
#[derive(Debug, Clone)]
pub struct EventPacket {
    id: u64,
    event_id: String,
    parameters: BTreeMap<String, EventValue>,
}

impl EventPacket {
    pub fn new(event_id: impl Into<String>) -> Self {
        Self::with_parameters(event_id, BTreeMap::new())
    }

    pub fn with_parameters(
        event_id: impl Into<String>,
        parameters: BTreeMap<String, EventValue>,
    ) -> Self {
        Self {
            id: next_packet_id(),
            event_id: event_id.into(),
            parameters,
        }
    }

    /// A descriptor-changed event. `None` means "unchanged" for that descriptor.
    pub fn data_descriptor_changed(
        value: Option<Arc<DataDescriptor>>,
        domain: Option<Arc<DataDescriptor>>,
    ) -> Self {
        let mut parameters = BTreeMap::new();
        if let Some(value) = value {
            parameters.insert(
                params::DATA_DESCRIPTOR.to_string(),
                EventValue::Descriptor(value),
            );
        }
        if let Some(domain) = domain {
            parameters.insert(
                params::DOMAIN_DATA_DESCRIPTOR.to_string(),
                EventValue::Descriptor(domain),
            );
        }
        Self::with_parameters(event_ids::DATA_DESCRIPTOR_CHANGED, parameters)
    }

    /// A gap event; `diff` is `actual - expected` domain offset.
    pub fn implicit_domain_gap(diff: f64) -> Self {
        let mut parameters = BTreeMap::new();
        parameters.insert(params::GAP_DIFF.to_string(), EventValue::Float(diff));
        Self::with_parameters(event_ids::IMPLICIT_DOMAIN_GAP_DETECTED, parameters)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn parameters(&self) -> &BTreeMap<String, EventValue> {
        &self.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<&EventValue> {
        self.parameters.get(name)
    }

    pub fn is_descriptor_changed(&self) -> bool {
        self.event_id == event_ids::DATA_DESCRIPTOR_CHANGED
    }

    /// New value descriptor carried by a descriptor-changed event
    pub fn value_descriptor(&self) -> Option<&Arc<DataDescriptor>> {
        self.parameter(params::DATA_DESCRIPTOR)
            .and_then(EventValue::as_descriptor)
    }

    /// New domain descriptor carried by a descriptor-changed event
    pub fn domain_descriptor(&self) -> Option<&Arc<DataDescriptor>> {
        self.parameter(params::DOMAIN_DATA_DESCRIPTOR)
            .and_then(EventValue::as_descriptor)
    }
}

impl PartialEq for EventPacket {
    /// Events compare by content; the packet id is ignored.
    fn eq(&self, other: &Self) -> bool {
        self.event_id == other.event_id && self.parameters == other.parameters
    }
}
