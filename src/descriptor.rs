//! Data descriptors
//!
//! A [`DataDescriptor`] says how the bytes of a data packet (or a rule, when
//! no bytes are stored) turn into samples. Descriptors are immutable values:
//! they are built once with [`DataDescriptorBuilder`], shared behind `Arc`,
//! and compared by value. A signal changes its descriptor only by publishing
//! a new one inside an event packet.
//!
//! # Rules
//!
//! - [`DataRule::Explicit`] - samples are stored verbatim in packet memory
//! - [`DataRule::Linear`] - sample `i` is `offset + start + i * delta`; nothing is stored
//! - [`DataRule::Constant`] - every sample equals the constant; nothing is stored

use crate::error::{DaqError, Result};
use crate::sample::SampleType;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How samples are obtained from a packet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum DataRule {
    /// Samples are stored in packet memory
    #[default]
    Explicit,
    /// Samples are computed as `offset + start + index * delta`
    Linear { delta: f64, start: f64 },
    /// Every sample has the same value
    Constant { value: f64 },
}

impl DataRule {
    /// Whether samples are computed rather than stored
    pub fn is_implicit(&self) -> bool {
        !matches!(self, DataRule::Explicit)
    }

    fn same_kind(&self, other: &DataRule) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

/// Linear transform applied to stored values when they are read.
///
/// Packet memory holds elements of `input_type`; readers see
/// `raw * scale + offset` in the descriptor's sample type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostScaling {
    pub input_type: SampleType,
    pub scale: f64,
    pub offset: f64,
}

impl PostScaling {
    pub fn linear(input_type: SampleType, scale: f64, offset: f64) -> Self {
        Self {
            input_type,
            scale,
            offset,
        }
    }

    #[inline]
    pub fn apply(&self, raw: f64) -> f64 {
        raw * self.scale + self.offset
    }
}

/// Unit of measurement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Unit {
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub quantity: String,
}

impl Unit {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            ..Default::default()
        }
    }

    pub fn with_quantity(mut self, name: impl Into<String>, quantity: impl Into<String>) -> Self {
        self.name = name.into();
        self.quantity = quantity.into();
        self
    }
}

/// Expected value range of a signal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub low: f64,
    pub high: f64,
}

/// Array dimension of a sample
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub size: usize,
}

impl Dimension {
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }
}

/// Ratio used for tick resolution (e.g. 1/1_000_000 s per tick)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ratio {
    pub numerator: i64,
    pub denominator: i64,
}

/// Clock a reference domain is derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TimeSource {
    #[default]
    Unknown,
    Tai,
    Gps,
    Utc,
}

/// Reference-domain metadata for domain (time base) descriptors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ReferenceDomainInfo {
    pub domain_id: Option<String>,
    pub offset: Option<i64>,
    pub time_source: TimeSource,
}

/// Immutable layout, rule and unit metadata for a signal's samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataDescriptor {
    name: String,
    sample_type: SampleType,
    dimensions: Vec<Dimension>,
    unit: Option<Unit>,
    value_range: Option<ValueRange>,
    rule: DataRule,
    post_scaling: Option<PostScaling>,
    reference_domain: Option<ReferenceDomainInfo>,
    tick_resolution: Option<Ratio>,
    origin: Option<String>,
    struct_fields: Vec<DataDescriptor>,
    metadata: BTreeMap<String, String>,
}

impl DataDescriptor {
    /// Start building a descriptor for the given sample type
    pub fn builder(sample_type: SampleType) -> DataDescriptorBuilder {
        DataDescriptorBuilder::new(sample_type)
    }

    /// Shorthand for an explicit scalar descriptor
    pub fn explicit(sample_type: SampleType) -> Self {
        Self::bare(sample_type, DataRule::Explicit)
    }

    /// Shorthand for a linear-rule descriptor
    pub fn linear(sample_type: SampleType, delta: f64, start: f64) -> Self {
        Self::bare(sample_type, DataRule::Linear { delta, start })
    }

    /// Shorthand for a constant-rule descriptor
    pub fn constant(sample_type: SampleType, value: f64) -> Self {
        Self::bare(sample_type, DataRule::Constant { value })
    }

    fn bare(sample_type: SampleType, rule: DataRule) -> Self {
        Self {
            name: String::new(),
            sample_type,
            dimensions: Vec::new(),
            unit: None,
            value_range: None,
            rule,
            post_scaling: None,
            reference_domain: None,
            tick_resolution: None,
            origin: None,
            struct_fields: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type readers observe (after post-scaling)
    pub fn sample_type(&self) -> SampleType {
        self.sample_type
    }

    /// Type actually stored in packet memory
    pub fn raw_sample_type(&self) -> SampleType {
        self.post_scaling
            .as_ref()
            .map(|p| p.input_type)
            .unwrap_or(self.sample_type)
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn unit(&self) -> Option<&Unit> {
        self.unit.as_ref()
    }

    pub fn value_range(&self) -> Option<ValueRange> {
        self.value_range
    }

    pub fn rule(&self) -> &DataRule {
        &self.rule
    }

    pub fn post_scaling(&self) -> Option<&PostScaling> {
        self.post_scaling.as_ref()
    }

    pub fn reference_domain(&self) -> Option<&ReferenceDomainInfo> {
        self.reference_domain.as_ref()
    }

    pub fn tick_resolution(&self) -> Option<Ratio> {
        self.tick_resolution
    }

    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    pub fn struct_fields(&self) -> &[DataDescriptor] {
        &self.struct_fields
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Number of scalar elements per sample (product of dimension sizes)
    pub fn elements_per_sample(&self) -> usize {
        self.dimensions.iter().map(|d| d.size).product()
    }

    /// Bytes of packet memory per sample; zero for implicit rules
    pub fn sample_size(&self) -> usize {
        if self.rule.is_implicit() {
            return 0;
        }
        self.element_size() * self.elements_per_sample()
    }

    fn element_size(&self) -> usize {
        match self.raw_sample_type().size_bytes() {
            Some(size) => size,
            None => self.struct_fields.iter().map(|f| f.sample_size()).sum(),
        }
    }

    /// Parse the origin (epoch) string as an ISO-8601 timestamp
    pub fn origin_epoch(&self) -> Option<DateTime<FixedOffset>> {
        self.origin
            .as_deref()
            .and_then(|o| DateTime::parse_from_rfc3339(o).ok())
    }

    /// Whether a reader decoding against `self` can continue with `other`.
    ///
    /// Only sample layout matters: sample and stored types, dimensions and
    /// rule kind. Names, units, ranges, rule parameters and metadata may change.
    pub fn is_layout_compatible(&self, other: &DataDescriptor) -> bool {
        self.sample_type.is_numeric()
            && other.sample_type.is_numeric()
            && self.sample_type == other.sample_type
            && self.raw_sample_type() == other.raw_sample_type()
            && self.dimensions.iter().map(|d| d.size).eq(other.dimensions.iter().map(|d| d.size))
            && self.rule.same_kind(&other.rule)
    }
}

impl std::fmt::Display for DataDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.name.is_empty() {
            write!(f, "{} ", self.name)?;
        }
        write!(f, "[{}", self.sample_type)?;
        for dim in &self.dimensions {
            write!(f, "x{}", dim.size)?;
        }
        match &self.rule {
            DataRule::Explicit => write!(f, ", explicit")?,
            DataRule::Linear { delta, start } => write!(f, ", linear({}, {})", delta, start)?,
            DataRule::Constant { value } => write!(f, ", constant({})", value)?,
        }
        if let Some(unit) = &self.unit {
            write!(f, ", {}", unit.symbol)?;
        }
        write!(f, "]")
    }
}

/// Builder for [`DataDescriptor`]; `build` validates the combination.
#[derive(Debug, Clone)]
pub struct DataDescriptorBuilder {
    inner: DataDescriptor,
}

impl DataDescriptorBuilder {
    pub fn new(sample_type: SampleType) -> Self {
        Self {
            inner: DataDescriptor::bare(sample_type, DataRule::Explicit),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.inner.name = name.into();
        self
    }

    pub fn dimension(mut self, dimension: Dimension) -> Self {
        self.inner.dimensions.push(dimension);
        self
    }

    pub fn unit(mut self, unit: Unit) -> Self {
        self.inner.unit = Some(unit);
        self
    }

    pub fn value_range(mut self, low: f64, high: f64) -> Self {
        self.inner.value_range = Some(ValueRange { low, high });
        self
    }

    pub fn rule(mut self, rule: DataRule) -> Self {
        self.inner.rule = rule;
        self
    }

    pub fn post_scaling(mut self, scaling: PostScaling) -> Self {
        self.inner.post_scaling = Some(scaling);
        self
    }

    pub fn reference_domain(mut self, info: ReferenceDomainInfo) -> Self {
        self.inner.reference_domain = Some(info);
        self
    }

    pub fn tick_resolution(mut self, numerator: i64, denominator: i64) -> Self {
        self.inner.tick_resolution = Some(Ratio {
            numerator,
            denominator,
        });
        self
    }

    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.inner.origin = Some(origin.into());
        self
    }

    pub fn struct_field(mut self, field: DataDescriptor) -> Self {
        self.inner.struct_fields.push(field);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner.metadata.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Result<DataDescriptor> {
        let d = self.inner;

        if d.dimensions.iter().any(|dim| dim.size == 0) {
            return Err(DaqError::InvalidParameter(
                "dimension size must be non-zero".to_string(),
            ));
        }
        if d.sample_type == SampleType::Struct && d.struct_fields.is_empty() {
            return Err(DaqError::InvalidParameter(
                "struct descriptor needs at least one field".to_string(),
            ));
        }
        if d.sample_type != SampleType::Struct && !d.struct_fields.is_empty() {
            return Err(DaqError::InvalidParameter(
                "struct fields are only valid on struct descriptors".to_string(),
            ));
        }
        if d.rule.is_implicit() && !d.sample_type.is_numeric() {
            return Err(DaqError::InvalidParameter(
                "implicit rules need a numeric sample type".to_string(),
            ));
        }
        if let Some(scaling) = &d.post_scaling {
            if d.rule.is_implicit() {
                return Err(DaqError::InvalidParameter(
                    "post-scaling needs an explicit rule".to_string(),
                ));
            }
            if !scaling.input_type.is_numeric() || !d.sample_type.is_numeric() {
                return Err(DaqError::InvalidParameter(
                    "post-scaling needs numeric input and output types".to_string(),
                ));
            }
        }

        Ok(d)
    }
}
