//! Scalar sample types
//!
//! This module contains the element-level building blocks used by
//! descriptors and readers:
//!
//! - [`SampleType`] - The scalar kind stored in packet memory (i8..u64, f32, f64, bool, struct)
//! - [`Scalar`] - One decoded element, kept in its widest lossless form
//! - [`SampleValue`] - Rust types a reader can decode into
//!
//! Packet memory never leaves the process, so elements are stored in
//! native byte order.

use serde::{Deserialize, Serialize};

/// The scalar kind of one sample element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SampleType {
    /// 8-bit signed integer
    Int8,
    /// 16-bit signed integer
    Int16,
    /// 32-bit signed integer
    Int32,
    /// 64-bit signed integer
    Int64,
    /// 8-bit unsigned integer
    UInt8,
    /// 16-bit unsigned integer
    UInt16,
    /// 32-bit unsigned integer
    UInt32,
    /// 64-bit unsigned integer
    UInt64,
    /// 32-bit floating point
    Float32,
    /// 64-bit floating point
    #[default]
    Float64,
    /// Boolean value stored as one byte
    Bool,
    /// Composite sample; layout is given by the descriptor's struct fields
    Struct,
}

impl SampleType {
    /// Size in bytes of one element, or `None` for struct samples
    pub fn size_bytes(&self) -> Option<usize> {
        match self {
            SampleType::Int8 | SampleType::UInt8 | SampleType::Bool => Some(1),
            SampleType::Int16 | SampleType::UInt16 => Some(2),
            SampleType::Int32 | SampleType::UInt32 | SampleType::Float32 => Some(4),
            SampleType::Int64 | SampleType::UInt64 | SampleType::Float64 => Some(8),
            SampleType::Struct => None,
        }
    }

    /// Whether the type is a flat numeric scalar
    pub fn is_numeric(&self) -> bool {
        !matches!(self, SampleType::Struct)
    }

    /// Read one element from the front of `bytes`
    pub fn read_scalar(&self, bytes: &[u8]) -> Option<Scalar> {
        let size = self.size_bytes()?;
        let b = bytes.get(..size)?;

        Some(match self {
            SampleType::Int8 => Scalar::Int(b[0] as i8 as i64),
            SampleType::UInt8 => Scalar::UInt(b[0] as u64),
            SampleType::Bool => Scalar::Bool(b[0] != 0),
            SampleType::Int16 => Scalar::Int(i16::from_ne_bytes([b[0], b[1]]) as i64),
            SampleType::UInt16 => Scalar::UInt(u16::from_ne_bytes([b[0], b[1]]) as u64),
            SampleType::Int32 => Scalar::Int(i32::from_ne_bytes([b[0], b[1], b[2], b[3]]) as i64),
            SampleType::UInt32 => {
                Scalar::UInt(u32::from_ne_bytes([b[0], b[1], b[2], b[3]]) as u64)
            }
            SampleType::Float32 => {
                Scalar::Float(f32::from_ne_bytes([b[0], b[1], b[2], b[3]]) as f64)
            }
            SampleType::Int64 => Scalar::Int(i64::from_ne_bytes([
                b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
            ])),
            SampleType::UInt64 => Scalar::UInt(u64::from_ne_bytes([
                b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
            ])),
            SampleType::Float64 => Scalar::Float(f64::from_ne_bytes([
                b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
            ])),
            SampleType::Struct => return None,
        })
    }
}

impl std::fmt::Display for SampleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleType::Int8 => write!(f, "i8"),
            SampleType::Int16 => write!(f, "i16"),
            SampleType::Int32 => write!(f, "i32"),
            SampleType::Int64 => write!(f, "i64"),
            SampleType::UInt8 => write!(f, "u8"),
            SampleType::UInt16 => write!(f, "u16"),
            SampleType::UInt32 => write!(f, "u32"),
            SampleType::UInt64 => write!(f, "u64"),
            SampleType::Float32 => write!(f, "f32"),
            SampleType::Float64 => write!(f, "f64"),
            SampleType::Bool => write!(f, "bool"),
            SampleType::Struct => write!(f, "struct"),
        }
    }
}

/// One decoded element in its widest lossless representation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
}

impl Scalar {
    pub fn as_f64(self) -> f64 {
        match self {
            Scalar::Int(v) => v as f64,
            Scalar::UInt(v) => v as f64,
            Scalar::Float(v) => v,
            Scalar::Bool(v) => {
                if v {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            Scalar::Int(v) => v,
            Scalar::UInt(v) => v as i64,
            Scalar::Float(v) => v as i64,
            Scalar::Bool(v) => v as i64,
        }
    }

    pub fn as_u64(self) -> u64 {
        match self {
            Scalar::Int(v) => v as u64,
            Scalar::UInt(v) => v,
            Scalar::Float(v) => v as u64,
            Scalar::Bool(v) => v as u64,
        }
    }
}

/// A Rust type that readers can decode samples into and producers can write from.
pub trait SampleValue:
    Copy + Default + PartialEq + Send + Sync + std::fmt::Debug + 'static
{
    /// The packet element type with the same in-memory layout
    const SAMPLE_TYPE: SampleType;

    /// Convert a decoded element into this type (numeric `as` semantics)
    fn from_scalar(value: Scalar) -> Self;

    /// Widen this value into a [`Scalar`]
    fn to_scalar(self) -> Scalar;

    /// Write the native-endian bytes of this value into `out`
    fn write_ne(self, out: &mut [u8]);
}

macro_rules! impl_sample_value {
    ($ty:ty, $kind:ident, $variant:ident, $conv:ident) => {
        impl SampleValue for $ty {
            const SAMPLE_TYPE: SampleType = SampleType::$kind;

            #[inline]
            fn from_scalar(value: Scalar) -> Self {
                value.$conv() as $ty
            }

            #[inline]
            fn to_scalar(self) -> Scalar {
                Scalar::$variant(self as _)
            }

            #[inline]
            fn write_ne(self, out: &mut [u8]) {
                out[..std::mem::size_of::<$ty>()].copy_from_slice(&self.to_ne_bytes());
            }
        }
    };
}

impl_sample_value!(i8, Int8, Int, as_i64);
impl_sample_value!(i16, Int16, Int, as_i64);
impl_sample_value!(i32, Int32, Int, as_i64);
impl_sample_value!(i64, Int64, Int, as_i64);
impl_sample_value!(u8, UInt8, UInt, as_u64);
impl_sample_value!(u16, UInt16, UInt, as_u64);
impl_sample_value!(u32, UInt32, UInt, as_u64);
impl_sample_value!(u64, UInt64, UInt, as_u64);
impl_sample_value!(f32, Float32, Float, as_f64);
impl_sample_value!(f64, Float64, Float, as_f64);

impl SampleValue for bool {
    const SAMPLE_TYPE: SampleType = SampleType::Bool;

    #[inline]
    fn from_scalar(value: Scalar) -> Self {
        match value {
            Scalar::Bool(v) => v,
            other => other.as_f64() != 0.0,
        }
    }

    #[inline]
    fn to_scalar(self) -> Scalar {
        Scalar::Bool(self)
    }

    #[inline]
    fn write_ne(self, out: &mut [u8]) {
        out[0] = self as u8;
    }
}
