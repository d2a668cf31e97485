//! Sample decoding
//!
//! Turns packet memory (or a rule) into typed samples according to a
//! [`DataDescriptor`]. Output buffers are flat: a sample with `N` elements
//! (see [`DataDescriptor::elements_per_sample`]) occupies `N` consecutive
//! slots.

use crate::descriptor::{DataDescriptor, DataRule};
use crate::error::{DaqError, Result};
use crate::sample::{Scalar, SampleValue};

/// Decode samples `first..first + n` into `out`, where `n` is the number of
/// whole samples `out` can hold. Returns `n`.
///
/// `raw` is the packet's memory (empty for implicit rules) and `offset` the
/// packet offset, which implicit linear rules add to every value.
pub fn decode_into<T: SampleValue>(
    descriptor: &DataDescriptor,
    raw: &[u8],
    offset: f64,
    first: usize,
    out: &mut [T],
) -> Result<usize> {
    if !descriptor.sample_type().is_numeric() || !descriptor.raw_sample_type().is_numeric() {
        return Err(DaqError::InvalidType(format!(
            "cannot decode {} samples as flat numeric values",
            descriptor.sample_type()
        )));
    }

    let per_sample = descriptor.elements_per_sample();
    let count = out.len() / per_sample;

    match descriptor.rule() {
        DataRule::Linear { delta, start } => {
            for i in 0..count {
                let value = T::from_scalar(Scalar::Float(
                    offset + start + (first + i) as f64 * delta,
                ));
                out[i * per_sample..(i + 1) * per_sample].fill(value);
            }
        }
        DataRule::Constant { value } => {
            out[..count * per_sample].fill(T::from_scalar(Scalar::Float(*value)));
        }
        DataRule::Explicit => {
            let sample_size = descriptor.sample_size();
            let start = first * sample_size;
            let end = start + count * sample_size;
            let bytes = raw.get(start..end).ok_or_else(|| {
                DaqError::InvalidData(format!(
                    "packet memory holds {} bytes, need {} for samples {}..{}",
                    raw.len(),
                    end,
                    first,
                    first + count
                ))
            })?;

            let raw_type = descriptor.raw_sample_type();
            let element_size = sample_size / per_sample;
            let scaling = descriptor.post_scaling();

            for (slot, chunk) in out.iter_mut().zip(bytes.chunks_exact(element_size)) {
                let scalar = raw_type
                    .read_scalar(chunk)
                    .ok_or_else(|| DaqError::InvalidData("truncated element".to_string()))?;
                *slot = match scaling {
                    Some(s) => T::from_scalar(Scalar::Float(s.apply(scalar.as_f64()))),
                    None => T::from_scalar(scalar),
                };
            }
        }
    }

    Ok(count)
}

/// Decode `sample_count` samples into a freshly allocated vector.
pub fn decode<T: SampleValue>(
    descriptor: &DataDescriptor,
    raw: &[u8],
    sample_count: usize,
    offset: f64,
) -> Result<Vec<T>> {
    let mut out = vec![T::default(); sample_count * descriptor.elements_per_sample()];
    decode_into(descriptor, raw, offset, 0, &mut out)?;
    Ok(out)
}
