//! Bulk conversion between chunks and flat floating-point arrays.

use super::{ChunkDataAccessor, ChunkDataModifier, DataChunk, ExternalType, PrimitiveBuffer};
use crate::Result;

/// Converts whole chunks to and from flat f32/f64 buffers, with NaN
/// standing in for missing elements in both directions.
pub struct ChunkCaster;

macro_rules! int_input {
    ($values:expr, $variant:ident, $t:ty) => {{
        let mask: Vec<bool> = $values.iter().map(|v| v.is_nan()).collect();
        let data: Vec<$t> = $values
            .iter()
            .map(|&v| if v.is_nan() { 0 } else { v.round() as $t })
            .collect();
        (PrimitiveBuffer::$variant(data), Some(mask))
    }};
}

impl ChunkCaster {
    /// Read the whole chunk as f64 values.
    pub fn to_f64(chunk: &DataChunk) -> Result<Vec<f64>> {
        let accessor = ChunkDataAccessor::new(chunk)?;
        Ok((0..accessor.len())
            .map(|i| {
                if accessor.is_missing(i) {
                    f64::NAN
                } else {
                    accessor.get_double(i)
                }
            })
            .collect())
    }

    /// Read the whole chunk as f32 values.
    pub fn to_f32(chunk: &DataChunk) -> Result<Vec<f32>> {
        let accessor = ChunkDataAccessor::new(chunk)?;
        Ok((0..accessor.len())
            .map(|i| {
                if accessor.is_missing(i) {
                    f32::NAN
                } else {
                    accessor.get_float(i)
                }
            })
            .collect())
    }

    /// Write a flat f64 buffer into the chunk.
    pub fn from_f64(chunk: &mut DataChunk, values: &[f64]) -> Result<()> {
        let (input, mask) = match chunk.external_type() {
            ExternalType::Byte => int_input!(values, Byte, i8),
            ExternalType::Short => int_input!(values, Short, i16),
            ExternalType::Int => int_input!(values, Int, i32),
            ExternalType::Long => int_input!(values, Long, i64),
            ExternalType::Float => (
                PrimitiveBuffer::Float(values.iter().map(|&v| v as f32).collect()),
                None,
            ),
            ExternalType::Double => (PrimitiveBuffer::Double(values.to_vec()), None),
        };
        apply(chunk, input, mask)
    }

    /// Write a flat f32 buffer into the chunk.
    pub fn from_f32(chunk: &mut DataChunk, values: &[f32]) -> Result<()> {
        let (input, mask) = match chunk.external_type() {
            ExternalType::Byte => int_input!(values, Byte, i8),
            ExternalType::Short => int_input!(values, Short, i16),
            ExternalType::Int => int_input!(values, Int, i32),
            ExternalType::Long => int_input!(values, Long, i64),
            ExternalType::Float => (PrimitiveBuffer::Float(values.to_vec()), None),
            ExternalType::Double => (
                PrimitiveBuffer::Double(values.iter().map(|&v| v as f64).collect()),
                None,
            ),
        };
        apply(chunk, input, mask)
    }
}

fn apply(chunk: &mut DataChunk, input: PrimitiveBuffer, mask: Option<Vec<bool>>) -> Result<()> {
    let modifier = match mask {
        Some(m) => ChunkDataModifier::new(input).with_missing_mask(m),
        None => ChunkDataModifier::new(input),
    };
    modifier.apply(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{ByteChunk, PackingScheme, ShortChunk};

    #[test]
    fn packed_chunks_cast_out_with_nan_missing() {
        let chunk = DataChunk::Byte(ByteChunk::new(
            vec![0, 1, 3],
            Some(3),
            Some(PackingScheme::Float {
                scale: 0.1,
                offset: 1.0,
            }),
            false,
        ));
        let out = ChunkCaster::to_f64(&chunk).unwrap();
        assert!((out[0] + 0.1).abs() < 1e-6);
        assert!((out[1]).abs() < 1e-6);
        assert!(out[2].is_nan());
    }

    #[test]
    fn nan_writes_back_as_the_sentinel() {
        let mut chunk = DataChunk::Short(ShortChunk::new(vec![0; 3], Some(-1), None, false));
        ChunkCaster::from_f64(&mut chunk, &[1.4, f64::NAN, 2.6]).unwrap();
        match &chunk {
            DataChunk::Short(c) => assert_eq!(c.data(), &[1, -1, 3]),
            _ => unreachable!(),
        }
    }
}
