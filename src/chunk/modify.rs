//! Uniform element writes over all chunk variants.

use std::borrow::Cow;

use super::{DataChunk, PackSource, PrimitiveBuffer};
use crate::{RasterFlowError, Result};

/// Encodes one typed input buffer into a chunk's raw representation.
///
/// The input buffer must be in the chunk's external type; packing,
/// scaling and unsigned narrowing are applied on the way in. NaN float
/// inputs and masked elements store the missing sentinel (NaN when a
/// float chunk has none).
pub struct ChunkDataModifier {
    input: PrimitiveBuffer,
    mask: Option<Vec<bool>>,
}

fn check_len(found: usize, expected: usize) -> Result<()> {
    if found == expected {
        Ok(())
    } else {
        Err(RasterFlowError::InvalidChunkConfig(format!(
            "input holds {found} values but the chunk holds {expected}"
        )))
    }
}

macro_rules! store_integer {
    ($self:expr, $c:expr, $variant:ident, $wide_variant:ident, $raw:ty, $pack:ident) => {{
        let n = $c.values();
        $self.check_mask(n)?;
        let missing = $c.missing();
        let unsigned = $c.is_unsigned();
        match ($c.packing().copied(), &$self.input) {
            (Some(p), PrimitiveBuffer::Float(vals)) => {
                check_len(vals.len(), n)?;
                let vals = $self.masked_f32(vals);
                p.$pack(PackSource::Float(&vals), missing, unsigned, $c.data_mut())
            }
            (Some(p), PrimitiveBuffer::Double(vals)) => {
                check_len(vals.len(), n)?;
                let vals = $self.masked_f64(vals);
                p.$pack(PackSource::Double(&vals), missing, unsigned, $c.data_mut())
            }
            (Some(_), _) => Err(RasterFlowError::TypeMismatch),
            (None, PrimitiveBuffer::$wide_variant(vals)) if unsigned => {
                check_len(vals.len(), n)?;
                let data = $c.data_mut();
                for i in 0..n {
                    data[i] = if $self.masked(i) {
                        match missing {
                            Some(m) => m,
                            None => vals[i] as $raw,
                        }
                    } else {
                        vals[i] as $raw
                    };
                }
                Ok(())
            }
            (None, PrimitiveBuffer::$variant(vals)) if !unsigned => {
                check_len(vals.len(), n)?;
                let data = $c.data_mut();
                for i in 0..n {
                    data[i] = if $self.masked(i) {
                        match missing {
                            Some(m) => m,
                            None => vals[i] as $raw,
                        }
                    } else {
                        vals[i] as $raw
                    };
                }
                Ok(())
            }
            (None, _) => Err(RasterFlowError::TypeMismatch),
        }
    }};
}

macro_rules! store_float {
    ($self:expr, $c:expr, $variant:ident, $prim:ty, $params:ident) => {{
        let n = $c.values();
        $self.check_mask(n)?;
        let missing = $c.missing();
        match ($c.scaling().copied(), &$self.input) {
            (Some(s), PrimitiveBuffer::$variant(vals)) => {
                let (scale, offset) = s.$params().ok_or_else(|| {
                    RasterFlowError::InvalidChunkConfig(
                        "scaling width does not match the chunk's float width".into(),
                    )
                })?;
                check_len(vals.len(), n)?;
                let data = $c.data_mut();
                for i in 0..n {
                    let v = vals[i];
                    data[i] = if v.is_nan() || $self.masked(i) {
                        missing.unwrap_or(<$prim>::NAN)
                    } else {
                        v / scale + offset
                    };
                }
                Ok(())
            }
            (None, PrimitiveBuffer::$variant(vals)) => {
                check_len(vals.len(), n)?;
                let data = $c.data_mut();
                for i in 0..n {
                    let v = vals[i];
                    data[i] = if v.is_nan() || $self.masked(i) {
                        missing.unwrap_or(<$prim>::NAN)
                    } else {
                        v
                    };
                }
                Ok(())
            }
            _ => Err(RasterFlowError::TypeMismatch),
        }
    }};
}

impl ChunkDataModifier {
    pub fn new(input: PrimitiveBuffer) -> Self {
        Self { input, mask: None }
    }

    /// Mark elements missing regardless of their input value.
    pub fn with_missing_mask(mut self, mask: Vec<bool>) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn apply(&self, chunk: &mut DataChunk) -> Result<()> {
        match chunk {
            DataChunk::Byte(c) => store_integer!(self, c, Byte, Short, i8, pack_bytes),
            DataChunk::Short(c) => store_integer!(self, c, Short, Int, i16, pack_shorts),
            DataChunk::Int(c) => store_integer!(self, c, Int, Long, i32, pack_ints),
            DataChunk::Long(c) => store_integer!(self, c, Long, Long, i64, pack_longs),
            DataChunk::Float(c) => store_float!(self, c, Float, f32, float_params),
            DataChunk::Double(c) => store_float!(self, c, Double, f64, double_params),
        }
    }

    fn masked(&self, i: usize) -> bool {
        self.mask.as_ref().map_or(false, |m| m[i])
    }

    fn check_mask(&self, n: usize) -> Result<()> {
        match &self.mask {
            Some(m) => check_len(m.len(), n),
            None => Ok(()),
        }
    }

    fn masked_f32<'v>(&self, vals: &'v [f32]) -> Cow<'v, [f32]> {
        match &self.mask {
            Some(m) => Cow::Owned(
                vals.iter()
                    .zip(m)
                    .map(|(&v, &masked)| if masked { f32::NAN } else { v })
                    .collect(),
            ),
            None => Cow::Borrowed(vals),
        }
    }

    fn masked_f64<'v>(&self, vals: &'v [f64]) -> Cow<'v, [f64]> {
        match &self.mask {
            Some(m) => Cow::Owned(
                vals.iter()
                    .zip(m)
                    .map(|(&v, &masked)| if masked { f64::NAN } else { v })
                    .collect(),
            ),
            None => Cow::Borrowed(vals),
        }
    }
}
