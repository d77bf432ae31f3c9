//! Composite chunk series into single chunks.
//!
//! Two algorithms: an element-wise [reduction](ReductionFunction) over
//! N aligned inputs, and a two-phase [integer composite map](map) for
//! partially-overlapping series.

pub mod map;
mod reduce;

pub use reduce::{Maximum, Mean, Median, Minimum};

use std::sync::Arc;

use crate::chunk::{ChunkDataAccessor, ChunkDataModifier, DataChunk, ExternalType, PrimitiveBuffer};
use crate::chunking::ChunkPosition;
use crate::flow::ChunkFunction;
use crate::{RasterFlowError, Result};

/// Reduces a slice of values of each primitive type to one value.
///
/// Slices handed in are never empty.
pub trait ReductionOperator: Send + Sync {
    fn reduce_bytes(&self, values: &[i8]) -> i8;
    fn reduce_shorts(&self, values: &[i16]) -> i16;
    fn reduce_ints(&self, values: &[i32]) -> i32;
    fn reduce_longs(&self, values: &[i64]) -> i64;
    fn reduce_floats(&self, values: &[f32]) -> f32;
    fn reduce_doubles(&self, values: &[f64]) -> f64;
}

macro_rules! reduce_all {
    ($accessors:expr, $n:expr, $min_valid:expr, $op:expr, $get:ident, $reduce:ident, $t:ty, $variant:ident) => {{
        let mut out: Vec<$t> = vec![Default::default(); $n];
        let mut mask = vec![false; $n];
        let mut scratch: Vec<$t> = Vec::with_capacity($accessors.len());
        for e in 0..$n {
            scratch.clear();
            for a in $accessors.iter() {
                if !a.is_missing(e) {
                    scratch.push(a.$get(e));
                }
            }
            if scratch.len() < $min_valid {
                mask[e] = true;
            } else {
                out[e] = $op.$reduce(&scratch);
            }
        }
        (PrimitiveBuffer::$variant(out), mask)
    }};
}

/// Reduces N aligned input chunks to one chunk, element by element.
///
/// Elements with fewer than `min_valid` non-missing inputs come out
/// missing; when fewer than `min_valid` whole input chunks are valid
/// the function produces nothing at all.
pub struct ReductionFunction {
    operator: Arc<dyn ReductionOperator>,
    min_valid: usize,
    prototype: DataChunk,
}

impl ReductionFunction {
    pub fn new(
        operator: Arc<dyn ReductionOperator>,
        min_valid: usize,
        prototype: DataChunk,
    ) -> Result<Self> {
        if min_valid < 1 {
            return Err(RasterFlowError::InvalidChunkConfig(
                "a reduction needs at least one valid input".into(),
            ));
        }
        Ok(Self {
            operator,
            min_valid,
            prototype: prototype.prototype(),
        })
    }
}

impl ChunkFunction for ReductionFunction {
    fn apply(
        &self,
        pos: &ChunkPosition,
        inputs: &[Option<DataChunk>],
    ) -> Result<Option<DataChunk>> {
        let mut valid: Vec<&DataChunk> = Vec::with_capacity(inputs.len());
        for chunk in inputs.iter().flatten() {
            if chunk.is_valid()? {
                valid.push(chunk);
            }
        }
        if valid.len() < self.min_valid {
            return Ok(None);
        }
        let accessors = valid
            .iter()
            .map(|c| ChunkDataAccessor::new(c))
            .collect::<Result<Vec<_>>>()?;

        let n = pos.values();
        let op = self.operator.as_ref();
        let (output, mask) = match self.prototype.external_type() {
            ExternalType::Byte => {
                reduce_all!(accessors, n, self.min_valid, op, get_byte, reduce_bytes, i8, Byte)
            }
            ExternalType::Short => {
                reduce_all!(accessors, n, self.min_valid, op, get_short, reduce_shorts, i16, Short)
            }
            ExternalType::Int => {
                reduce_all!(accessors, n, self.min_valid, op, get_int, reduce_ints, i32, Int)
            }
            ExternalType::Long => {
                reduce_all!(accessors, n, self.min_valid, op, get_long, reduce_longs, i64, Long)
            }
            ExternalType::Float => {
                reduce_all!(accessors, n, self.min_valid, op, get_float, reduce_floats, f32, Float)
            }
            ExternalType::Double => {
                reduce_all!(
                    accessors,
                    n,
                    self.min_valid,
                    op,
                    get_double,
                    reduce_doubles,
                    f64,
                    Double
                )
            }
        };

        let mut chunk = self.prototype.blank_copy_with_values(n);
        ChunkDataModifier::new(output)
            .with_missing_mask(mask)
            .apply(&mut chunk)?;
        Ok(Some(chunk))
    }

    fn memory(&self, pos: &ChunkPosition, input_count: usize) -> usize {
        let width = self.prototype.external_type().value_bytes();
        input_count * width * pos.values() + pos.values() + input_count * width
    }
}
