//! Two-phase integer composite maps for partially-overlapping series.
//!
//! Phase A selects, per element, which of `chunk_count` sources wins
//! and records its index in an i16 map chunk. Phase B applies such a
//! map to the actual data series, fetching values only from the
//! sources the map names. Splitting the phases lets callers skip
//! reading data chunks the map never selects.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::chunk::{
    copy_value, flag_missing, ChunkCaster, ChunkDataAccessor, DataChunk, ShortChunk,
};
use crate::chunking::ChunkPosition;
use crate::flow::ChunkFunction;
use crate::{RasterFlowError, Result};

/// Map entry meaning "no source selected".
pub const NO_SOURCE: i16 = -1;

/// Orders optimization values; the selection keeps the candidate the
/// comparator ranks `Greater`.
pub type OptimizationComparator = dyn Fn(f64, f64) -> Ordering + Send + Sync;

/// Comparator selecting the largest optimization value.
pub fn maximize() -> Arc<OptimizationComparator> {
    Arc::new(|a, b| a.partial_cmp(&b).unwrap_or(Ordering::Equal))
}

/// Comparator selecting the smallest optimization value.
pub fn minimize() -> Arc<OptimizationComparator> {
    Arc::new(|a, b| b.partial_cmp(&a).unwrap_or(Ordering::Equal))
}

/// Phase A: build the i16 source-index map.
///
/// Inputs are the optimization series (`chunk_count` chunks, present
/// only when a comparator is supplied) followed by `priority_count`
/// series of `chunk_count` chunks each. Entirely-invalid chunks are
/// skipped while keeping original indices.
pub struct CompositeMapFunction {
    chunk_count: usize,
    priority_count: usize,
    comparator: Option<Arc<OptimizationComparator>>,
}

impl CompositeMapFunction {
    pub fn new(
        chunk_count: usize,
        priority_count: usize,
        comparator: Option<Arc<OptimizationComparator>>,
    ) -> Result<Self> {
        if comparator.is_none() && priority_count == 0 {
            return Err(RasterFlowError::InvalidChunkConfig(
                "a composite map needs an optimization comparator or at least one priority variable"
                    .into(),
            ));
        }
        check_chunk_count(chunk_count)?;
        Ok(Self {
            chunk_count,
            priority_count,
            comparator,
        })
    }

    fn select(
        &self,
        e: usize,
        priority: &[Vec<(usize, ChunkDataAccessor<'_>)>],
        opt_values: &[Option<Vec<f64>>],
    ) -> i16 {
        for series in priority {
            match &self.comparator {
                Some(cmp) => {
                    let mut best: Option<(usize, f64)> = None;
                    for (k, accessor) in series {
                        if accessor.is_missing(e) {
                            continue;
                        }
                        let Some(values) = opt_values.get(*k).and_then(|o| o.as_ref()) else {
                            continue;
                        };
                        let value = values[e];
                        if value.is_nan() {
                            continue;
                        }
                        let replace = match best {
                            None => true,
                            Some((_, current)) => cmp(value, current) == Ordering::Greater,
                        };
                        if replace {
                            best = Some((*k, value));
                        }
                    }
                    // Candidates with no usable optimization value fall
                    // through to the next priority variable.
                    if let Some((k, _)) = best {
                        return k as i16;
                    }
                }
                None => {
                    // Last-valid-wins: the series is ordered by index.
                    if let Some((k, _)) = series.iter().rev().find(|(_, a)| !a.is_missing(e)) {
                        return *k as i16;
                    }
                }
            }
        }
        if let Some(cmp) = &self.comparator {
            if priority.is_empty() {
                let mut best: Option<(usize, f64)> = None;
                for (k, values) in opt_values.iter().enumerate() {
                    let Some(values) = values else { continue };
                    let value = values[e];
                    if value.is_nan() {
                        continue;
                    }
                    let replace = match best {
                        None => true,
                        Some((_, current)) => cmp(value, current) == Ordering::Greater,
                    };
                    if replace {
                        best = Some((k, value));
                    }
                }
                if let Some((k, _)) = best {
                    return k as i16;
                }
            }
        }
        NO_SOURCE
    }
}

impl ChunkFunction for CompositeMapFunction {
    fn apply(
        &self,
        pos: &ChunkPosition,
        inputs: &[Option<DataChunk>],
    ) -> Result<Option<DataChunk>> {
        let opt_count = if self.comparator.is_some() {
            self.chunk_count
        } else {
            0
        };
        let expected = opt_count + self.priority_count * self.chunk_count;
        if inputs.len() != expected {
            return Err(RasterFlowError::ChunkCountMismatch {
                expected,
                found: inputs.len(),
            });
        }
        let n = pos.values();

        // Optimization values cast to f64 once, NaN where missing.
        let mut opt_values: Vec<Option<Vec<f64>>> = Vec::with_capacity(opt_count);
        for input in &inputs[..opt_count] {
            opt_values.push(match input {
                Some(chunk) if chunk.is_valid()? => Some(ChunkCaster::to_f64(chunk)?),
                _ => None,
            });
        }

        // Valid chunks per priority series, with their original index.
        let mut priority: Vec<Vec<(usize, ChunkDataAccessor<'_>)>> =
            Vec::with_capacity(self.priority_count);
        for v in 0..self.priority_count {
            let series =
                &inputs[opt_count + v * self.chunk_count..opt_count + (v + 1) * self.chunk_count];
            let mut keep = Vec::new();
            for (k, input) in series.iter().enumerate() {
                if let Some(chunk) = input {
                    if chunk.is_valid()? {
                        keep.push((k, ChunkDataAccessor::new(chunk)?));
                    }
                }
            }
            priority.push(keep);
        }

        let mut out = vec![NO_SOURCE; n];
        for (e, slot) in out.iter_mut().enumerate() {
            *slot = self.select(e, &priority, &opt_values);
        }
        Ok(Some(DataChunk::Short(ShortChunk::new(
            out,
            Some(NO_SOURCE),
            None,
            false,
        ))))
    }

    fn memory(&self, pos: &ChunkPosition, input_count: usize) -> usize {
        input_count * 8 * pos.values()
    }
}

/// Phase B: apply a source-index map to the data series.
///
/// Inputs are the map chunk followed by exactly `chunk_count` data
/// chunks; a `None` entry marks a source the map never selected and
/// which was therefore not fetched.
pub struct CompositeMapApplicationFunction {
    chunk_count: usize,
    prototype: DataChunk,
}

impl CompositeMapApplicationFunction {
    pub fn new(chunk_count: usize, prototype: DataChunk) -> Result<Self> {
        check_chunk_count(chunk_count)?;
        Ok(Self {
            chunk_count,
            prototype: prototype.prototype(),
        })
    }
}

impl ChunkFunction for CompositeMapApplicationFunction {
    fn apply(
        &self,
        pos: &ChunkPosition,
        inputs: &[Option<DataChunk>],
    ) -> Result<Option<DataChunk>> {
        let expected = 1 + self.chunk_count;
        if inputs.len() != expected {
            return Err(RasterFlowError::ChunkCountMismatch {
                expected,
                found: inputs.len(),
            });
        }
        let map_chunk = inputs[0]
            .as_ref()
            .ok_or(RasterFlowError::ChunkCountMismatch {
                expected,
                found: expected - 1,
            })?;
        let map_accessor = ChunkDataAccessor::new(map_chunk)?;
        let map = map_accessor.shorts()?;
        let n = pos.values();
        if map.len() != n {
            return Err(RasterFlowError::InvalidChunkConfig(format!(
                "composite map holds {} entries but the position covers {n}",
                map.len()
            )));
        }

        let data: Vec<Option<(&DataChunk, ChunkDataAccessor<'_>)>> = inputs[1..]
            .iter()
            .map(|input| -> Result<_> {
                match input {
                    Some(chunk) => Ok(Some((chunk, ChunkDataAccessor::new(chunk)?))),
                    None => Ok(None),
                }
            })
            .collect::<Result<_>>()?;

        let mut out = self.prototype.blank_copy_with_values(n);
        let mut mask = vec![false; n];
        for (e, &k) in map.iter().enumerate() {
            let mut copied = false;
            if k >= 0 && (k as usize) < self.chunk_count {
                if let Some((chunk, accessor)) = &data[k as usize] {
                    if !accessor.is_missing(e) {
                        copy_value(chunk, e, &mut out, e)?;
                        copied = true;
                    }
                }
            }
            mask[e] = !copied;
        }
        flag_missing(&mut out, &mask);
        Ok(Some(out))
    }

    fn memory(&self, pos: &ChunkPosition, _input_count: usize) -> usize {
        2 * pos.values()
    }
}

fn check_chunk_count(chunk_count: usize) -> Result<()> {
    if chunk_count == 0 || chunk_count > i16::MAX as usize {
        return Err(RasterFlowError::InvalidChunkConfig(format!(
            "chunk count {chunk_count} does not fit a short composite map"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{ByteChunk, PackingScheme};

    fn packed_short(data: Vec<i16>) -> Option<DataChunk> {
        Some(DataChunk::Short(ShortChunk::new(
            data,
            Some(i16::MIN),
            Some(PackingScheme::Float {
                scale: 0.01,
                offset: 0.0,
            }),
            false,
        )))
    }

    fn map_values(chunk: &DataChunk) -> &[i16] {
        match chunk {
            DataChunk::Short(c) => c.data(),
            _ => panic!("composite maps are short chunks"),
        }
    }

    #[test]
    fn optimization_only_selection_picks_the_maximum() {
        let m = i16::MIN;
        let inputs = vec![
            packed_short(vec![m, 1, 2, 3, m]),
            packed_short(vec![4, 5, 1, 2, m]),
            packed_short(vec![3, 4, 5, 1, m]),
            packed_short(vec![2, 3, 4, 5, m]),
            packed_short(vec![1, 2, 3, 4, m]),
        ];
        let function = CompositeMapFunction::new(5, 0, Some(maximize())).unwrap();
        let pos = ChunkPosition::new(vec![0], vec![5]);
        let out = function.apply(&pos, &inputs).unwrap().unwrap();
        assert_eq!(map_values(&out), &[1, 1, 2, 3, -1]);
    }

    #[test]
    fn minimizing_comparator_inverts_the_choice() {
        let inputs = vec![packed_short(vec![5, 1]), packed_short(vec![2, 8])];
        let function = CompositeMapFunction::new(2, 0, Some(minimize())).unwrap();
        let pos = ChunkPosition::new(vec![0], vec![2]);
        let out = function.apply(&pos, &inputs).unwrap().unwrap();
        assert_eq!(map_values(&out), &[1, 0]);
    }

    #[test]
    fn priority_without_optimization_takes_the_last_valid_source() {
        let m = i16::MIN;
        let inputs = vec![
            packed_short(vec![1, 1, m]),
            packed_short(vec![2, m, m]),
            packed_short(vec![m, m, m]),
        ];
        let function = CompositeMapFunction::new(3, 1, None).unwrap();
        let pos = ChunkPosition::new(vec![0], vec![3]);
        let out = function.apply(&pos, &inputs).unwrap().unwrap();
        assert_eq!(map_values(&out), &[1, 0, -1]);
    }

    #[test]
    fn priority_candidates_rank_by_optimization_value() {
        let m = i16::MIN;
        // Optimization favours source 0, but priority only has data in
        // sources 1 and 2 at element 0.
        let inputs = vec![
            // optimization series
            packed_short(vec![9, 9]),
            packed_short(vec![5, m]),
            packed_short(vec![7, m]),
            // priority series
            packed_short(vec![m, 1]),
            packed_short(vec![1, m]),
            packed_short(vec![1, m]),
        ];
        let function = CompositeMapFunction::new(3, 1, Some(maximize())).unwrap();
        let pos = ChunkPosition::new(vec![0], vec![2]);
        let out = function.apply(&pos, &inputs).unwrap().unwrap();
        // Element 0: candidates {1, 2}, optimization 5 vs 7.
        // Element 1: candidate {0}, optimization 9.
        assert_eq!(map_values(&out), &[2, 0]);
    }

    #[test]
    fn wrong_input_count_is_rejected() {
        let function = CompositeMapFunction::new(3, 0, Some(maximize())).unwrap();
        let pos = ChunkPosition::new(vec![0], vec![1]);
        let err = function.apply(&pos, &[packed_short(vec![1])]);
        assert!(matches!(
            err,
            Err(RasterFlowError::ChunkCountMismatch {
                expected: 3,
                found: 1
            })
        ));
        assert!(CompositeMapFunction::new(3, 0, None).is_err());
        assert!(CompositeMapFunction::new(40_000, 0, Some(maximize())).is_err());
    }

    fn byte_chunk(data: Vec<i8>) -> Option<DataChunk> {
        Some(DataChunk::Byte(ByteChunk::new(data, Some(0), None, false)))
    }

    #[test]
    fn map_application_follows_indices_and_holes() {
        let map = Some(DataChunk::Short(ShortChunk::new(
            vec![0, 1, -1, 3, 4],
            Some(NO_SOURCE),
            None,
            false,
        )));
        let inputs = vec![
            map,
            byte_chunk(vec![10, 10, 10, 10, 10]),
            byte_chunk(vec![20, 21, 20, 20, 20]),
            None,
            byte_chunk(vec![40, 40, 40, 43, 40]),
            byte_chunk(vec![50, 50, 50, 50, 0]),
        ];
        let prototype = DataChunk::Byte(ByteChunk::new(Vec::new(), Some(0), None, false));
        let function = CompositeMapApplicationFunction::new(5, prototype).unwrap();
        let pos = ChunkPosition::new(vec![0], vec![5]);
        let out = function.apply(&pos, &inputs).unwrap().unwrap();
        match &out {
            // Element 2 hits the hole; element 4's source is itself
            // missing there.
            DataChunk::Byte(c) => assert_eq!(c.data(), &[10, 21, 0, 43, 0]),
            _ => unreachable!(),
        }
    }

    #[test]
    fn map_application_checks_the_input_count() {
        let prototype = DataChunk::Byte(ByteChunk::new(Vec::new(), Some(0), None, false));
        let function = CompositeMapApplicationFunction::new(2, prototype).unwrap();
        let pos = ChunkPosition::new(vec![0], vec![1]);
        let err = function.apply(&pos, &[byte_chunk(vec![1])]);
        assert!(matches!(
            err,
            Err(RasterFlowError::ChunkCountMismatch { expected: 3, .. })
        ));
    }
}
