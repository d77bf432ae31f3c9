//! Copy values between differently-tiled chunks through a coordinate
//! map.
//!
//! The map itself is an external collaborator: anything that can
//! answer "which source pixel feeds this destination pixel". An
//! affine-backed implementation is provided for pairs of grids whose
//! pixel frames are related by an [`AffineTransform`]; reprojection
//! maps plug in through the same trait.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use geo::{AffineTransform, Coord};

use crate::chunk::{copy_value, flag_missing, DataChunk};
use crate::chunking::{ChunkPosition, ChunkingScheme};
use crate::flow::{ChunkConsumer, ChunkProducer};
use crate::{RasterFlowError, Result};

/// Maps destination coordinates to source coordinates.
pub trait ResamplingMap: Send + Sync {
    /// The source `[row, col]` for a destination `[row, col]` local to
    /// the chunk being resampled, or `None` when the destination pixel
    /// has no source.
    fn map(&self, dest: [usize; 2]) -> Option<[usize; 2]>;
}

/// Builds one map per destination position.
pub trait ResamplingMapFactory: Send + Sync {
    fn create(&self, pos: &ChunkPosition) -> Result<Box<dyn ResamplingMap>>;
}

/// A resampling map backed by an affine transform from destination to
/// source pixel coordinates. Coordinates map `x` to columns and `y`
/// to rows; results outside the source dims are invalid.
pub struct AffineResamplingMap {
    transform: AffineTransform,
    source_dims: [usize; 2],
}

impl AffineResamplingMap {
    pub fn new(transform: AffineTransform, source_dims: [usize; 2]) -> Self {
        Self {
            transform,
            source_dims,
        }
    }
}

impl ResamplingMap for AffineResamplingMap {
    fn map(&self, dest: [usize; 2]) -> Option<[usize; 2]> {
        let pt = self.transform.apply(Coord {
            x: dest[1] as f64,
            y: dest[0] as f64,
        });
        if pt.x < 0.0 || pt.y < 0.0 {
            return None;
        }
        let (col, row) = (pt.x.floor() as usize, pt.y.floor() as usize);
        if row >= self.source_dims[0] || col >= self.source_dims[1] {
            None
        } else {
            Some([row, col])
        }
    }
}

/// Shifts a global destination-to-source transform by each chunk's
/// start, so the per-chunk maps receive chunk-local coordinates.
pub struct AffineMapFactory {
    transform: AffineTransform,
    source_dims: [usize; 2],
}

impl AffineMapFactory {
    pub fn new(transform: AffineTransform, source_dims: [usize; 2]) -> Self {
        Self {
            transform,
            source_dims,
        }
    }
}

impl ResamplingMapFactory for AffineMapFactory {
    fn create(&self, pos: &ChunkPosition) -> Result<Box<dyn ResamplingMap>> {
        if pos.rank() != 2 {
            return Err(RasterFlowError::InvalidChunkConfig(
                "resampling positions must be two-dimensional".into(),
            ));
        }
        // Local indices translate into the destination frame first.
        let shifted = AffineTransform::translate(pos.start[1] as f64, pos.start[0] as f64)
            .compose(&self.transform);
        Ok(Box::new(AffineResamplingMap::new(shifted, self.source_dims)))
    }
}

/// Copies source values into destination chunks through a resampling
/// map.
///
/// A destination chunk typically overlaps a small number of source
/// chunks; caching them by native slot reads each source chunk at
/// most once per destination chunk.
pub struct ChunkResampler {
    producer: Arc<dyn ChunkProducer>,
    consumer: Arc<dyn ChunkConsumer>,
    factory: Arc<dyn ResamplingMapFactory>,
    source_scheme: ChunkingScheme,
    dest_scheme: ChunkingScheme,
}

impl ChunkResampler {
    pub fn new(
        producer: Arc<dyn ChunkProducer>,
        consumer: Arc<dyn ChunkConsumer>,
        factory: Arc<dyn ResamplingMapFactory>,
    ) -> Result<Self> {
        let source_scheme = producer
            .native_scheme()
            .cloned()
            .ok_or(RasterFlowError::SchemeRequired)?;
        let dest_scheme = consumer
            .native_scheme()
            .cloned()
            .ok_or(RasterFlowError::SchemeRequired)?;
        if source_scheme.rank() != 2 || dest_scheme.rank() != 2 {
            return Err(RasterFlowError::InvalidChunkConfig(
                "resampling works on two-dimensional schemes".into(),
            ));
        }
        Ok(Self {
            producer,
            consumer,
            factory,
            source_scheme,
            dest_scheme,
        })
    }

    /// The consumer's native scheme, which drives iteration.
    pub fn dest_scheme(&self) -> &ChunkingScheme {
        &self.dest_scheme
    }

    /// Resample one destination position.
    pub fn resample_position(&self, pos: &ChunkPosition) -> Result<()> {
        if pos.rank() != 2 {
            return Err(RasterFlowError::InvalidChunkConfig(
                "resampling positions must be two-dimensional".into(),
            ));
        }
        let n = pos.values();
        let mut dest = self.consumer.prototype_chunk().blank_copy_with_values(n);
        let map = self.factory.create(pos)?;

        let chunk_size = self.source_scheme.chunk_size();
        let source_dims = self.source_scheme.dims();
        let mut cache: HashMap<(usize, usize), DataChunk> = HashMap::new();
        let mut mask = vec![false; n];

        for i in 0..pos.length[0] {
            for j in 0..pos.length[1] {
                let e = i * pos.length[1] + j;
                let Some([r, c]) = map.map([i, j]) else {
                    mask[e] = true;
                    continue;
                };
                let slot = (r / chunk_size[0], c / chunk_size[1]);
                let source = match cache.entry(slot) {
                    Entry::Occupied(occupied) => occupied.into_mut(),
                    Entry::Vacant(vacant) => {
                        let native = self.source_scheme.position_for(&[r, c]);
                        vacant.insert(self.producer.get_chunk(&native)?)
                    }
                };
                let width = chunk_size[1].min(source_dims[1] - slot.1 * chunk_size[1]);
                let local = (r % chunk_size[0]) * width + c % chunk_size[1];
                copy_value(source, local, &mut dest, e)?;
            }
        }
        flag_missing(&mut dest, &mask);
        self.consumer.put_chunk(pos, dest)
    }

    /// Resample every destination position in sequence.
    pub fn resample(&self) -> Result<()> {
        for pos in self.dest_scheme.positions() {
            self.resample_position(&pos)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{ExternalType, PrimitiveValue};
    use crate::flow::grid::{Grid, GridConsumer, GridProducer, MemoryGrid};
    use ndarray::{arr2, Array2};

    fn source_grid() -> Arc<MemoryGrid> {
        Arc::new(
            MemoryGrid::int(arr2(&[
                [0, 1, 2, 3],
                [10, 11, 12, 13],
                [20, 21, 22, 23],
                [30, 31, 32, 33],
            ]))
            .with_tile_size([2, 2])
            .with_missing(PrimitiveValue::Int(-1)),
        )
    }

    fn dest_grid() -> Arc<MemoryGrid> {
        Arc::new(
            MemoryGrid::int(Array2::from_elem((4, 4), -7))
                .with_tile_size([4, 2])
                .with_missing(PrimitiveValue::Int(-1)),
        )
    }

    #[test]
    fn identity_resampling_copies_across_tilings() {
        let source = source_grid();
        let dest = dest_grid();
        let resampler = ChunkResampler::new(
            Arc::new(GridProducer::new(Arc::clone(&source)).unwrap()),
            Arc::new(GridConsumer::new(Arc::clone(&dest)).unwrap()),
            Arc::new(AffineMapFactory::new(AffineTransform::identity(), [4, 4])),
        )
        .unwrap();
        resampler.resample().unwrap();

        let out = dest
            .get_data([0, 0], [4, 4])
            .unwrap();
        let src = source.get_data([0, 0], [4, 4]).unwrap();
        assert_eq!(out, src);
    }

    #[test]
    fn out_of_frame_destinations_come_out_missing() {
        let source = source_grid();
        let dest = dest_grid();
        // Destination row i reads source row i - 1.
        let shift = AffineTransform::translate(0.0, -1.0);
        let resampler = ChunkResampler::new(
            Arc::new(GridProducer::new(Arc::clone(&source)).unwrap()),
            Arc::new(GridConsumer::new(Arc::clone(&dest)).unwrap()),
            Arc::new(AffineMapFactory::new(shift, [4, 4])),
        )
        .unwrap();
        resampler.resample().unwrap();

        let out = dest.get_data([0, 0], [4, 4]).unwrap();
        match out {
            crate::chunk::PrimitiveBuffer::Int(values) => {
                assert_eq!(&values[..4], &[-1, -1, -1, -1]);
                assert_eq!(&values[4..8], &[0, 1, 2, 3]);
                assert_eq!(&values[12..], &[20, 21, 22, 23]);
            }
            _ => unreachable!(),
        }
    }

    struct Schemeless {
        prototype: DataChunk,
    }

    impl ChunkProducer for Schemeless {
        fn external_type(&self) -> ExternalType {
            self.prototype.external_type()
        }

        fn native_scheme(&self) -> Option<&ChunkingScheme> {
            None
        }

        fn prototype_chunk(&self) -> &DataChunk {
            &self.prototype
        }

        fn get_chunk(&self, _pos: &ChunkPosition) -> Result<DataChunk> {
            Ok(self.prototype.blank_copy())
        }
    }

    #[test]
    fn a_native_scheme_is_required_on_both_sides() {
        let producer = Arc::new(Schemeless {
            prototype: DataChunk::Int(crate::chunk::IntChunk::new(Vec::new(), None, None, false)),
        });
        let consumer = Arc::new(GridConsumer::new(dest_grid()).unwrap());
        let err = ChunkResampler::new(
            producer,
            consumer,
            Arc::new(AffineMapFactory::new(AffineTransform::identity(), [4, 4])),
        );
        assert!(matches!(err, Err(RasterFlowError::SchemeRequired)));
    }
}
