//! Tile a logical data space into memory-efficient chunks.
//!
//! It is often inefficient to load a large gridded dataset completely
//! into memory while processing it. This module partitions an n-D
//! space of `dims` extents into equal-size chunks of `chunk_size`
//! extents so that processing can move one chunk at a time.
//!
//! # Edge Truncation
//!
//! Chunks at the upper edge of an axis are *truncated* to what is left
//! of the axis, never padded. A chunk size larger than the axis extent
//! is allowed and produces exactly one chunk spanning the whole axis.
//!
//! # Iteration Order
//!
//! Positions iterate in lexicographic order with axis 0 as the major
//! axis, so the last axis varies fastest. Iteration is lazy, finite
//! and restartable; every coordinate of the space is covered by
//! exactly one position.

mod iters;

pub use iters::ChunkPositions;

use num::Integer;
use serde_derive::{Deserialize, Serialize};

use crate::{RasterFlowError, Result};

/// Immutable partition of an n-dimensional space into equal-size
/// chunks with edge truncation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingScheme {
    dims: Vec<usize>,
    chunk_size: Vec<usize>,
}

/// One chunk-sized tile inside a [`ChunkingScheme`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPosition {
    /// Coordinates of the tile's first element along each axis.
    pub start: Vec<usize>,
    /// Extent of the tile along each axis.
    pub length: Vec<usize>,
}

impl ChunkPosition {
    pub fn new(start: Vec<usize>, length: Vec<usize>) -> Self {
        Self { start, length }
    }

    pub fn rank(&self) -> usize {
        self.start.len()
    }

    /// Number of elements the tile covers.
    pub fn values(&self) -> usize {
        self.length.iter().product()
    }
}

impl ChunkingScheme {
    /// Create a scheme over a space of `dims` extents cut into chunks
    /// of `chunk_size` extents.
    pub fn new(dims: Vec<usize>, chunk_size: Vec<usize>) -> Result<Self> {
        if dims.is_empty()
            || dims.len() != chunk_size.len()
            || dims.iter().any(|&d| d == 0)
            || chunk_size.iter().any(|&s| s == 0)
        {
            return Err(RasterFlowError::ZeroDimension);
        }
        Ok(Self { dims, chunk_size })
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn chunk_size(&self) -> &[usize] {
        &self.chunk_size
    }

    /// Number of chunks along `axis`.
    pub fn chunk_count(&self, axis: usize) -> usize {
        self.dims[axis].div_ceil(self.chunk_size[axis])
    }

    /// Total number of chunks in the scheme.
    pub fn total_chunks(&self) -> usize {
        (0..self.rank()).map(|axis| self.chunk_count(axis)).product()
    }

    /// The position at the origin.
    pub fn first(&self) -> ChunkPosition {
        let start = vec![0; self.rank()];
        let length = self.truncated_length(&start);
        ChunkPosition::new(start, length)
    }

    /// The lexicographic successor of `pos`, or `None` past the end.
    pub fn next(&self, pos: &ChunkPosition) -> Option<ChunkPosition> {
        let mut start = pos.start.clone();
        for axis in (0..self.rank()).rev() {
            start[axis] += self.chunk_size[axis];
            if start[axis] < self.dims[axis] {
                let length = self.truncated_length(&start);
                return Some(ChunkPosition::new(start, length));
            }
            start[axis] = 0;
        }
        None
    }

    /// Lazily iterate all positions in order.
    pub fn positions(&self) -> ChunkPositions<'_> {
        ChunkPositions::new(self)
    }

    /// The unique native position containing `coords`, which must lie
    /// inside the scheme's dims.
    pub fn position_for(&self, coords: &[usize]) -> ChunkPosition {
        debug_assert_eq!(coords.len(), self.rank());
        debug_assert!(coords.iter().zip(&self.dims).all(|(c, d)| c < d));
        let start: Vec<usize> = coords
            .iter()
            .zip(&self.chunk_size)
            .map(|(c, s)| (c / s) * s)
            .collect();
        let length = self.truncated_length(&start);
        ChunkPosition::new(start, length)
    }

    /// True when `pos` starts on a chunk boundary and spans the
    /// edge-truncated chunk size there.
    pub fn is_native(&self, pos: &ChunkPosition) -> bool {
        pos.rank() == self.rank()
            && pos
                .start
                .iter()
                .zip(&self.chunk_size)
                .zip(&self.dims)
                .all(|((s, c), d)| s % c == 0 && s < d)
            && pos.length == self.truncated_length(&pos.start)
    }

    /// The scheme whose chunk sizes are the least common multiple of
    /// this scheme's and `other`'s, over the same space. Producers
    /// with different native tilings iterate efficiently along the
    /// merged boundaries.
    pub fn common_with(&self, other: &ChunkingScheme) -> Result<ChunkingScheme> {
        if self.dims != other.dims {
            return Err(RasterFlowError::InvalidChunkConfig(
                "chunking schemes cover different spaces".into(),
            ));
        }
        let chunk_size = self
            .chunk_size
            .iter()
            .zip(&other.chunk_size)
            .map(|(a, b)| a.lcm(b))
            .collect();
        ChunkingScheme::new(self.dims.clone(), chunk_size)
    }

    fn truncated_length(&self, start: &[usize]) -> Vec<usize> {
        start
            .iter()
            .zip(&self.chunk_size)
            .zip(&self.dims)
            .map(|((s, c), d)| (*c).min(d - s))
            .collect()
    }
}
