//! Adapters between 2-D grids and the chunk flow.
//!
//! A [`Grid`] is the seam to external storage: anything that can read
//! and write rectangular windows of one primitive type. The adapters
//! translate the grid's tiling into a [`ChunkingScheme`] and its
//! affine scaling into a chunk codec, so the rest of the engine only
//! ever sees producers and consumers.

use std::sync::{Arc, Mutex};

use ndarray::{s, Array2};

use super::{check_compatible, ChunkConsumer, ChunkProducer};
use crate::chunk::{
    new_chunk, Codec, DataChunk, ExternalType, PackingScheme, PrimitiveBuffer, PrimitiveData,
    PrimitiveValue, ScalingScheme,
};
use crate::chunking::{ChunkPosition, ChunkingScheme};
use crate::{RasterFlowError, Result};

/// A thread-safe 2-D typed array chunks can be read from and written
/// to. Windows are row-major with axis 0 as rows.
pub trait Grid: Send + Sync {
    /// Extents as `[rows, cols]`.
    fn dims(&self) -> [usize; 2];

    /// The raw storage class.
    fn data_class(&self) -> ExternalType;

    /// Preferred tiling as `(dims, tile_size)`, if the backing store
    /// has one.
    fn tiling_scheme(&self) -> Option<([usize; 2], [usize; 2])>;

    /// Affine `(scale, offset)` between stored and real values.
    fn scaling(&self) -> Option<(f64, f64)>;

    /// Raw value standing for "no data".
    fn missing(&self) -> Option<PrimitiveValue>;

    fn unsigned(&self) -> bool;

    /// Read a window in row-major order.
    fn get_data(&self, start: [usize; 2], length: [usize; 2]) -> Result<PrimitiveBuffer>;

    /// Write a window in row-major order.
    fn set_data(&self, data: PrimitiveData<'_>, start: [usize; 2], length: [usize; 2])
        -> Result<()>;
}

impl<G: Grid + ?Sized> Grid for Arc<G> {
    fn dims(&self) -> [usize; 2] {
        (**self).dims()
    }

    fn data_class(&self) -> ExternalType {
        (**self).data_class()
    }

    fn tiling_scheme(&self) -> Option<([usize; 2], [usize; 2])> {
        (**self).tiling_scheme()
    }

    fn scaling(&self) -> Option<(f64, f64)> {
        (**self).scaling()
    }

    fn missing(&self) -> Option<PrimitiveValue> {
        (**self).missing()
    }

    fn unsigned(&self) -> bool {
        (**self).unsigned()
    }

    fn get_data(&self, start: [usize; 2], length: [usize; 2]) -> Result<PrimitiveBuffer> {
        (**self).get_data(start, length)
    }

    fn set_data(
        &self,
        data: PrimitiveData<'_>,
        start: [usize; 2],
        length: [usize; 2],
    ) -> Result<()> {
        (**self).set_data(data, start, length)
    }
}

/// The chunking scheme a grid's tiling induces; untiled grids read as
/// one whole-grid chunk.
pub fn grid_scheme(grid: &dyn Grid) -> Result<ChunkingScheme> {
    match grid.tiling_scheme() {
        Some((dims, tile)) => ChunkingScheme::new(dims.to_vec(), tile.to_vec()),
        None => {
            let dims = grid.dims();
            ChunkingScheme::new(dims.to_vec(), dims.to_vec())
        }
    }
}

/// The codec a grid's affine scaling induces.
///
/// Integer grids pack to double even for unity scaling, so the
/// external type stays stable for downstream consumers. Float grids
/// scale at their own width, except that unity scaling reads raw.
pub fn grid_codec(grid: &dyn Grid) -> Option<Codec> {
    let (scale, offset) = grid.scaling()?;
    let class = grid.data_class();
    if class.is_integer() {
        return Some(Codec::Pack(PackingScheme::Double { scale, offset }));
    }
    if scale == 1.0 && offset == 0.0 {
        return None;
    }
    Some(match class {
        ExternalType::Float => Codec::Scale(ScalingScheme::Float {
            scale: scale as f32,
            offset: offset as f32,
        }),
        _ => Codec::Scale(ScalingScheme::Double { scale, offset }),
    })
}

fn grid_prototype(grid: &dyn Grid) -> Result<DataChunk> {
    let empty = match grid.data_class() {
        ExternalType::Byte => PrimitiveBuffer::Byte(Vec::new()),
        ExternalType::Short => PrimitiveBuffer::Short(Vec::new()),
        ExternalType::Int => PrimitiveBuffer::Int(Vec::new()),
        ExternalType::Long => PrimitiveBuffer::Long(Vec::new()),
        ExternalType::Float => PrimitiveBuffer::Float(Vec::new()),
        ExternalType::Double => PrimitiveBuffer::Double(Vec::new()),
    };
    new_chunk(empty, grid.missing(), grid_codec(grid), grid.unsigned())
}

fn window(pos: &ChunkPosition) -> Result<([usize; 2], [usize; 2])> {
    if pos.rank() != 2 {
        return Err(RasterFlowError::InvalidChunkConfig(
            "grid positions must be two-dimensional".into(),
        ));
    }
    Ok((
        [pos.start[0], pos.start[1]],
        [pos.length[0], pos.length[1]],
    ))
}

/// Reads chunks out of a [`Grid`].
pub struct GridProducer<G: Grid> {
    grid: G,
    scheme: ChunkingScheme,
    prototype: DataChunk,
}

impl<G: Grid> GridProducer<G> {
    pub fn new(grid: G) -> Result<Self> {
        let scheme = grid_scheme(&grid)?;
        let prototype = grid_prototype(&grid)?;
        Ok(Self {
            grid,
            scheme,
            prototype,
        })
    }

    pub fn grid(&self) -> &G {
        &self.grid
    }
}

impl<G: Grid> ChunkProducer for GridProducer<G> {
    fn external_type(&self) -> ExternalType {
        self.prototype.external_type()
    }

    fn native_scheme(&self) -> Option<&ChunkingScheme> {
        Some(&self.scheme)
    }

    fn prototype_chunk(&self) -> &DataChunk {
        &self.prototype
    }

    fn get_chunk(&self, pos: &ChunkPosition) -> Result<DataChunk> {
        let (start, length) = window(pos)?;
        let data = self.grid.get_data(start, length)?;
        self.prototype.with_data(data)
    }
}

/// Writes chunks into a [`Grid`].
pub struct GridConsumer<G: Grid> {
    grid: G,
    scheme: ChunkingScheme,
    prototype: DataChunk,
}

impl<G: Grid> GridConsumer<G> {
    pub fn new(grid: G) -> Result<Self> {
        let scheme = grid_scheme(&grid)?;
        let prototype = grid_prototype(&grid)?;
        Ok(Self {
            grid,
            scheme,
            prototype,
        })
    }

    pub fn grid(&self) -> &G {
        &self.grid
    }
}

impl<G: Grid> ChunkConsumer for GridConsumer<G> {
    fn native_scheme(&self) -> Option<&ChunkingScheme> {
        Some(&self.scheme)
    }

    fn prototype_chunk(&self) -> &DataChunk {
        &self.prototype
    }

    fn put_chunk(&self, pos: &ChunkPosition, chunk: DataChunk) -> Result<()> {
        check_compatible(&self.prototype, &chunk)?;
        let (start, length) = window(pos)?;
        if chunk.values() != length[0] * length[1] {
            return Err(RasterFlowError::IncompatibleChunk(format!(
                "chunk holds {} values but the position covers {}",
                chunk.values(),
                length[0] * length[1]
            )));
        }
        self.grid.set_data(chunk.primitive_data(), start, length)
    }
}

enum GridArray {
    Byte(Array2<i8>),
    Short(Array2<i16>),
    Int(Array2<i32>),
    Long(Array2<i64>),
    Float(Array2<f32>),
    Double(Array2<f64>),
}

/// An in-memory grid backed by `ndarray`, synchronized for concurrent
/// chunk access. Useful as a scratch target and in tests.
pub struct MemoryGrid {
    data: Mutex<GridArray>,
    dims: [usize; 2],
    class: ExternalType,
    tile_size: Option<[usize; 2]>,
    scaling: Option<(f64, f64)>,
    missing: Option<PrimitiveValue>,
    unsigned: bool,
}

macro_rules! memory_grid_ctor {
    ($(#[$meta:meta])* $name:ident, $variant:ident, $t:ty, $class:ident) => {
        $(#[$meta])*
        pub fn $name(data: Array2<$t>) -> Self {
            let dims = [data.nrows(), data.ncols()];
            Self {
                data: Mutex::new(GridArray::$variant(data)),
                dims,
                class: ExternalType::$class,
                tile_size: None,
                scaling: None,
                missing: None,
                unsigned: false,
            }
        }
    };
}

macro_rules! window_read {
    ($arr:expr, $start:expr, $length:expr) => {
        $arr.slice(s![
            $start[0]..$start[0] + $length[0],
            $start[1]..$start[1] + $length[1]
        ])
        .iter()
        .copied()
        .collect()
    };
}

macro_rules! window_write {
    ($arr:expr, $data:expr, $start:expr, $length:expr) => {{
        let window = Array2::from_shape_vec(($length[0], $length[1]), $data.to_vec())?;
        $arr.slice_mut(s![
            $start[0]..$start[0] + $length[0],
            $start[1]..$start[1] + $length[1]
        ])
        .assign(&window);
        Ok(())
    }};
}

impl MemoryGrid {
    memory_grid_ctor!(
        /// Grid over i8 storage.
        byte, Byte, i8, Byte
    );
    memory_grid_ctor!(
        /// Grid over i16 storage.
        short, Short, i16, Short
    );
    memory_grid_ctor!(
        /// Grid over i32 storage.
        int, Int, i32, Int
    );
    memory_grid_ctor!(
        /// Grid over i64 storage.
        long, Long, i64, Long
    );
    memory_grid_ctor!(
        /// Grid over f32 storage.
        float, Float, f32, Float
    );
    memory_grid_ctor!(
        /// Grid over f64 storage.
        double, Double, f64, Double
    );

    pub fn with_tile_size(mut self, tile_size: [usize; 2]) -> Self {
        self.tile_size = Some(tile_size);
        self
    }

    pub fn with_scaling(mut self, scale: f64, offset: f64) -> Self {
        self.scaling = Some((scale, offset));
        self
    }

    pub fn with_missing(mut self, missing: PrimitiveValue) -> Self {
        self.missing = Some(missing);
        self
    }

    pub fn with_unsigned(mut self, unsigned: bool) -> Self {
        self.unsigned = unsigned;
        self
    }
}

impl Grid for MemoryGrid {
    fn dims(&self) -> [usize; 2] {
        self.dims
    }

    fn data_class(&self) -> ExternalType {
        self.class
    }

    fn tiling_scheme(&self) -> Option<([usize; 2], [usize; 2])> {
        self.tile_size.map(|tile| (self.dims, tile))
    }

    fn scaling(&self) -> Option<(f64, f64)> {
        self.scaling
    }

    fn missing(&self) -> Option<PrimitiveValue> {
        self.missing
    }

    fn unsigned(&self) -> bool {
        self.unsigned
    }

    fn get_data(&self, start: [usize; 2], length: [usize; 2]) -> Result<PrimitiveBuffer> {
        let data = self.data.lock().unwrap();
        Ok(match &*data {
            GridArray::Byte(a) => PrimitiveBuffer::Byte(window_read!(a, start, length)),
            GridArray::Short(a) => PrimitiveBuffer::Short(window_read!(a, start, length)),
            GridArray::Int(a) => PrimitiveBuffer::Int(window_read!(a, start, length)),
            GridArray::Long(a) => PrimitiveBuffer::Long(window_read!(a, start, length)),
            GridArray::Float(a) => PrimitiveBuffer::Float(window_read!(a, start, length)),
            GridArray::Double(a) => PrimitiveBuffer::Double(window_read!(a, start, length)),
        })
    }

    fn set_data(
        &self,
        data: PrimitiveData<'_>,
        start: [usize; 2],
        length: [usize; 2],
    ) -> Result<()> {
        let mut stored = self.data.lock().unwrap();
        match (&mut *stored, data) {
            (GridArray::Byte(a), PrimitiveData::Byte(d)) => window_write!(a, d, start, length),
            (GridArray::Short(a), PrimitiveData::Short(d)) => window_write!(a, d, start, length),
            (GridArray::Int(a), PrimitiveData::Int(d)) => window_write!(a, d, start, length),
            (GridArray::Long(a), PrimitiveData::Long(d)) => window_write!(a, d, start, length),
            (GridArray::Float(a), PrimitiveData::Float(d)) => window_write!(a, d, start, length),
            (GridArray::Double(a), PrimitiveData::Double(d)) => window_write!(a, d, start, length),
            _ => Err(RasterFlowError::TypeMismatch),
        }
    }
}
